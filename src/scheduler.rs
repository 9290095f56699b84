//! Station scheduling over a scarce pool of playback servers
//!
//! There are usually fewer servers than stations. Each server holds at most
//! one station's playlist (its binding) and at most one server, the active
//! one, has its output enabled once an operation completes. Preloading a
//! station onto an idle server before the dial reaches it hides the playlist
//! load from the switch.

use crate::backend::{BackendQuery, PlaybackConnection, QueryReply};
use crate::dial::TuningSide;
use crate::error::{RadioError, RadioResult};
use crate::station::{PlayStrategy, StartPoint, Station};
use chrono::Timelike;
use rand::Rng;
use tracing::{debug, error, info, warn};

/// Local wall-clock `(hour, minute)`
pub type Clock = fn() -> (u32, u32);

fn local_time() -> (u32, u32) {
    let now = chrono::Local::now();
    (now.hour(), now.minute())
}

/// A playback server and what it currently holds
pub struct Server<C> {
    conn: C,
    bound: Option<usize>,
    output_enabled: bool,
    /// Playback has begun since the playlist was loaded
    started: bool,
}

impl<C: PlaybackConnection> Server<C> {
    fn new(conn: C) -> Self {
        Self {
            conn,
            bound: None,
            output_enabled: false,
            started: false,
        }
    }

    pub fn bound_station(&self) -> Option<usize> {
        self.bound
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    #[cfg(test)]
    pub fn connection(&self) -> &C {
        &self.conn
    }
}

/// Owns every server connection and all station/server bindings
pub struct StationScheduler<C: PlaybackConnection> {
    servers: Vec<Server<C>>,
    stations: Vec<Station>,
    active: Option<usize>,
    clock: Clock,
}

impl<C: PlaybackConnection> StationScheduler<C> {
    pub fn new(connections: Vec<C>, stations: Vec<Station>) -> Self {
        Self {
            servers: connections.into_iter().map(Server::new).collect(),
            stations,
            active: None,
            clock: local_time,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn servers(&self) -> &[Server<C>] {
        &self.servers
    }

    pub fn active_station(&self) -> Option<usize> {
        self.active.and_then(|s| self.servers[s].bound)
    }

    /// The server holding `station`, if any
    pub fn binding(&self, station: usize) -> Option<usize> {
        self.servers.iter().position(|s| s.bound_station() == Some(station))
    }

    /// Wait for every server to answer
    pub async fn ready_all(&mut self) -> RadioResult<()> {
        for server in &mut self.servers {
            server.conn.ready().await?;
        }
        Ok(())
    }

    /// Load `station` onto a server unless it is already bound. Prefers an
    /// unbound server, then any server but the active one, and finally
    /// evicts the active server.
    pub async fn preload(&mut self, station: usize) -> RadioResult<usize> {
        self.check_station(station)?;
        if let Some(server) = self.binding(station) {
            debug!(station, server, "already loaded");
            return Ok(server);
        }
        let target = self
            .pick_server(true)
            .ok_or_else(|| RadioError::Unavailable("no playback servers".to_string()))?;
        self.load_on(target, station).await
    }

    /// Make `station` the one audible station.
    pub async fn activate(&mut self, station: usize) -> RadioResult<()> {
        self.check_station(station)?;
        let target = match self.binding(station) {
            Some(server) => server,
            None => self.preload(station).await?,
        };

        if self.active == Some(target) && self.servers[target].output_enabled {
            debug!(station, server = target, "already active");
            return Ok(());
        }

        // The new server goes live before the old one is silenced, so a
        // failure leaves the previous station playing.
        if let Err(e) = self.go_live(target).await {
            error!(station, server = target, error = %e, "activation failed");
            self.silence(target).await;
            return Err(e);
        }
        self.active = Some(target);
        info!(station, server = target, name = %self.stations[station].name, "station active");

        let others: Vec<usize> = (0..self.servers.len())
            .filter(|&i| i != target && self.servers[i].output_enabled)
            .collect();
        for other in others {
            self.silence(other).await;
        }
        Ok(())
    }

    /// After an activation, load the station the dial is most likely to
    /// reach next: the neighbor across the nearest gap, or the inward
    /// neighbor at either end of the dial. Never evicts the active server.
    pub async fn speculative_preload(&mut self, side: TuningSide) -> RadioResult<Option<usize>> {
        let Some(current) = self.active_station() else {
            return Ok(None);
        };
        let Some(candidate) = speculative_target(current, side, self.stations.len()) else {
            return Ok(None);
        };
        if self.binding(candidate).is_some() {
            return Ok(None);
        }
        let Some(target) = self.pick_server(false) else {
            debug!(station = candidate, "no spare server to preload on");
            return Ok(None);
        };
        self.load_on(target, candidate).await.map(|_| Some(candidate))
    }

    /// Ask the active server a read-only question
    pub async fn query_active(&mut self, query: BackendQuery) -> RadioResult<QueryReply> {
        let active = self
            .active
            .ok_or_else(|| RadioError::Unavailable("no active server".to_string()))?;
        let conn = &mut self.servers[active].conn;
        conn.ready().await?;
        match query {
            BackendQuery::CurrentSong => conn.current_song().await.map(QueryReply::Song),
            BackendQuery::Status => conn.status().await.map(QueryReply::Status),
        }
    }

    /// Stop every server and drop the connections' state
    pub async fn shutdown(&mut self) {
        for server in &mut self.servers {
            let id = server.conn.id();
            if let Err(e) = server.conn.stop().await {
                warn!(server = id, error = %e, "stop failed");
            }
            if let Err(e) = server.conn.disconnect().await {
                warn!(server = id, error = %e, "disconnect failed");
            }
            server.output_enabled = false;
        }
        self.active = None;
    }

    fn check_station(&self, station: usize) -> RadioResult<()> {
        if station < self.stations.len() {
            Ok(())
        } else {
            Err(RadioError::rejected(
                format!("station {station}"),
                format!("only {} stations configured", self.stations.len()),
            ))
        }
    }

    fn pick_server(&self, allow_active: bool) -> Option<usize> {
        let not_active = |i: &usize| Some(*i) != self.active;
        let all = 0..self.servers.len();
        all.clone()
            .filter(not_active)
            .find(|&i| self.servers[i].bound.is_none())
            .or_else(|| all.clone().find(|&i| self.servers[i].bound.is_none()))
            .or_else(|| all.clone().find(not_active))
            .or_else(|| self.active.filter(|_| allow_active))
    }

    async fn load_on(&mut self, target: usize, station: usize) -> RadioResult<usize> {
        if self.active == Some(target) {
            self.active = None;
            self.silence(target).await;
        }
        let st = &self.stations[station];
        let server = &mut self.servers[target];

        if let Some(old) = server.bound.take() {
            info!(server = target, evicted = old, station, "reassigning server");
        }
        server.started = false;

        let result = async {
            server.conn.ready().await?;
            server.conn.clear().await?;
            server.conn.load(&st.playlist).await?;
            server.conn.set_random(st.randomize).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(server = target, station, playlist = %st.playlist, "preloaded");
                server.bound = Some(station);
                Ok(target)
            }
            Err(e) => {
                error!(server = target, station, playlist = %st.playlist, error = %e, "load failed");
                Err(e)
            }
        }
    }

    async fn go_live(&mut self, target: usize) -> RadioResult<()> {
        let server = &mut self.servers[target];
        let station = server
            .bound
            .ok_or_else(|| RadioError::Unavailable(format!("server {target} holds no station")))?;
        let st = &self.stations[station];

        server.conn.ready().await?;
        server.conn.enable_output().await?;
        server.output_enabled = true;

        let start = if server.started && st.strategy != PlayStrategy::TimeOfDay {
            StartPoint::Resume
        } else {
            let needs_len =
                st.strategy == PlayStrategy::TimeOfDay || (st.randomize && st.strategy == PlayStrategy::Default);
            let len = if needs_len { server.conn.playlist_len().await? } else { 0 };
            let (hour, minute) = (self.clock)();
            st.strategy
                .start_point(st.randomize, len, hour, minute, |n| rand::rng().random_range(0..n))
        };
        debug!(server = target, station, ?start, "starting playback");

        match start {
            StartPoint::Resume => server.conn.play(None).await?,
            StartPoint::Track(track) => server.conn.play(Some(track)).await?,
            StartPoint::TrackAt { track, seconds } => {
                server.conn.play(Some(track)).await?;
                server.conn.seek(seconds).await?;
            }
        }
        server.started = true;
        Ok(())
    }

    /// Disable output and pause; failures are logged, not returned.
    async fn silence(&mut self, target: usize) {
        let server = &mut self.servers[target];
        match server.conn.disable_output().await {
            Ok(()) => server.output_enabled = false,
            Err(e) => warn!(server = target, error = %e, "disable output failed"),
        }
        if let Err(e) = server.conn.pause().await {
            warn!(server = target, error = %e, "pause failed");
        }
    }
}

/// Station to preload after tuning `current` from `side`
pub fn speculative_target(current: usize, side: TuningSide, stations: usize) -> Option<usize> {
    let left = current.checked_sub(1);
    let right = (current + 1 < stations).then_some(current + 1);
    match side {
        TuningSide::Left => left.or(right),
        TuningSide::Right => right.or(left),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PlayerStatus, SongInfo};
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;

    #[derive(Default)]
    struct MockState {
        calls: Vec<String>,
        fail: HashSet<&'static str>,
        enabled: bool,
    }

    struct MockConn {
        id: usize,
        state: Rc<RefCell<MockState>>,
    }

    impl MockConn {
        fn call(&self, name: &'static str, arg: String) -> RadioResult<()> {
            let mut st = self.state.borrow_mut();
            st.calls.push(if arg.is_empty() {
                name.to_string()
            } else {
                format!("{name} {arg}")
            });
            if st.fail.contains(name) {
                return Err(RadioError::rejected(name, "injected"));
            }
            match name {
                "enable" => st.enabled = true,
                "disable" => st.enabled = false,
                _ => {}
            }
            Ok(())
        }
    }

    impl PlaybackConnection for MockConn {
        fn id(&self) -> usize {
            self.id
        }
        async fn ready(&mut self) -> RadioResult<()> {
            self.call("ready", String::new())
        }
        async fn clear(&mut self) -> RadioResult<()> {
            self.call("clear", String::new())
        }
        async fn load(&mut self, playlist: &str) -> RadioResult<()> {
            self.call("load", playlist.to_string())
        }
        async fn set_random(&mut self, on: bool) -> RadioResult<()> {
            self.call("random", on.to_string())
        }
        async fn playlist_len(&mut self) -> RadioResult<usize> {
            self.call("playlist", String::new()).map(|_| 10)
        }
        async fn enable_output(&mut self) -> RadioResult<()> {
            self.call("enable", String::new())
        }
        async fn disable_output(&mut self) -> RadioResult<()> {
            self.call("disable", String::new())
        }
        async fn play(&mut self, position: Option<usize>) -> RadioResult<()> {
            self.call("play", position.map(|p| p.to_string()).unwrap_or_default())
        }
        async fn seek(&mut self, seconds: u32) -> RadioResult<()> {
            self.call("seek", seconds.to_string())
        }
        async fn pause(&mut self) -> RadioResult<()> {
            self.call("pause", String::new())
        }
        async fn stop(&mut self) -> RadioResult<()> {
            self.call("stop", String::new())
        }
        async fn current_song(&mut self) -> RadioResult<SongInfo> {
            self.call("currentsong", String::new())?;
            Ok(SongInfo {
                title: format!("song on {}", self.id),
                ..SongInfo::default()
            })
        }
        async fn status(&mut self) -> RadioResult<PlayerStatus> {
            self.call("status", String::new())?;
            Ok(PlayerStatus::default())
        }
        async fn disconnect(&mut self) -> RadioResult<()> {
            self.call("disconnect", String::new())
        }
    }

    fn stations(n: usize) -> Vec<Station> {
        (0..n)
            .map(|id| Station {
                id,
                name: format!("st{id}"),
                playlist: format!("pl{id}"),
                randomize: false,
                strategy: PlayStrategy::Default,
                frequency: 100.0 * (id + 1) as f64,
            })
            .collect()
    }

    fn scheduler(servers: usize, n: usize) -> (StationScheduler<MockConn>, Vec<Rc<RefCell<MockState>>>) {
        let states: Vec<_> = (0..servers).map(|_| Rc::new(RefCell::new(MockState::default()))).collect();
        let conns = states
            .iter()
            .enumerate()
            .map(|(id, state)| MockConn {
                id,
                state: Rc::clone(state),
            })
            .collect();
        (StationScheduler::new(conns, stations(n)), states)
    }

    fn loads(state: &Rc<RefCell<MockState>>) -> usize {
        state.borrow().calls.iter().filter(|c| c.starts_with("load")).count()
    }

    fn assert_injective(s: &StationScheduler<MockConn>) {
        let bound: Vec<usize> = s.servers().iter().filter_map(|sv| sv.bound_station()).collect();
        let unique: HashSet<_> = bound.iter().collect();
        assert_eq!(bound.len(), unique.len(), "station bound twice: {bound:?}");
    }

    fn enabled_count(s: &StationScheduler<MockConn>) -> usize {
        s.servers().iter().filter(|sv| sv.output_enabled()).count()
    }

    #[tokio::test]
    async fn test_preloads_never_double_book() {
        let (mut s, _) = scheduler(2, 4);
        for station in 0..3 {
            s.preload(station).await.unwrap();
            assert_injective(&s);
        }
        assert!(s.binding(2).is_some());
        s.activate(2).await.unwrap();
        assert_injective(&s);
        assert_eq!(enabled_count(&s), 1);
        assert_eq!(s.active_station(), Some(2));
    }

    #[tokio::test]
    async fn test_switch_prefers_free_server_and_keeps_binding() {
        let (mut s, states) = scheduler(2, 3);
        s.activate(0).await.unwrap();
        assert_eq!(s.binding(0), Some(0));

        s.activate(1).await.unwrap();
        assert_eq!(s.binding(1), Some(1));
        assert!(!s.servers()[0].output_enabled());
        assert!(s.servers()[1].output_enabled());
        assert!(states[0].borrow().calls.contains(&"pause".to_string()));

        s.activate(0).await.unwrap();
        assert_eq!(s.active_station(), Some(0));
        assert!(s.servers()[0].output_enabled());
        assert!(!s.servers()[1].output_enabled());
        assert_eq!(loads(&states[0]), 1);
        // Resumed, not restarted from the first track
        assert_eq!(states[0].borrow().calls.last().unwrap(), "play");
    }

    #[tokio::test]
    async fn test_preload_of_bound_station_is_noop() {
        let (mut s, states) = scheduler(2, 3);
        s.preload(1).await.unwrap();
        s.preload(1).await.unwrap();
        assert_eq!(loads(&states[0]) + loads(&states[1]), 1);
    }

    #[tokio::test]
    async fn test_eviction_skips_active_server() {
        let (mut s, _) = scheduler(2, 4);
        s.activate(0).await.unwrap();
        s.preload(1).await.unwrap();
        s.preload(2).await.unwrap();
        assert_eq!(s.binding(0), Some(0));
        assert_eq!(s.binding(1), None);
        assert_eq!(s.binding(2), Some(1));
    }

    #[tokio::test]
    async fn test_single_server_forced_eviction() {
        let (mut s, states) = scheduler(1, 3);
        s.activate(0).await.unwrap();
        s.activate(2).await.unwrap();
        assert_eq!(s.binding(2), Some(0));
        assert_eq!(s.binding(0), None);
        assert_eq!(s.active_station(), Some(2));
        assert!(states[0].borrow().enabled);
        assert_eq!(enabled_count(&s), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_of_active_server_leaves_it_silent() {
        let (mut s, states) = scheduler(1, 3);
        s.activate(0).await.unwrap();
        states[0].borrow_mut().fail.insert("load");
        assert!(s.activate(2).await.is_err());
        assert_eq!(s.active_station(), None);
        assert_eq!(s.binding(0), None);
        assert_eq!(enabled_count(&s), 0);
        assert!(!states[0].borrow().enabled);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_server_unbound() {
        let (mut s, states) = scheduler(2, 3);
        s.preload(0).await.unwrap();
        s.preload(1).await.unwrap();
        states[0].borrow_mut().fail.insert("load");
        let err = s.preload(2).await.unwrap_err();
        assert!(matches!(err, RadioError::CommandRejected { .. }));
        assert_eq!(s.binding(2), None);
        assert_eq!(s.binding(0), None);
        assert_eq!(s.binding(1), Some(1));
    }

    #[tokio::test]
    async fn test_failed_activation_keeps_previous_station() {
        let (mut s, states) = scheduler(2, 3);
        s.activate(0).await.unwrap();
        states[1].borrow_mut().fail.insert("play");
        assert!(s.activate(1).await.is_err());
        assert_eq!(s.active_station(), Some(0));
        assert!(s.servers()[0].output_enabled());
        assert!(!s.servers()[1].output_enabled());
        assert_eq!(enabled_count(&s), 1);
    }

    #[tokio::test]
    async fn test_speculative_preload_uses_spare_server() {
        let (mut s, _) = scheduler(2, 4);
        s.activate(1).await.unwrap();
        let pre = s.speculative_preload(TuningSide::Right).await.unwrap();
        assert_eq!(pre, Some(2));
        assert!(s.binding(2).is_some());
        assert_eq!(s.active_station(), Some(1));
    }

    #[tokio::test]
    async fn test_speculative_preload_never_evicts_active() {
        let (mut s, _) = scheduler(1, 3);
        s.activate(1).await.unwrap();
        let pre = s.speculative_preload(TuningSide::Left).await.unwrap();
        assert_eq!(pre, None);
        assert_eq!(s.binding(1), Some(0));
    }

    #[test]
    fn test_speculative_targets() {
        assert_eq!(speculative_target(0, TuningSide::Left, 4), Some(1));
        assert_eq!(speculative_target(0, TuningSide::Right, 4), Some(1));
        assert_eq!(speculative_target(3, TuningSide::Right, 4), Some(2));
        assert_eq!(speculative_target(2, TuningSide::Left, 4), Some(1));
        assert_eq!(speculative_target(2, TuningSide::Right, 4), Some(3));
        assert_eq!(speculative_target(0, TuningSide::Left, 1), None);
    }

    #[tokio::test]
    async fn test_query_without_active_server() {
        let (mut s, _) = scheduler(2, 3);
        let err = s.query_active(BackendQuery::CurrentSong).await.unwrap_err();
        assert!(matches!(err, RadioError::Unavailable(_)));

        s.activate(2).await.unwrap();
        match s.query_active(BackendQuery::CurrentSong).await.unwrap() {
            QueryReply::Song(song) => assert_eq!(song.title, "song on 0"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_time_of_day_station_seeks() {
        let (mut s, states) = scheduler(1, 1);
        s.stations[0].strategy = PlayStrategy::TimeOfDay;
        let mut s = s.with_clock(|| (9, 30));
        s.activate(0).await.unwrap();
        let calls = states[0].borrow().calls.clone();
        assert!(calls.contains(&"play 3".to_string()));
        assert!(calls.contains(&"seek 1800".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_station_rejected() {
        let (mut s, _) = scheduler(1, 2);
        assert!(matches!(
            s.activate(5).await,
            Err(RadioError::CommandRejected { .. })
        ));
    }
}
