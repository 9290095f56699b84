//! Playback server connections
//!
//! The radio never speaks the MPD protocol itself: each server is driven
//! through the `mpc` client, one invocation per command.

use crate::error::{RadioError, RadioResult};
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What is playing on a server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongInfo {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub file: String,
}

/// Transport state of a server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStatus {
    pub state: String,
    /// Seconds into the current song
    pub elapsed: Option<u32>,
    /// Length of the current song in seconds
    pub duration: Option<u32>,
}

/// Read-only questions the active server can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendQuery {
    CurrentSong,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryReply {
    Song(SongInfo),
    Status(PlayerStatus),
}

/// One playback server, owned exclusively by the scheduler.
///
/// Every command may fail with `CommandRejected` (not applied) or
/// `ConnectionLost`; `ready` is the only call that retries.
#[allow(async_fn_in_trait)]
pub trait PlaybackConnection {
    fn id(&self) -> usize;

    /// Block until the server answers, reconnecting with a fixed backoff.
    /// Fails only when the server can never be reached.
    async fn ready(&mut self) -> RadioResult<()>;
    async fn clear(&mut self) -> RadioResult<()>;
    async fn load(&mut self, playlist: &str) -> RadioResult<()>;
    async fn set_random(&mut self, on: bool) -> RadioResult<()>;
    async fn playlist_len(&mut self) -> RadioResult<usize>;
    async fn enable_output(&mut self) -> RadioResult<()>;
    async fn disable_output(&mut self) -> RadioResult<()>;
    /// Start playing; `None` resumes where the server left off
    async fn play(&mut self, position: Option<usize>) -> RadioResult<()>;
    async fn seek(&mut self, seconds: u32) -> RadioResult<()>;
    async fn pause(&mut self) -> RadioResult<()>;
    async fn stop(&mut self) -> RadioResult<()>;
    async fn current_song(&mut self) -> RadioResult<SongInfo>;
    async fn status(&mut self) -> RadioResult<PlayerStatus>;
    async fn disconnect(&mut self) -> RadioResult<()>;
}

/// An MPD server reached through the `mpc` command line client
pub struct MpcConnection {
    id: usize,
    host: String,
    port: u16,
    output: u32,
    backoff: Duration,
    connected: bool,
}

impl MpcConnection {
    pub fn new(id: usize, host: impl Into<String>, port: u16, output: u32, backoff: Duration) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            output,
            backoff,
            connected: false,
        }
    }

    async fn mpc(&mut self, args: &[&str]) -> RadioResult<String> {
        let result = run_mpc(self.id, &self.host, self.port, args).await;
        if matches!(result, Err(RadioError::ConnectionLost { .. })) {
            self.connected = false;
        }
        result
    }

    async fn command(&mut self, args: &[&str]) -> RadioResult<()> {
        self.mpc(args).await.map(|_| ())
    }
}

impl PlaybackConnection for MpcConnection {
    fn id(&self) -> usize {
        self.id
    }

    async fn ready(&mut self) -> RadioResult<()> {
        let (id, port, host) = (self.id, self.port, self.host.as_str());
        let result = retry_while_lost(id, self.backoff, || async move {
            run_mpc(id, host, port, &["status"]).await.map(|_| ())
        })
        .await;
        if let Err(e) = result {
            self.connected = false;
            return Err(e);
        }
        if !self.connected {
            info!(server = self.id, host = %self.host, port = self.port, "connected");
            self.connected = true;
        }
        Ok(())
    }

    async fn clear(&mut self) -> RadioResult<()> {
        self.command(&["clear"]).await
    }

    async fn load(&mut self, playlist: &str) -> RadioResult<()> {
        self.command(&["load", playlist]).await
    }

    async fn set_random(&mut self, on: bool) -> RadioResult<()> {
        self.command(&["random", if on { "on" } else { "off" }]).await
    }

    async fn playlist_len(&mut self) -> RadioResult<usize> {
        let text = self.mpc(&["playlist"]).await?;
        Ok(text.lines().filter(|l| !l.trim().is_empty()).count())
    }

    async fn enable_output(&mut self) -> RadioResult<()> {
        let output = self.output.to_string();
        self.command(&["enable", &output]).await
    }

    async fn disable_output(&mut self) -> RadioResult<()> {
        let output = self.output.to_string();
        self.command(&["disable", &output]).await
    }

    async fn play(&mut self, position: Option<usize>) -> RadioResult<()> {
        match position {
            // mpc numbers tracks from 1
            Some(p) => {
                let track = (p + 1).to_string();
                self.command(&["play", &track]).await
            }
            None => self.command(&["play"]).await,
        }
    }

    async fn seek(&mut self, seconds: u32) -> RadioResult<()> {
        let at = format!("{}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60);
        self.command(&["seek", &at]).await
    }

    async fn pause(&mut self) -> RadioResult<()> {
        self.command(&["pause"]).await
    }

    async fn stop(&mut self) -> RadioResult<()> {
        self.command(&["stop"]).await
    }

    async fn current_song(&mut self) -> RadioResult<SongInfo> {
        let text = self
            .mpc(&["current", "-f", "%artist%\t%album%\t%title%\t%file%"])
            .await?;
        Ok(parse_current(&text))
    }

    async fn status(&mut self) -> RadioResult<PlayerStatus> {
        let text = self.mpc(&["status"]).await?;
        Ok(parse_status(&text))
    }

    async fn disconnect(&mut self) -> RadioResult<()> {
        // Every mpc call is its own connection; nothing stays open.
        self.connected = false;
        info!(server = self.id, "disconnected");
        Ok(())
    }
}

/// One `mpc` invocation against a server
async fn run_mpc(server: usize, host: &str, port: u16, args: &[&str]) -> RadioResult<String> {
    debug!(server, command = %args.join(" "), "mpc");
    let output = Command::new("mpc")
        .arg("--host")
        .arg(host)
        .arg("--port")
        .arg(port.to_string())
        .args(args)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RadioError::BackendUnreachable {
                server,
                reason: "mpc is not installed".to_string(),
            },
            _ => RadioError::ConnectionLost {
                server,
                reason: e.to_string(),
            },
        })?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_failure(server, &args.join(" "), &stderr))
}

/// Poll `check` until it succeeds, sleeping `backoff` after every lost
/// connection. Any other failure ends the wait.
pub async fn retry_while_lost<F, Fut>(server: usize, backoff: Duration, mut check: F) -> RadioResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RadioResult<()>>,
{
    loop {
        match check().await {
            Ok(()) => return Ok(()),
            Err(RadioError::ConnectionLost { reason, .. }) => {
                warn!(server, %reason, "lost connection, reconnecting");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sort an mpc failure into the error taxonomy
pub fn classify_failure(server: usize, command: &str, stderr: &str) -> RadioError {
    let reason = stderr.trim().trim_start_matches("MPD error:").trim().to_string();
    let lower = reason.to_lowercase();
    let unreachable = ["name or service not known", "unknown host", "failed to resolve", "no address associated"];
    let lost = ["connection refused", "timed out", "connection reset", "broken pipe", "connection closed"];

    if unreachable.iter().any(|m| lower.contains(m)) {
        RadioError::BackendUnreachable { server, reason }
    } else if lost.iter().any(|m| lower.contains(m)) {
        RadioError::ConnectionLost { server, reason }
    } else {
        RadioError::rejected(command, reason)
    }
}

fn parse_current(text: &str) -> SongInfo {
    let line = text.lines().next().unwrap_or_default();
    let mut fields = line.split('\t').map(str::to_string);
    SongInfo {
        artist: fields.next().unwrap_or_default(),
        album: fields.next().unwrap_or_default(),
        title: fields.next().unwrap_or_default(),
        file: fields.next().unwrap_or_default(),
    }
}

/// Parse `mpc status`, e.g. `[playing] #3/10   0:12/3:45 (5%)`
pub fn parse_status(text: &str) -> PlayerStatus {
    let Some(line) = text.lines().find(|l| l.starts_with('[')) else {
        return PlayerStatus {
            state: "stopped".to_string(),
            ..PlayerStatus::default()
        };
    };
    let state = line
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or_default()
        .to_string();
    let clock = line
        .split_whitespace()
        .find(|tok| tok.contains(':') && tok.contains('/'))
        .and_then(|tok| tok.split_once('/'));
    let (elapsed, duration) = match clock {
        Some((e, d)) => (parse_clock(e), parse_clock(d)),
        None => (None, None),
    };
    PlayerStatus {
        state,
        elapsed,
        duration,
    }
}

fn parse_clock(text: &str) -> Option<u32> {
    text.split(':')
        .try_fold(0u32, |acc, part| part.parse::<u32>().ok().map(|v| acc * 60 + v))
}

/// A server that only exists in memory; lets the radio run without MPD.
pub struct DryRunConnection {
    id: usize,
    playlists: HashMap<String, usize>,
    loaded: Option<String>,
    position: usize,
    output_enabled: bool,
    state: &'static str,
    elapsed: u32,
    connected: bool,
}

impl DryRunConnection {
    /// Every playlist reports `tracks` entries
    pub fn new(id: usize, playlists: impl IntoIterator<Item = String>, tracks: usize) -> Self {
        Self {
            id,
            playlists: playlists.into_iter().map(|p| (p, tracks)).collect(),
            loaded: None,
            position: 0,
            output_enabled: false,
            state: "stopped",
            elapsed: 0,
            connected: false,
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[cfg(test)]
    pub fn state(&self) -> &'static str {
        self.state
    }
}

impl PlaybackConnection for DryRunConnection {
    fn id(&self) -> usize {
        self.id
    }

    async fn ready(&mut self) -> RadioResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn clear(&mut self) -> RadioResult<()> {
        self.loaded = None;
        self.state = "stopped";
        Ok(())
    }

    async fn load(&mut self, playlist: &str) -> RadioResult<()> {
        if !self.playlists.contains_key(playlist) {
            return Err(RadioError::rejected(
                format!("load {playlist}"),
                "No such playlist",
            ));
        }
        info!(server = self.id, playlist, "dry-run load");
        self.loaded = Some(playlist.to_string());
        Ok(())
    }

    async fn set_random(&mut self, _on: bool) -> RadioResult<()> {
        Ok(())
    }

    async fn playlist_len(&mut self) -> RadioResult<usize> {
        Ok(self
            .loaded
            .as_ref()
            .and_then(|p| self.playlists.get(p).copied())
            .unwrap_or(0))
    }

    async fn enable_output(&mut self) -> RadioResult<()> {
        self.output_enabled = true;
        Ok(())
    }

    async fn disable_output(&mut self) -> RadioResult<()> {
        self.output_enabled = false;
        Ok(())
    }

    async fn play(&mut self, position: Option<usize>) -> RadioResult<()> {
        if self.loaded.is_none() {
            return Err(RadioError::rejected("play", "empty queue"));
        }
        if let Some(p) = position {
            self.position = p;
            self.elapsed = 0;
        }
        debug!(server = self.id, position = self.position, output = self.output_enabled, "dry-run play");
        self.state = "playing";
        Ok(())
    }

    async fn seek(&mut self, seconds: u32) -> RadioResult<()> {
        self.elapsed = seconds;
        Ok(())
    }

    async fn pause(&mut self) -> RadioResult<()> {
        self.state = "paused";
        Ok(())
    }

    async fn stop(&mut self) -> RadioResult<()> {
        self.state = "stopped";
        Ok(())
    }

    async fn current_song(&mut self) -> RadioResult<SongInfo> {
        let Some(playlist) = &self.loaded else {
            return Ok(SongInfo::default());
        };
        Ok(SongInfo {
            artist: "Dry Run".to_string(),
            album: playlist.clone(),
            title: format!("{playlist} #{}", self.position + 1),
            file: format!("{playlist}/{:02}.mp3", self.position + 1),
        })
    }

    async fn status(&mut self) -> RadioResult<PlayerStatus> {
        Ok(PlayerStatus {
            state: self.state.to_string(),
            elapsed: Some(self.elapsed),
            duration: Some(180),
        })
    }

    async fn disconnect(&mut self) -> RadioResult<()> {
        self.connected = false;
        info!(server = self.id, "dry-run disconnect");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_parse_playing_status() {
        let text = "Artist - Title\n[playing] #3/10   0:12/3:45 (5%)\nvolume: 80%   repeat: off\n";
        let status = parse_status(text);
        assert_eq!(status.state, "playing");
        assert_eq!(status.elapsed, Some(12));
        assert_eq!(status.duration, Some(225));
    }

    #[test]
    fn test_parse_stopped_status() {
        let status = parse_status("volume: 80%   repeat: off   random: on\n");
        assert_eq!(status.state, "stopped");
        assert_eq!(status.elapsed, None);
    }

    #[test]
    fn test_parse_long_clock() {
        assert_eq!(parse_clock("1:02:03"), Some(3723));
        assert_eq!(parse_clock("x:01"), None);
    }

    #[test]
    fn test_parse_current_song() {
        let song = parse_current("Miles Davis\tKind of Blue\tSo What\tjazz/so_what.flac\n");
        assert_eq!(song.artist, "Miles Davis");
        assert_eq!(song.title, "So What");
        assert_eq!(song.file, "jazz/so_what.flac");
        assert_eq!(parse_current(""), SongInfo::default());
    }

    #[test]
    fn test_classify_failures() {
        assert!(matches!(
            classify_failure(0, "status", "MPD error: Connection refused\n"),
            RadioError::ConnectionLost { server: 0, .. }
        ));
        assert!(matches!(
            classify_failure(1, "status", "MPD error: Name or service not known"),
            RadioError::BackendUnreachable { server: 1, .. }
        ));
        match classify_failure(0, "load nope", "MPD error: No such playlist") {
            RadioError::CommandRejected { command, reason } => {
                assert_eq!(command, "load nope");
                assert_eq!(reason, "No such playlist");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn lost() -> RadioError {
        RadioError::ConnectionLost {
            server: 0,
            reason: "Connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_rides_out_lost_connections() {
        let mut script = VecDeque::from([Err(lost()), Err(lost()), Ok(())]);
        let mut attempts = 0;
        let result = retry_while_lost(0, Duration::from_millis(1), || {
            attempts += 1;
            std::future::ready(script.pop_front().unwrap_or(Ok(())))
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_stops_when_unreachable() {
        let mut script = VecDeque::from([
            Err(lost()),
            Err(RadioError::BackendUnreachable {
                server: 0,
                reason: "Name or service not known".to_string(),
            }),
            Ok(()),
        ]);
        let mut attempts = 0;
        let result = retry_while_lost(0, Duration::from_millis(1), || {
            attempts += 1;
            std::future::ready(script.pop_front().unwrap_or(Ok(())))
        })
        .await;
        assert!(matches!(result, Err(RadioError::BackendUnreachable { server: 0, .. })));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_rejected_commands() {
        let mut attempts = 0;
        let result = retry_while_lost(0, Duration::from_millis(1), || {
            attempts += 1;
            std::future::ready(Err(RadioError::rejected("status", "bad")))
        })
        .await;
        assert!(matches!(result, Err(RadioError::CommandRejected { .. })));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_dry_run_connection_plays_loaded_playlist() {
        let mut conn = DryRunConnection::new(0, vec!["jazz".to_string()], 5);
        assert!(conn.play(None).await.is_err());
        assert!(conn.load("rock").await.is_err());
        conn.load("jazz").await.unwrap();
        assert_eq!(conn.playlist_len().await.unwrap(), 5);
        conn.enable_output().await.unwrap();
        conn.play(Some(2)).await.unwrap();
        assert!(conn.output_enabled);
        assert_eq!(conn.current_song().await.unwrap().title, "jazz #3");
        assert_eq!(conn.status().await.unwrap().state, "playing");
    }
}
