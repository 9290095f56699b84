//! Control loop state: the low-volume power-off timer and debug snapshots

use crate::backend::PlaybackConnection;
use crate::dial::TuningResolver;
use crate::scheduler::StationScheduler;
use crate::volume::VolumeResolver;
use std::time::{Duration, Instant};
use tracing::info;

/// Runs while the knob volume stays at or below a tolerance
#[derive(Debug, Clone)]
pub struct ShutdownTimer {
    tolerance: f64,
    timeout: Duration,
    started: Option<Instant>,
}

impl ShutdownTimer {
    pub fn new(tolerance: f64, timeout: Duration) -> Self {
        Self {
            tolerance,
            timeout,
            started: None,
        }
    }

    /// Feed an accepted knob volume. A low volume starts the timer if it is
    /// not already running; anything louder resets it.
    pub fn observe(&mut self, raw_volume: f64, now: Instant) {
        if raw_volume <= self.tolerance {
            if self.started.is_none() {
                info!(raw_volume, timeout = ?self.timeout, "shutdown timer started");
                self.started = Some(now);
            }
        } else if self.started.take().is_some() {
            info!(raw_volume, "shutdown timer reset");
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.started
            .is_some_and(|start| now.saturating_duration_since(start) >= self.timeout)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.started
            .map(|start| self.timeout.saturating_sub(now.saturating_duration_since(start)))
    }
}

/// Everything the dial view shows, captured once per tick
#[derive(Debug, Clone, PartialEq)]
pub struct DebugSnapshot {
    pub level: i32,
    pub cap_level: i32,
    pub effective_percent: u8,
    pub cap_factor: f64,
    pub tuning: Option<f64>,
    pub station: Option<usize>,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub frequencies: Vec<f64>,
    pub full_range: f64,
    pub stations: Vec<StationView>,
    pub shutdown_in: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationView {
    pub name: String,
    pub server: Option<usize>,
    pub active: bool,
}

impl DebugSnapshot {
    pub fn capture<C: PlaybackConnection>(
        volume: &VolumeResolver,
        tuning: &TuningResolver,
        scheduler: &StationScheduler<C>,
        timer: &ShutdownTimer,
        now: Instant,
    ) -> Self {
        let dial = tuning.dial();
        let neighbors = tuning.tuning().map(|t| dial.neighbors(t));
        let servers = scheduler.servers();
        let stations = scheduler
            .stations()
            .iter()
            .map(|st| {
                let server = scheduler.binding(st.id);
                StationView {
                    name: st.name.clone(),
                    server,
                    active: server.is_some_and(|s| servers[s].output_enabled()),
                }
            })
            .collect();
        Self {
            level: volume.level(),
            cap_level: VolumeResolver::quantize(volume.volume_cap()),
            effective_percent: volume.effective_percent(),
            cap_factor: volume.cap_factor(),
            tuning: tuning.tuning(),
            station: tuning.station(),
            left: neighbors.and_then(|n| n.left),
            right: neighbors.and_then(|n| n.right),
            frequencies: dial.frequencies().to_vec(),
            full_range: dial.full_range(),
            stations,
            shutdown_in: timer.remaining(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DryRunConnection;
    use crate::config::DialConfig;
    use crate::dial::DialCalibration;
    use crate::station::{PlayStrategy, Station};

    #[test]
    fn test_timer_starts_once_and_resets() {
        let mut timer = ShutdownTimer::new(10.0, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(!timer.is_expired(t0));

        timer.observe(5.0, t0);
        assert!(timer.remaining(t0).is_some());
        // A second low reading does not restart the clock
        timer.observe(8.0, t0 + Duration::from_secs(6));
        assert!(!timer.is_expired(t0 + Duration::from_secs(9)));
        assert!(timer.is_expired(t0 + Duration::from_secs(10)));
        assert_eq!(timer.remaining(t0 + Duration::from_secs(4)), Some(Duration::from_secs(6)));

        timer.observe(11.0, t0 + Duration::from_secs(11));
        assert_eq!(timer.remaining(t0 + Duration::from_secs(11)), None);
        assert!(!timer.is_expired(t0 + Duration::from_secs(30)));
        assert_eq!(timer.remaining(t0), None);
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let mut timer = ShutdownTimer::new(10.0, Duration::ZERO);
        let now = Instant::now();
        timer.observe(10.0, now);
        assert!(timer.is_expired(now));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_bindings_and_tuning() {
        let dial = DialCalibration::calibrate(3, &DialConfig::default()).unwrap();
        let stations: Vec<Station> = ["a", "b", "c"]
            .iter()
            .zip(dial.frequencies())
            .enumerate()
            .map(|(id, (name, &frequency))| Station {
                id,
                name: name.to_string(),
                playlist: name.to_string(),
                randomize: false,
                strategy: PlayStrategy::Default,
                frequency,
            })
            .collect();
        let conns = vec![DryRunConnection::new(0, ["a".to_string(), "b".to_string(), "c".to_string()], 3)];
        let mut scheduler = StationScheduler::new(conns, stations);
        scheduler.activate(1).await.unwrap();

        let mut tuning = TuningResolver::new(dial);
        tuning.update(511.0);
        let mut volume = VolumeResolver::new();
        volume.update(512.0);
        volume.set_cap_factor(1.0);
        let timer = ShutdownTimer::new(10.0, Duration::from_secs(10));

        let snap = DebugSnapshot::capture(&volume, &tuning, &scheduler, &timer, Instant::now());
        assert_eq!(snap.station, Some(1));
        assert_eq!(snap.level, 50);
        assert_eq!(snap.cap_level, 50);
        assert_eq!(snap.left, Some(0));
        assert_eq!(snap.right, Some(1));
        assert_eq!(snap.stations[1].server, Some(0));
        assert!(snap.stations[1].active);
        assert!(!snap.stations[0].active);
        assert_eq!(snap.shutdown_in, None);
    }
}
