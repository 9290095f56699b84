//! Control loop: pots in, station switches and notifications out

use crate::backend::{BackendQuery, PlaybackConnection, PlayerStatus, QueryReply, SongInfo};
use crate::config::RadioConfig;
use crate::constants;
use crate::dial::{DialCalibration, TuningEvent, TuningResolver, volume_falloff};
use crate::display::{NowPlaying, StatusDisplay};
use crate::error::{RadioError, RadioResult};
use crate::led::{LedCommand, LedHandle};
use crate::scheduler::StationScheduler;
use crate::sensors::SensorSource;
use crate::smoothing::PotReader;
use crate::state::{DebugSnapshot, ShutdownTimer};
use crate::system::{Mixer, PowerOff};
use crate::volume::VolumeResolver;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exit codes for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// The low-volume timer fired and the radio powered off
    Success = 0,
    UserExit = 1, // Ctrl-C, SIGTERM, Esc or q
    Error = 2,
}

/// Result type that includes user exit information
pub type AppRunResult = Result<(), RadioError>;

/// Extended result that tracks exit reason
pub struct RunResult {
    pub result: AppRunResult,
    pub exit_code: ExitCode,
}

/// Everything the loop talks to besides the playback servers
pub struct Collaborators {
    pub sensors: Box<dyn SensorSource>,
    pub display: Box<dyn StatusDisplay>,
    pub dial_led: LedHandle,
    pub power_led: LedHandle,
    pub mixer: Mixer,
    pub power_off: PowerOff,
}

pub struct ControlLoop<C: PlaybackConnection> {
    volume_pot: PotReader,
    tuning_pot: PotReader,
    volume: VolumeResolver,
    tuning: TuningResolver,
    scheduler: StationScheduler<C>,
    timer: ShutdownTimer,
    io: Collaborators,
    tick: Duration,
    show_dial: bool,
    quit: CancellationToken,
}

impl<C: PlaybackConnection> ControlLoop<C> {
    pub fn new(
        config: &RadioConfig,
        dial: DialCalibration,
        scheduler: StationScheduler<C>,
        io: Collaborators,
        quit: CancellationToken,
    ) -> Self {
        let initial = constants::sensor::INITIAL_READING;
        Self {
            volume_pot: PotReader::new(config.sensors.volume_channel, config.volume.smoothing, initial),
            tuning_pot: PotReader::new(config.sensors.tuning_channel, config.dial.tuning_smoothing, initial),
            volume: VolumeResolver::new(),
            tuning: TuningResolver::new(dial),
            scheduler,
            timer: ShutdownTimer::new(
                config.volume.low_tolerance,
                Duration::from_secs(config.volume.power_off_secs),
            ),
            io,
            tick: config.tick(),
            show_dial: config.show_dial,
            quit,
        }
    }

    /// Run until the user quits, the low-volume timer fires, or a fatal
    /// error occurs. Cleanup runs in every case.
    pub async fn run(mut self) -> RunResult {
        if let Err(e) = self.startup().await {
            error!(error = %e, "startup failed");
            self.cleanup(false).await;
            return RunResult {
                result: Err(e),
                exit_code: ExitCode::Error,
            };
        }

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            if self.quit.is_cancelled() {
                info!("quit requested");
                break Ok(ExitCode::UserExit);
            }
            match self.tick().await {
                Ok(true) => break Ok(ExitCode::Success),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.quit.cancelled() => {}
            }
        };

        let power_off = matches!(outcome, Ok(ExitCode::Success));
        self.cleanup(power_off).await;

        match outcome {
            Ok(exit_code) => RunResult {
                result: Ok(()),
                exit_code,
            },
            Err(e) => {
                error!(error = %e, "control loop stopped");
                RunResult {
                    result: Err(e),
                    exit_code: ExitCode::Error,
                }
            }
        }
    }

    async fn startup(&mut self) -> RadioResult<()> {
        info!(
            stations = self.scheduler.stations().len(),
            servers = self.scheduler.servers().len(),
            radius = self.tuning.dial().radius(),
            "starting radio"
        );
        self.io.power_led.send(LedCommand::Flicker);
        self.io.dial_led.send(LedCommand::FadeUp);
        self.io.dial_led.send(LedCommand::WaitForDone);

        tokio::select! {
            ready = self.scheduler.ready_all() => ready,
            _ = self.quit.cancelled() => Ok(()),
        }
    }

    async fn cleanup(&mut self, power_off: bool) {
        debug!(power_off, "cleaning up");
        self.io.power_led.send(LedCommand::Blink);
        self.io.power_led.send(LedCommand::WaitForDone);
        self.io.power_led.send(LedCommand::Quit);
        self.io.dial_led.send(LedCommand::Off);
        self.io.dial_led.send(LedCommand::Quit);

        self.scheduler.shutdown().await;

        if power_off {
            self.io.power_off.run().await;
        }
        info!("cleanup done");
    }

    /// One poll of both pots. Returns true once the radio should power off.
    async fn tick(&mut self) -> RadioResult<bool> {
        match self.volume_pot.read(self.io.sensors.as_mut()) {
            Ok(reading) => {
                if let Some(event) = self.volume.update(reading) {
                    debug!(level = event.level, percent = event.effective_percent, "volume change");
                    self.apply_volume(event.effective_percent).await;
                    self.timer.observe(self.volume.raw_volume(), Instant::now());
                }
            }
            Err(e) => warn!(error = %e, last = self.volume_pot.last(), "volume read failed"),
        }
        if self.timer.is_expired(Instant::now()) {
            info!("volume low; shutting down");
            return Ok(true);
        }

        match self.tuning_pot.read(self.io.sensors.as_mut()) {
            Ok(reading) => {
                if let Some(event) = self.tuning.update(reading) {
                    self.on_tuning(event).await?;
                }
            }
            Err(e) => warn!(error = %e, last = self.tuning_pot.last(), "tuning read failed"),
        }

        if self.show_dial {
            let snapshot = DebugSnapshot::capture(
                &self.volume,
                &self.tuning,
                &self.scheduler,
                &self.timer,
                Instant::now(),
            );
            self.io.display.update_debug_view(&snapshot).or_else(log_unless_fatal)?;
        }
        Ok(false)
    }

    async fn on_tuning(&mut self, event: TuningEvent) -> RadioResult<()> {
        let cap = match self.tuning.distance() {
            Some(distance) => volume_falloff(distance, self.tuning.dial().radius()),
            None => 0.0,
        };
        self.volume.set_cap_factor(cap);
        debug!(tuning = event.tuning, tuned = self.tuning.is_tuned(), cap, "tuning change");
        self.apply_volume(self.volume.effective_percent()).await;
        self.io.dial_led.send(LedCommand::AdjustBrightness(self.volume.cap_factor()));

        if !event.is_new_station {
            return Ok(());
        }
        match event.station {
            Some(station) => self.switch_to(station).await,
            None => {
                debug!(previous = ?event.previous, tuning = event.tuning, "tuned off station");
                Ok(())
            }
        }
    }

    async fn switch_to(&mut self, station: usize) -> RadioResult<()> {
        if let Err(e) = self.scheduler.activate(station).await {
            // Retried naturally on the next tuning event
            return log_unless_fatal(e);
        }
        if let Some(side) = self.tuning.side() {
            match self.scheduler.speculative_preload(side).await {
                Ok(Some(preloaded)) => debug!(station, preloaded, "speculative preload"),
                Ok(None) => {}
                Err(e) => log_unless_fatal(e)?,
            }
        }
        self.refresh_now_playing().await
    }

    async fn refresh_now_playing(&mut self) -> RadioResult<()> {
        let song = match self.scheduler.query_active(BackendQuery::CurrentSong).await {
            Ok(QueryReply::Song(song)) => song,
            Ok(_) => SongInfo::default(),
            Err(e) => return log_unless_fatal(e),
        };
        let status = match self.scheduler.query_active(BackendQuery::Status).await {
            Ok(QueryReply::Status(status)) => status,
            Ok(_) => PlayerStatus::default(),
            Err(e) => return log_unless_fatal(e),
        };
        let now_playing = NowPlaying::new(song, &status);
        self.io.display.update_now_playing(&now_playing).or_else(log_unless_fatal)
    }

    async fn apply_volume(&mut self, percent: u8) {
        if let Err(e) = self.io.mixer.set_volume(percent).await {
            warn!(percent, error = %e, "could not set system volume");
        }
    }
}

fn log_unless_fatal(e: RadioError) -> RadioResult<()> {
    if e.is_fatal() {
        Err(e)
    } else {
        warn!(error = %e, "operation not applied");
        Ok(())
    }
}
