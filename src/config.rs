//! Configuration parsing and validation

use crate::constants;
use crate::dial::DialCalibration;
use crate::error::{RadioError, RadioResult};
use crate::station::{PlayStrategy, Station};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Command line arguments for the radiodial application
#[derive(Parser)]
#[command(name = "radiodial")]
#[command(about = "Two-knob network radio controller")]
pub struct Args {
    /// Path to the radio configuration file
    #[arg(long, global = true, default_value = "radiodial.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the radio from the hardware pots
    Run(RunArgs),
    /// Run the radio from the keyboard, with the dial view in the terminal
    Simulate(SimulateArgs),
    /// Print the calibrated dial
    Stations(StationsArgs),
    /// Send a single command to an LED
    Led(LedArgs),
}

/// Settings that override the configuration file
#[derive(ClapArgs, Default)]
pub struct Overrides {
    /// Main loop tick in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Log level filter (e.g., "debug")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Show the live dial view in the terminal
    #[arg(long)]
    pub show_dial: bool,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Parser)]
pub struct SimulateArgs {
    /// Use in-memory playback servers instead of MPD
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Parser)]
pub struct StationsArgs {
    /// Choose a station interactively and print its tuning window
    #[arg(long)]
    pub pick: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LedChannel {
    Dial,
    Power,
}

#[derive(Parser)]
pub struct LedArgs {
    /// Which LED to drive
    #[arg(value_enum)]
    pub channel: LedChannel,

    /// Command, e.g. "blink" or "adjust_brightness:0.5"
    pub command: String,
}

/// Dial layout along the tuning pot
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    /// Sensor span
    pub full_range: f64,
    /// Readings below this are unreliable and hold no station
    pub cutoff_bottom: Option<f64>,
    /// Readings above this are unreliable and hold no station
    pub cutoff_top: Option<f64>,
    /// Gap width as a multiple of the station radius
    pub gap_factor: f64,
    /// Weight of the newest tuning reading
    pub tuning_smoothing: f64,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            full_range: constants::sensor::FULL_RANGE,
            cutoff_bottom: None,
            cutoff_top: None,
            gap_factor: constants::dial::GAP_FACTOR,
            tuning_smoothing: constants::dial::TUNING_SMOOTHING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Weight of the newest volume reading
    pub smoothing: f64,
    /// Knob volume (sensor units) at or below which the power-off timer runs
    pub low_tolerance: f64,
    /// Seconds of low volume before powering off
    pub power_off_secs: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            smoothing: constants::volume::SMOOTHING,
            low_tolerance: constants::volume::LOW_VOL_TOLERANCE,
            power_off_secs: constants::volume::TIME_FOR_POWER_OFF_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub iio_device: PathBuf,
    pub volume_channel: u8,
    pub tuning_channel: u8,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            iio_device: PathBuf::from(constants::sensor::IIO_DEVICE),
            volume_channel: constants::sensor::VOLUME_CHANNEL,
            tuning_channel: constants::sensor::TUNING_CHANNEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    /// sysfs PWM directory of the dial LED, e.g. /sys/class/pwm/pwmchip0/pwm0
    pub dial_pwm: Option<PathBuf>,
    /// sysfs PWM directory of the power LED
    pub power_pwm: Option<PathBuf>,
    pub pwm_period_ns: u64,
    /// Duty cycle (percent) of a lit LED
    pub duty_cycle: f64,
    /// Duty cycle (percent) of the dial LED while untuned
    pub min_duty: f64,
    /// Out of 10, how often the power LED flickers
    pub flicker_freq: u32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            dial_pwm: None,
            power_pwm: None,
            pwm_period_ns: constants::led::PWM_PERIOD_NS,
            duty_cycle: constants::led::DUTY_CYCLE,
            min_duty: constants::led::MIN_DUTY,
            flicker_freq: constants::led::FLICKER_FREQ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Shell command setting the OS volume; `{volume}` becomes a percentage.
    /// An empty string only logs the volume.
    pub mixer_command: Option<String>,
    /// Shell command run once the low-volume timer fires. An empty string
    /// disables powering off.
    pub shutdown_command: Option<String>,
}

impl SystemConfig {
    pub fn mixer(&self) -> Option<&str> {
        non_empty(self.mixer_command.as_deref())
    }

    pub fn shutdown(&self) -> Option<&str> {
        non_empty(self.shutdown_command.as_deref())
    }
}

fn non_empty(command: Option<&str>) -> Option<&str> {
    command.map(str::trim).filter(|c| !c.is_empty())
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            mixer_command: Some(constants::system::MIXER_COMMAND.to_string()),
            shutdown_command: Some(constants::system::SHUTDOWN_COMMAND.to_string()),
        }
    }
}

/// One MPD playback server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// MPD output id (as numbered by `mpc outputs`)
    #[serde(default = "default_output")]
    pub output: u32,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    constants::control::MPD_PORT
}

fn default_output() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationConfig {
    pub name: String,
    /// Stored playlist to load; defaults to the station name
    pub playlist: Option<String>,
    #[serde(default)]
    pub randomize: bool,
    #[serde(default)]
    pub strategy: PlayStrategy,
}

/// Application configuration, read from TOML and refined by the command line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub tick_ms: u64,
    pub show_dial: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub dial: DialConfig,
    pub volume: VolumeConfig,
    pub sensors: SensorConfig,
    pub led: LedConfig,
    pub system: SystemConfig,
    pub servers: Vec<ServerConfig>,
    pub stations: Vec<StationConfig>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tick_ms: constants::control::TICK_MS,
            show_dial: false,
            log_level: "info".to_string(),
            log_file: None,
            dial: DialConfig::default(),
            volume: VolumeConfig::default(),
            sensors: SensorConfig::default(),
            led: LedConfig::default(),
            system: SystemConfig::default(),
            servers: vec![ServerConfig {
                host: default_host(),
                port: default_port(),
                output: default_output(),
            }],
            stations: Vec::new(),
        }
    }
}

impl RadioConfig {
    /// Read and validate a configuration file
    pub fn from_file(path: &Path) -> RadioResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RadioError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> RadioResult<Self> {
        let config: RadioConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides and re-validate
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> RadioResult<()> {
        if let Some(tick_ms) = overrides.tick_ms {
            self.tick_ms = tick_ms;
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
        if let Some(file) = &overrides.log_file {
            self.log_file = Some(file.clone());
        }
        self.validate()
    }

    pub fn validate(&self) -> RadioResult<()> {
        if self.stations.is_empty() {
            return invalid("at least one station must be configured".to_string());
        }
        if self.servers.is_empty() {
            return invalid("at least one playback server must be configured".to_string());
        }
        if self.tick_ms == 0 {
            return invalid("tick_ms must be positive".to_string());
        }
        for (label, factor) in [
            ("dial.tuning_smoothing", self.dial.tuning_smoothing),
            ("volume.smoothing", self.volume.smoothing),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return invalid(format!("{label} must be in (0, 1], got {factor}"));
            }
        }
        if !(self.dial.full_range > 0.0) {
            return invalid(format!(
                "dial.full_range must be positive, got {}",
                self.dial.full_range
            ));
        }
        for (label, duty) in [
            ("led.min_duty", self.led.min_duty),
            ("led.duty_cycle", self.led.duty_cycle),
        ] {
            if !(0.0..=100.0).contains(&duty) {
                return invalid(format!("{label} must be within 0..=100, got {duty}"));
            }
        }
        if let Some(station) = self.stations.iter().find(|s| s.name.trim().is_empty()) {
            return invalid(format!("station with empty name: {station:?}"));
        }
        // Calibration rejects bad gap factors and cutoffs
        DialCalibration::calibrate(self.stations.len(), &self.dial)?;
        Ok(())
    }

    /// Calibrate the dial and build the station list
    pub fn build_dial(&self) -> RadioResult<(DialCalibration, Vec<Station>)> {
        let dial = DialCalibration::calibrate(self.stations.len(), &self.dial)?;
        let stations = self
            .stations
            .iter()
            .zip(dial.frequencies())
            .enumerate()
            .map(|(id, (st, &frequency))| Station {
                id,
                name: st.name.clone(),
                playlist: st.playlist.clone().unwrap_or_else(|| st.name.clone()),
                randomize: st.randomize,
                strategy: st.strategy,
                frequency,
            })
            .collect();
        Ok((dial, stations))
    }

    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms)
    }
}

fn invalid(msg: String) -> RadioResult<()> {
    Err(RadioError::ConfigInvalid(msg))
}
