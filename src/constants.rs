//! Application constants and configuration defaults

/// Sensor (pot) constants
pub mod sensor {
    /// Highest value a 10-bit ADC reports
    pub const FULL_RANGE: f64 = 1023.0;
    /// Pots start out reading halfway around
    pub const INITIAL_READING: f64 = 512.0;
    /// Default ADC channel of the volume pot
    pub const VOLUME_CHANNEL: u8 = 2;
    /// Default ADC channel of the tuning pot
    pub const TUNING_CHANNEL: u8 = 1;
    /// Default sysfs IIO device exposing the ADC
    pub const IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device0";
}

/// Dial calibration constants
pub mod dial {
    /// Gap width as a multiple of the station radius
    pub const GAP_FACTOR: f64 = 1.18;
    /// The tuning pot is read without smoothing
    pub const TUNING_SMOOTHING: f64 = 1.0;
    /// Raw reading to volume-percent divisor (1024 / 100)
    pub const VOLUME_STEP: f64 = 10.24;
}

/// Volume and power-off constants
pub mod volume {
    /// Weight of the newest volume reading
    pub const SMOOTHING: f64 = 0.9;
    /// Knob volume (sensor units) at or below which the power-off timer runs
    pub const LOW_VOL_TOLERANCE: f64 = 10.0;
    /// Seconds the knob must stay low before the system powers off
    pub const TIME_FOR_POWER_OFF_SECS: u64 = 10;
}

/// Control loop constants
pub mod control {
    /// Tick interval in milliseconds
    pub const TICK_MS: u64 = 200;
    /// Backoff between backend reconnect attempts
    pub const RECONNECT_BACKOFF_MS: u64 = 1000;
    /// Default MPD port
    pub const MPD_PORT: u16 = 6600;
}

/// LED constants
pub mod led {
    /// Minimum duty cycle (percent) while untuned
    pub const MIN_DUTY: f64 = 1.0;
    /// Default duty cycle (percent) of a lit LED
    pub const DUTY_CYCLE: f64 = 30.0;
    /// Fade-up logistic ramp: starting value (larger = slower)
    pub const RAMP_START: f64 = 8.0;
    /// Fade-up logistic ramp: rate (larger = slower)
    pub const RAMP_RATE: f64 = 12.0;
    /// Fade-up stops once the ramp divisor drops to this
    pub const RAMP_CUTOFF: f64 = 1.1;
    /// Out of 10, how often the power LED flickers
    pub const FLICKER_FREQ: u32 = 1;
    /// PWM period written to sysfs (50 Hz)
    pub const PWM_PERIOD_NS: u64 = 20_000_000;
}

/// System command defaults
pub mod system {
    /// Sets the OS mixer; `{volume}` is replaced by a percentage
    pub const MIXER_COMMAND: &str = "amixer cset numid=1 -- {volume}% > /dev/null";
    /// Powers the board off
    pub const SHUTDOWN_COMMAND: &str = "sudo shutdown -h now";
}

/// UI display constants
pub mod ui {
    /// Bar width calculation accounts for borders
    pub const BAR_BORDER_WIDTH: usize = 2;
    /// Sensor units one key press moves a simulated pot
    pub const KEY_STEP: f64 = 8.0;
}
