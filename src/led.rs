//! LED service: a closed set of commands, one effect slot per LED
//!
//! Each LED runs as its own task fed by a channel, so commands to one LED are
//! applied in the order they were sent. A new command cancels whatever effect
//! is running, except `WaitForDone`, which lets the effect finish first.

use crate::config::LedConfig;
use crate::error::{RadioError, RadioResult};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const FLICKER_STEP: Duration = Duration::from_millis(100);
const BLINK_HALF_PERIOD: Duration = Duration::from_millis(500);
const BLINK_COUNT: usize = 2;
const FADE_UP_STEP: Duration = Duration::from_millis(100);
const FADE_DOWN_STEP: Duration = Duration::from_millis(200);
const FADE_DOWN_DELTA: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedCommand {
    On,
    Off,
    Flicker,
    Blink,
    FadeUp,
    FadeDown,
    /// Brightness as a fraction of the lit duty cycle; 0 dims to the minimum
    AdjustBrightness(f64),
    WaitForDone,
    Quit,
}

impl LedCommand {
    /// Effects that only stop when replaced
    pub fn is_endless(self) -> bool {
        matches!(self, LedCommand::Flicker)
    }
}

impl FromStr for LedCommand {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, payload) = match s.trim().split_once(':') {
            Some((tag, payload)) => (tag, Some(payload)),
            None => (s.trim(), None),
        };
        let command = match tag {
            "on" => LedCommand::On,
            "off" => LedCommand::Off,
            "flicker" => LedCommand::Flicker,
            "blink" => LedCommand::Blink,
            "fade_up" => LedCommand::FadeUp,
            "fade_down" => LedCommand::FadeDown,
            "wait_for_done" => LedCommand::WaitForDone,
            "quit" => LedCommand::Quit,
            "adjust_brightness" => {
                let payload = payload
                    .ok_or_else(|| RadioError::rejected(s, "adjust_brightness needs a level"))?;
                let level: f64 = payload
                    .trim()
                    .parse()
                    .map_err(|e| RadioError::rejected(s, format!("bad level: {e}")))?;
                if !(0.0..=1.0).contains(&level) {
                    return Err(RadioError::rejected(s, "level must be within 0 and 1"));
                }
                return Ok(LedCommand::AdjustBrightness(level));
            }
            _ => return Err(RadioError::rejected(s, "unknown LED command")),
        };
        match payload {
            Some(_) => Err(RadioError::rejected(s, format!("{tag} takes no argument"))),
            None => Ok(command),
        }
    }
}

impl fmt::Display for LedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedCommand::On => write!(f, "on"),
            LedCommand::Off => write!(f, "off"),
            LedCommand::Flicker => write!(f, "flicker"),
            LedCommand::Blink => write!(f, "blink"),
            LedCommand::FadeUp => write!(f, "fade_up"),
            LedCommand::FadeDown => write!(f, "fade_down"),
            LedCommand::AdjustBrightness(level) => write!(f, "adjust_brightness:{level}"),
            LedCommand::WaitForDone => write!(f, "wait_for_done"),
            LedCommand::Quit => write!(f, "quit"),
        }
    }
}

/// Something that can hold an LED at a duty cycle (percent)
pub trait LedDriver: Send + 'static {
    fn set_duty(&mut self, percent: f64) -> RadioResult<()>;
}

/// A PWM channel exported through `/sys/class/pwm`
pub struct SysfsPwmLed {
    dir: PathBuf,
    period_ns: u64,
}

impl SysfsPwmLed {
    /// Program the period and enable the channel
    pub fn open(dir: impl Into<PathBuf>, period_ns: u64) -> RadioResult<Self> {
        let led = Self {
            dir: dir.into(),
            period_ns,
        };
        led.write("period", &period_ns.to_string())?;
        led.write("duty_cycle", "0")?;
        led.write("enable", "1")?;
        Ok(led)
    }

    fn write(&self, file: &str, value: &str) -> RadioResult<()> {
        std::fs::write(self.dir.join(file), value)?;
        Ok(())
    }
}

impl LedDriver for SysfsPwmLed {
    fn set_duty(&mut self, percent: f64) -> RadioResult<()> {
        let duty = (self.period_ns as f64 * percent.clamp(0.0, 100.0) / 100.0).round() as u64;
        self.write("duty_cycle", &duty.to_string())
    }
}

/// Logs duty changes instead of driving hardware
pub struct LogLed {
    name: &'static str,
}

impl LogLed {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl LedDriver for LogLed {
    fn set_duty(&mut self, percent: f64) -> RadioResult<()> {
        debug!(led = self.name, duty = percent, "led");
        Ok(())
    }
}

/// Duty (percent) for a brightness level: the configured minimum when the
/// level is 0, otherwise a share of the lit duty cycle.
pub fn brightness_duty(level: f64, config: &LedConfig) -> f64 {
    if level <= 0.0 {
        config.min_duty
    } else {
        level.min(1.0) * config.duty_cycle
    }
}

/// Duty steps of the fade-up: a logistic ramp that stops once the divisor
/// drops to the cutoff.
pub fn fade_up_steps(duty_cycle: f64) -> Vec<f64> {
    use crate::constants::led::{RAMP_CUTOFF, RAMP_RATE, RAMP_START};

    let mut steps = Vec::new();
    let mut divisor = RAMP_CUTOFF + 1.0;
    let mut n = 0.0;
    while divisor > RAMP_CUTOFF {
        n += 1.0;
        divisor = 1.0 + (RAMP_START - n / RAMP_RATE).exp();
        steps.push(duty_cycle / divisor);
    }
    steps
}

/// Sends commands to one LED's task. Sending never blocks or fails; a
/// command for a stopped LED is logged and dropped.
#[derive(Clone)]
pub struct LedHandle {
    name: &'static str,
    tx: mpsc::UnboundedSender<LedCommand>,
}

impl LedHandle {
    pub fn send(&self, command: LedCommand) {
        if self.tx.send(command).is_err() {
            warn!(led = self.name, %command, "led service stopped; command dropped");
        }
    }

    /// A handle and the receiving end of its channel
    pub(crate) fn channel(name: &'static str) -> (Self, mpsc::UnboundedReceiver<LedCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { name, tx }, rx)
    }
}

/// Start the task driving one LED
pub fn spawn<D: LedDriver>(name: &'static str, driver: D, config: LedConfig) -> (LedHandle, JoinHandle<()>) {
    let (handle, rx) = LedHandle::channel(name);
    let service = LedService {
        name,
        driver,
        config,
        rx,
    };
    (handle, tokio::spawn(service.run()))
}

struct LedService<D> {
    name: &'static str,
    driver: D,
    config: LedConfig,
    rx: mpsc::UnboundedReceiver<LedCommand>,
}

impl<D: LedDriver> LedService<D> {
    async fn run(mut self) {
        let mut pending: Option<LedCommand> = None;
        loop {
            let command = match pending.take() {
                Some(command) => command,
                None => match self.rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };
            debug!(led = self.name, %command, "led command");
            match command {
                LedCommand::Quit => break,
                // Reached only when no effect is running
                LedCommand::WaitForDone => {}
                LedCommand::On => self.set(100.0),
                LedCommand::Off => self.set(0.0),
                LedCommand::AdjustBrightness(level) => {
                    let duty = brightness_duty(level, &self.config);
                    self.set(duty)
                }
                effect => pending = self.run_effect(effect).await,
            }
        }
        debug!(led = self.name, "led service stopped");
    }

    /// Run an effect until it finishes or the next command replaces it.
    /// Returns the command that interrupted it, if any.
    async fn run_effect(&mut self, effect: LedCommand) -> Option<LedCommand> {
        let Self {
            name,
            driver,
            config,
            rx,
        } = self;
        let fut = play_effect(effect, driver, config, *name);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                _ = &mut fut => return None,
                next = rx.recv() => match next {
                    Some(LedCommand::WaitForDone) if !effect.is_endless() => {
                        fut.as_mut().await;
                        return None;
                    }
                    // Nothing would ever end the effect
                    Some(LedCommand::WaitForDone) => continue,
                    Some(other) => return Some(other),
                    None => return Some(LedCommand::Quit),
                },
            }
        }
    }

    fn set(&mut self, duty: f64) {
        if let Err(e) = self.driver.set_duty(duty) {
            warn!(led = self.name, duty, error = %e, "led write failed");
        }
    }
}

fn play_effect<'a, D: LedDriver>(
    effect: LedCommand,
    driver: &'a mut D,
    config: &'a LedConfig,
    name: &'a str,
) -> impl Future<Output = ()> + 'a {
    async move {
        let mut set = |duty: f64| {
            if let Err(e) = driver.set_duty(duty) {
                warn!(led = name, duty, error = %e, "led write failed");
            }
        };
        match effect {
            LedCommand::Flicker => loop {
                let duty = {
                    let mut rng = rand::rng();
                    if rng.random_range(0..10) <= config.flicker_freq {
                        f64::from(rng.random_range(6..20u32) * 5)
                    } else {
                        100.0
                    }
                };
                set(duty);
                tokio::time::sleep(FLICKER_STEP).await;
            },
            LedCommand::Blink => {
                for _ in 0..BLINK_COUNT {
                    set(0.0);
                    tokio::time::sleep(BLINK_HALF_PERIOD).await;
                    set(config.duty_cycle);
                    tokio::time::sleep(BLINK_HALF_PERIOD).await;
                }
            }
            LedCommand::FadeUp => {
                for duty in fade_up_steps(config.duty_cycle) {
                    set(duty);
                    tokio::time::sleep(FADE_UP_STEP).await;
                }
            }
            LedCommand::FadeDown => {
                let mut duty = config.duty_cycle.floor();
                while duty > 0.0 {
                    set(duty);
                    tokio::time::sleep(FADE_DOWN_STEP).await;
                    duty -= FADE_DOWN_DELTA;
                }
                set(0.0);
            }
            other => debug!(led = name, command = %other, "not an effect"),
        }
    }
}
