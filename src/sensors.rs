//! Pot sources: the board's ADC through sysfs, or the keyboard

use crate::error::{RadioError, RadioResult};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Anything that can report a raw pot value (0-1023) for an ADC channel
pub trait SensorSource {
    fn read_raw(&mut self, channel: u8) -> RadioResult<u16>;
}

/// Reads an ADC exposed by the kernel IIO subsystem
/// (`<device>/in_voltage<N>_raw`).
pub struct SysfsAdc {
    device: PathBuf,
    max: u16,
}

impl SysfsAdc {
    pub fn new(device: impl Into<PathBuf>, full_range: f64) -> Self {
        Self {
            device: device.into(),
            max: full_range as u16,
        }
    }

    fn channel_path(&self, channel: u8) -> PathBuf {
        self.device.join(format!("in_voltage{channel}_raw"))
    }
}

impl SensorSource for SysfsAdc {
    fn read_raw(&mut self, channel: u8) -> RadioResult<u16> {
        let path = self.channel_path(channel);
        let text = std::fs::read_to_string(&path).map_err(|e| RadioError::SensorRead {
            channel,
            reason: format!("{}: {e}", path.display()),
        })?;
        let value: u16 = text.trim().parse().map_err(|e| RadioError::SensorRead {
            channel,
            reason: format!("bad reading {:?}: {e}", text.trim()),
        })?;
        Ok(value.min(self.max))
    }
}

/// Two virtual pots turned with the arrow keys.
///
/// ←/→ tune, ↑/↓ change volume, Esc, q or Ctrl-C cancel `quit`.
pub struct KeyboardPots {
    volume_channel: u8,
    tuning_channel: u8,
    volume: f64,
    tuning: f64,
    step: f64,
    full_range: f64,
    quit: CancellationToken,
}

impl KeyboardPots {
    pub fn new(
        volume_channel: u8,
        tuning_channel: u8,
        full_range: f64,
        step: f64,
        quit: CancellationToken,
    ) -> Self {
        Self {
            volume_channel,
            tuning_channel,
            volume: full_range / 2.0,
            tuning: full_range / 2.0,
            step,
            full_range,
            quit,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Left => self.tuning = (self.tuning - self.step).max(0.0),
            KeyCode::Right => self.tuning = (self.tuning + self.step).min(self.full_range),
            KeyCode::Down => self.volume = (self.volume - self.step).max(0.0),
            KeyCode::Up => self.volume = (self.volume + self.step).min(self.full_range),
            KeyCode::Esc | KeyCode::Char('q') => self.quit.cancel(),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.quit.cancel()
            }
            _ => {}
        }
    }

    fn drain_events(&mut self) -> std::io::Result<()> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()?
                && key.kind != KeyEventKind::Release
            {
                self.handle_key(key);
            }
        }
        Ok(())
    }
}

impl SensorSource for KeyboardPots {
    fn read_raw(&mut self, channel: u8) -> RadioResult<u16> {
        self.drain_events().map_err(|e| RadioError::SensorRead {
            channel,
            reason: e.to_string(),
        })?;
        if channel == self.volume_channel {
            Ok(self.volume.round() as u16)
        } else if channel == self.tuning_channel {
            Ok(self.tuning.round() as u16)
        } else {
            Err(RadioError::SensorRead {
                channel,
                reason: "no keyboard pot on this channel".to_string(),
            })
        }
    }
}
