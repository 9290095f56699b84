//! Pot reading smoothing utilities

use crate::error::RadioResult;
use crate::sensors::SensorSource;

/// Exponential moving average over raw pot readings
#[derive(Debug, Clone)]
pub struct Smoother {
    factor: f64,
    value: f64,
}

impl Smoother {
    /// Create a smoother; `factor` is the weight of the newest reading
    /// (1 = ignore history, values near 0 = barely move).
    pub fn new(factor: f64, initial_value: f64) -> Self {
        Self {
            factor: factor.clamp(f64::MIN_POSITIVE, 1.0),
            value: initial_value,
        }
    }

    /// Feed a raw reading and return the smoothed value, truncated to whole
    /// sensor units.
    pub fn update(&mut self, raw_value: f64) -> f64 {
        self.value = (self.factor * raw_value + (1.0 - self.factor) * self.value).trunc();
        self.value
    }

    /// Get the current smoothed value
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// One pot on one ADC channel, with its own smoother
#[derive(Debug, Clone)]
pub struct PotReader {
    channel: u8,
    smoother: Smoother,
}

impl PotReader {
    pub fn new(channel: u8, smoothing: f64, initial_value: f64) -> Self {
        Self {
            channel,
            smoother: Smoother::new(smoothing, initial_value),
        }
    }

    /// Read the pot and return the smoothed value. A failed read leaves the
    /// smoother untouched.
    pub fn read(&mut self, sensors: &mut dyn SensorSource) -> RadioResult<f64> {
        let raw = sensors.read_raw(self.channel)?;
        Ok(self.smoother.update(f64::from(raw)))
    }

    pub fn last(&self) -> f64 {
        self.smoother.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;

    struct Scripted(Vec<RadioResult<u16>>);

    impl SensorSource for Scripted {
        fn read_raw(&mut self, _channel: u8) -> RadioResult<u16> {
            self.0.remove(0)
        }
    }

    #[test]
    fn test_full_factor_tracks_raw() {
        let mut s = Smoother::new(1.0, 512.0);
        assert_eq!(s.update(100.0), 100.0);
        assert_eq!(s.update(900.4), 900.0);
    }

    #[test]
    fn test_partial_factor_converges() {
        let mut s = Smoother::new(0.9, 512.0);
        let first = s.update(0.0);
        assert_eq!(first, 51.0);
        for _ in 0..10 {
            s.update(0.0);
        }
        assert_eq!(s.value(), 0.0);
    }

    #[test]
    fn test_failed_read_keeps_last_value() {
        let mut pot = PotReader::new(1, 1.0, 512.0);
        let mut sensors = Scripted(vec![
            Ok(300),
            Err(RadioError::SensorRead {
                channel: 1,
                reason: "busy".into(),
            }),
        ]);
        assert_eq!(pot.read(&mut sensors).unwrap(), 300.0);
        assert!(pot.read(&mut sensors).is_err());
        assert_eq!(pot.last(), 300.0);
    }
}
