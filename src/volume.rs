//! Volume knob resolution: quantized levels and the tuning-distance cap

use crate::constants::dial::VOLUME_STEP;

/// Emitted when the volume knob crosses into a new percent bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeEvent {
    pub raw_volume: f64,
    pub level: i32,
    pub effective_percent: u8,
}

/// Tracks the knob volume and the cap imposed by tuning distance.
///
/// The knob value is stored as read even while the cap limits it.
#[derive(Debug, Clone)]
pub struct VolumeResolver {
    raw_volume: f64,
    level: Option<i32>,
    cap_factor: f64,
}

impl Default for VolumeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeResolver {
    /// Starts silent: the cap stays at 0 until a station is tuned.
    pub fn new() -> Self {
        Self {
            raw_volume: 0.0,
            level: None,
            cap_factor: 0.0,
        }
    }

    /// Map a raw reading (0-1023) to its percent bucket
    pub fn quantize(raw: f64) -> i32 {
        (raw / VOLUME_STEP).round() as i32
    }

    /// Feed a smoothed reading. Only a change of bucket is accepted.
    pub fn update(&mut self, reading: f64) -> Option<VolumeEvent> {
        let level = Self::quantize(reading);
        if self.level == Some(level) {
            return None;
        }
        self.level = Some(level);
        self.raw_volume = reading;
        Some(VolumeEvent {
            raw_volume: reading,
            level,
            effective_percent: self.effective_percent(),
        })
    }

    /// Set the cap from tuning distance; clamped to `[0, 1]`.
    pub fn set_cap_factor(&mut self, factor: f64) {
        self.cap_factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn cap_factor(&self) -> f64 {
        self.cap_factor
    }

    /// The knob volume, in sensor units
    pub fn raw_volume(&self) -> f64 {
        self.raw_volume
    }

    pub fn level(&self) -> i32 {
        self.level.unwrap_or(0)
    }

    /// The cap, in sensor units
    pub fn volume_cap(&self) -> f64 {
        self.cap_factor * self.raw_volume
    }

    /// The knob volume limited by the cap
    pub fn effective_volume(&self) -> f64 {
        self.raw_volume.min(self.volume_cap())
    }

    /// Effective volume as the percentage handed to the mixer
    pub fn effective_percent(&self) -> u8 {
        Self::quantize(self.effective_volume()).clamp(0, 100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_bucket_emits_once() {
        let mut v = VolumeResolver::new();
        let events: Vec<_> = [500.0, 503.0, 505.0]
            .into_iter()
            .filter_map(|r| v.update(r))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, 49);
        assert_eq!(v.raw_volume(), 500.0);
    }

    #[test]
    fn test_bucket_crossing_emits_again() {
        let mut v = VolumeResolver::new();
        assert!(v.update(500.0).is_some());
        assert!(v.update(505.0).is_none());
        let ev = v.update(522.0).unwrap();
        assert_eq!(ev.level, 51);
        assert_eq!(v.raw_volume(), 522.0);
    }

    #[test]
    fn test_cap_limits_effective_volume() {
        let mut v = VolumeResolver::new();
        v.update(1023.0);
        assert_eq!(v.effective_percent(), 0);
        v.set_cap_factor(1.0);
        assert_eq!(v.effective_percent(), 100);
        v.set_cap_factor(0.5);
        assert_eq!(v.effective_percent(), 50);
        v.set_cap_factor(7.0);
        assert_eq!(v.cap_factor(), 1.0);
        v.set_cap_factor(f64::NAN);
        assert_eq!(v.cap_factor(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_effective_never_exceeds_raw(raw in 0.0f64..=1023.0, cap in 0.0f64..=1.0) {
            let mut v = VolumeResolver::new();
            v.update(raw);
            v.set_cap_factor(cap);
            prop_assert!(v.effective_volume() <= v.raw_volume());
            prop_assert!(v.effective_percent() <= 100);
        }
    }
}
