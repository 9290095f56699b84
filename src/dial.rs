//! Tuning dial: calibration of station frequencies and tuning resolution
//!
//! The dial is modelled as `S` tuned windows of width `2r` separated by `S`
//! dead gaps of width `g = gap_factor * r`, with half a gap at each end of
//! the usable range:
//!
//! ```text
//!   .5g r0r g r1r g r2r .5g
//! ```
//!
//! Solving `usable = S * (2r + g)` for `r` gives every station's center.

use crate::config::DialConfig;
use crate::error::{RadioError, RadioResult};

/// Station centers and window sizes along the pot range
#[derive(Debug, Clone, PartialEq)]
pub struct DialCalibration {
    radius: f64,
    gap: f64,
    full_range: f64,
    frequencies: Vec<f64>,
}

impl DialCalibration {
    /// Lay `stations` windows out along the usable part of the dial.
    pub fn calibrate(stations: usize, config: &DialConfig) -> RadioResult<Self> {
        if stations == 0 {
            return Err(RadioError::ConfigInvalid(
                "the dial needs at least one station".to_string(),
            ));
        }
        if !config.gap_factor.is_finite() || config.gap_factor <= 0.0 {
            return Err(RadioError::ConfigInvalid(format!(
                "gap factor must be positive, got {}",
                config.gap_factor
            )));
        }
        let bottom = config.cutoff_bottom.unwrap_or(0.0);
        let top = config.cutoff_top.unwrap_or(config.full_range);
        if !(0.0 <= bottom && bottom < top && top <= config.full_range) {
            return Err(RadioError::ConfigInvalid(format!(
                "cutoffs must satisfy 0 <= bottom < top <= {}, got {bottom}..{top}",
                config.full_range
            )));
        }

        let usable = top - bottom;
        let radius = usable / (stations as f64 * (config.gap_factor + 2.0));
        let gap = radius * config.gap_factor;
        let frequencies = (0..stations)
            .map(|i| bottom + 0.5 * gap + radius + i as f64 * (2.0 * radius + gap))
            .collect();

        Ok(Self {
            radius,
            gap,
            full_range: config.full_range,
            frequencies,
        })
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }

    pub fn full_range(&self) -> f64 {
        self.full_range
    }

    /// Station centers, ascending, indexed by station id
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn station_count(&self) -> usize {
        self.frequencies.len()
    }

    /// The stations immediately left and right of `tuning`. A station whose
    /// center equals `tuning` counts as the right neighbor.
    pub fn neighbors(&self, tuning: f64) -> Neighbors {
        let idx = self.frequencies.partition_point(|&f| f < tuning);
        Neighbors {
            left: idx.checked_sub(1),
            right: (idx < self.frequencies.len()).then_some(idx),
        }
    }

    /// Dial position of a neighbor, with `0` and `full_range` standing in for
    /// the missing side.
    pub fn position(&self, neighbors: Neighbors, side: TuningSide) -> f64 {
        match side {
            TuningSide::Left => neighbors.left.map_or(0.0, |i| self.frequencies[i]),
            TuningSide::Right => neighbors
                .right
                .map_or(self.full_range, |i| self.frequencies[i]),
        }
    }

    /// The station `tuning` falls inside, if any. Exactly halfway between
    /// two neighbors is never tuned.
    pub fn tuned_to(&self, tuning: f64) -> Option<usize> {
        let neighbors = self.neighbors(tuning);
        let dist_l = tuning - self.position(neighbors, TuningSide::Left);
        let dist_r = self.position(neighbors, TuningSide::Right) - tuning;

        if dist_l == dist_r {
            return None;
        }
        let (closest, station) = if dist_l < dist_r {
            (dist_l, neighbors.left)
        } else {
            (dist_r, neighbors.right)
        };
        if closest > self.radius {
            return None;
        }
        station
    }
}

/// Station ids on either side of a tuning position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbors {
    pub left: Option<usize>,
    pub right: Option<usize>,
}

/// Which side of the tuned station's center the dial sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningSide {
    Left,
    Right,
}

/// Emitted whenever the tuning reading changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningEvent {
    pub tuning: f64,
    pub station: Option<usize>,
    pub previous: Option<usize>,
    pub is_new_station: bool,
}

/// Tracks the tuning pot and the station it resolves to
#[derive(Debug, Clone)]
pub struct TuningResolver {
    dial: DialCalibration,
    tuning: Option<f64>,
    station: Option<usize>,
}

impl TuningResolver {
    pub fn new(dial: DialCalibration) -> Self {
        Self {
            dial,
            tuning: None,
            station: None,
        }
    }

    /// Feed a smoothed reading. Returns an event when the reading differs
    /// from the previous one, even if the station stays the same.
    pub fn update(&mut self, reading: f64) -> Option<TuningEvent> {
        if self.tuning == Some(reading) {
            return None;
        }
        self.tuning = Some(reading);

        let previous = self.station;
        self.station = self.dial.tuned_to(reading);
        Some(TuningEvent {
            tuning: reading,
            station: self.station,
            previous,
            is_new_station: self.station != previous,
        })
    }

    pub fn dial(&self) -> &DialCalibration {
        &self.dial
    }

    pub fn tuning(&self) -> Option<f64> {
        self.tuning
    }

    pub fn station(&self) -> Option<usize> {
        self.station
    }

    pub fn is_tuned(&self) -> bool {
        self.station.is_some()
    }

    /// Distance from the tuned station's center, in sensor units
    pub fn distance(&self) -> Option<f64> {
        let tuning = self.tuning?;
        self.station
            .map(|id| (tuning - self.dial.frequencies()[id]).abs())
    }

    /// Side of the tuned station's center the dial is on. Sitting exactly on
    /// the center counts as the left side, like a center that is the right
    /// neighbor of the reading.
    pub fn side(&self) -> Option<TuningSide> {
        let tuning = self.tuning?;
        let id = self.station?;
        if tuning <= self.dial.frequencies()[id] {
            Some(TuningSide::Left)
        } else {
            Some(TuningSide::Right)
        }
    }
}

/// Volume cap for a tuning distance: ~1 on the station center, 0.5 at 80%
/// of the radius, fading to ~0.08 at the window edge.
pub fn volume_falloff(distance: f64, radius: f64) -> f64 {
    if radius <= 0.0 || !distance.is_finite() {
        return 0.0;
    }
    let x = (0.8 - distance / radius) / 0.2;
    (0.5 * (1.0 + libm::erf(x))).clamp(0.0, 1.0)
}
