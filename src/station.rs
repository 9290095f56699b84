//! Logical stations and how each one starts playing

use serde::{Deserialize, Serialize};

/// How a station picks its starting point once its server goes live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayStrategy {
    /// Track 0, or a random track when the station randomizes
    #[default]
    Default,
    /// One track per hour of the day, seeked to the current minute
    TimeOfDay,
    /// Plain `play`, resuming wherever the backend is
    None,
}

/// Where playback should start on a freshly loaded playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoint {
    Resume,
    Track(usize),
    TrackAt { track: usize, seconds: u32 },
}

impl PlayStrategy {
    /// Choose the start point for a playlist of `len` tracks. `hour` and
    /// `minute` are local wall-clock time; `roll` picks a random track.
    pub fn start_point(
        self,
        randomize: bool,
        len: usize,
        hour: u32,
        minute: u32,
        roll: impl FnOnce(usize) -> usize,
    ) -> StartPoint {
        match self {
            PlayStrategy::None => StartPoint::Resume,
            PlayStrategy::Default if randomize && len > 1 => StartPoint::Track(roll(len - 1)),
            PlayStrategy::Default => StartPoint::Track(0),
            PlayStrategy::TimeOfDay => {
                // The playlist's first track airs at 06:00
                let slot = (hour as usize + 24 - 6) % 24;
                StartPoint::TrackAt {
                    track: if len == 0 { 0 } else { slot % len },
                    seconds: minute * 60,
                }
            }
        }
    }
}

/// A station on the dial
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: usize,
    pub name: String,
    pub playlist: String,
    pub randomize: bool,
    pub strategy: PlayStrategy,
    /// Dial center, in sensor units
    pub frequency: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_starts_at_first_track() {
        let sp = PlayStrategy::Default.start_point(false, 12, 9, 30, |_| unreachable!());
        assert_eq!(sp, StartPoint::Track(0));
    }

    #[test]
    fn test_randomized_station_rolls_below_last_track() {
        let sp = PlayStrategy::Default.start_point(true, 12, 9, 30, |n| {
            assert_eq!(n, 11);
            7
        });
        assert_eq!(sp, StartPoint::Track(7));
    }

    #[test]
    fn test_time_of_day_wraps_playlist() {
        let sp = PlayStrategy::TimeOfDay.start_point(false, 10, 20, 15, |_| 0);
        assert_eq!(
            sp,
            StartPoint::TrackAt {
                track: 4,
                seconds: 900
            }
        );
        let early = PlayStrategy::TimeOfDay.start_point(false, 24, 3, 0, |_| 0);
        assert_eq!(
            early,
            StartPoint::TrackAt {
                track: 21,
                seconds: 0
            }
        );
    }

    #[test]
    fn test_strategy_names_in_config() {
        #[derive(Deserialize)]
        struct Wrap {
            strategy: PlayStrategy,
        }
        let w: Wrap = toml::from_str("strategy = \"time-of-day\"").unwrap();
        assert_eq!(w.strategy, PlayStrategy::TimeOfDay);
    }
}
