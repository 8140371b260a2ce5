//! # Temperature Classifier
//!
//! Turns the distance to the nearest active report into a 0..100 "heat"
//! value and a discrete alert level. The closer the report, the colder it
//! gets. Band boundaries are fixed so a given distance always classifies
//! identically.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Farthest boundary: at or beyond this the value is 0.
pub const NORMAL_THRESHOLD_METERS: f64 = 5000.0;
pub const COOL_THRESHOLD_METERS: f64 = 2000.0;
pub const COLD_THRESHOLD_METERS: f64 = 500.0;
/// Nearest boundary: inside it the value climbs from 75 towards 100.
pub const FREEZE_THRESHOLD_METERS: f64 = 100.0;

pub const NORMAL_VALUE: f64 = 0.0;
pub const COOL_VALUE: f64 = 25.0;
pub const COLD_VALUE: f64 = 50.0;
pub const FREEZE_VALUE: f64 = 75.0;
pub const EXTREME_VALUE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureLevel {
    Normal,
    Cool,
    Cold,
    Freeze,
    Extreme,
}

impl TemperatureLevel {
    pub fn from_value(value: f64) -> Self {
        if value >= 75.0 {
            TemperatureLevel::Extreme
        } else if value >= 50.0 {
            TemperatureLevel::Freeze
        } else if value >= 25.0 {
            TemperatureLevel::Cold
        } else if value >= 10.0 {
            TemperatureLevel::Cool
        } else {
            TemperatureLevel::Normal
        }
    }

    /// User-facing alert text.
    pub fn description(&self) -> &'static str {
        match self {
            TemperatureLevel::Extreme => "Reports are extremely close!",
            TemperatureLevel::Freeze => "You're very close to a report",
            TemperatureLevel::Cold => "Getting colder...",
            TemperatureLevel::Cool => "There are reports nearby",
            TemperatureLevel::Normal => "No reports nearby",
        }
    }
}

impl fmt::Display for TemperatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TemperatureLevel::Normal => "normal",
            TemperatureLevel::Cool => "cool",
            TemperatureLevel::Cold => "cold",
            TemperatureLevel::Freeze => "freeze",
            TemperatureLevel::Extreme => "extreme",
        };
        f.write_str(label)
    }
}

/// Ephemeral alert state emitted by the proximity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureState {
    pub level: TemperatureLevel,
    pub value: f64,
    /// Meters to the nearest active report; `None` without location or reports.
    pub nearest_distance: Option<f64>,
}

impl TemperatureState {
    /// The state emitted when there is nothing to measure.
    pub const fn idle() -> Self {
        Self {
            level: TemperatureLevel::Normal,
            value: NORMAL_VALUE,
            nearest_distance: None,
        }
    }
}

impl Default for TemperatureState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Linear position of `distance` inside a band, mapped onto `[from, to]`.
fn interpolate(distance: f64, far: f64, near: f64, from: f64, to: f64) -> f64 {
    let ratio = (far - distance) / (far - near);
    from + ratio * (to - from)
}

/// Piecewise-linear heat value in `[0, 100]`.
pub fn value_for_distance(distance_meters: f64) -> f64 {
    let d = distance_meters.max(0.0);

    if d >= NORMAL_THRESHOLD_METERS {
        NORMAL_VALUE
    } else if d >= COOL_THRESHOLD_METERS {
        interpolate(d, NORMAL_THRESHOLD_METERS, COOL_THRESHOLD_METERS, NORMAL_VALUE, COOL_VALUE)
    } else if d >= COLD_THRESHOLD_METERS {
        interpolate(d, COOL_THRESHOLD_METERS, COLD_THRESHOLD_METERS, COOL_VALUE, COLD_VALUE)
    } else if d >= FREEZE_THRESHOLD_METERS {
        interpolate(d, COLD_THRESHOLD_METERS, FREEZE_THRESHOLD_METERS, COLD_VALUE, FREEZE_VALUE)
    } else {
        let ratio = ((FREEZE_THRESHOLD_METERS - d) / FREEZE_THRESHOLD_METERS).min(1.0);
        (FREEZE_VALUE + ratio * (EXTREME_VALUE - FREEZE_VALUE)).min(EXTREME_VALUE)
    }
}

/// Classify the distance to the nearest report. `None` means no location
/// or no active reports.
pub fn classify(distance_meters: Option<f64>) -> TemperatureState {
    match distance_meters {
        None => TemperatureState::idle(),
        Some(distance) => {
            let value = value_for_distance(distance);
            TemperatureState {
                level: TemperatureLevel::from_value(value),
                value,
                nearest_distance: Some(distance),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_none_is_idle() {
        assert_eq!(
            classify(None),
            TemperatureState {
                level: TemperatureLevel::Normal,
                value: 0.0,
                nearest_distance: None,
            }
        );
    }

    #[test]
    fn test_far_away_is_normal() {
        let state = classify(Some(10_000.0));
        assert_eq!(state.level, TemperatureLevel::Normal);
        assert_eq!(state.value, 0.0);
        assert_eq!(state.nearest_distance, Some(10_000.0));
    }

    #[test]
    fn test_very_close_is_extreme() {
        let state = classify(Some(50.0));
        assert_eq!(state.level, TemperatureLevel::Extreme);
        assert!(state.value >= 75.0);
        assert!(close(state.value, 87.5));
    }

    #[test]
    fn test_band_anchors() {
        assert!(close(value_for_distance(5000.0), 0.0));
        assert!(close(value_for_distance(2000.0), 25.0));
        assert!(close(value_for_distance(500.0), 50.0));
        assert!(close(value_for_distance(100.0), 75.0));
        assert!(close(value_for_distance(0.0), 100.0));
    }

    #[test]
    fn test_interpolates_inside_bands() {
        assert!(close(value_for_distance(3500.0), 12.5));
        assert!(close(value_for_distance(1250.0), 37.5));
        assert!(close(value_for_distance(300.0), 62.5));
    }

    #[test]
    fn test_value_is_monotonic_and_clamped() {
        let mut previous = -1.0;
        for meters in (0..=6000).rev().step_by(25) {
            let v = value_for_distance(meters as f64);
            assert!((0.0..=100.0).contains(&v));
            assert!(v >= previous, "value dropped at {meters}m");
            previous = v;
        }
        assert!(close(value_for_distance(-5.0), 100.0));
    }

    #[test]
    fn test_level_cutoffs() {
        assert_eq!(TemperatureLevel::from_value(9.99), TemperatureLevel::Normal);
        assert_eq!(TemperatureLevel::from_value(10.0), TemperatureLevel::Cool);
        assert_eq!(TemperatureLevel::from_value(25.0), TemperatureLevel::Cold);
        assert_eq!(TemperatureLevel::from_value(50.0), TemperatureLevel::Freeze);
        assert_eq!(TemperatureLevel::from_value(75.0), TemperatureLevel::Extreme);
    }

    #[test]
    fn test_cool_starts_inside_the_first_band() {
        // 10 points is reached 1200m inside the 5000..2000 band
        assert_eq!(classify(Some(3900.0)).level, TemperatureLevel::Normal);
        assert_eq!(classify(Some(3700.0)).level, TemperatureLevel::Cool);
    }
}
