use serde::{Deserialize, Serialize};

use crate::{config::LatencyConfig, CalibrationError, Result};

/// Rounds to two decimal places so repeated adjustments never accumulate
/// floating point drift.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    Increase,
    Decrease,
}

/// Signed audio-to-input compensation in seconds.
///
/// The value is always within `[lower_bound, upper_bound]` and always rounded
/// to two decimals. It is owned by the active run and copied, never shared,
/// into the next one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredOffset")]
pub struct LatencyOffset {
    value: f64,
    lower_bound: f64,
    upper_bound: f64,
    increment: f64,
}

impl LatencyOffset {
    pub fn new(config: &LatencyConfig) -> Result<Self> {
        if !(config.lower_bound < config.upper_bound) {
            return Err(CalibrationError::InvalidBounds {
                lower: config.lower_bound,
                upper: config.upper_bound,
            });
        }
        if !(config.adjustment_magnitude > 0.0) {
            return Err(CalibrationError::InvalidParameter {
                name: "latency.adjustment_magnitude",
                value: config.adjustment_magnitude,
            });
        }

        Ok(Self {
            value: round2(0.0_f64.clamp(config.lower_bound, config.upper_bound)),
            lower_bound: config.lower_bound,
            upper_bound: config.upper_bound,
            increment: config.adjustment_magnitude,
        })
    }

    pub fn seconds(&self) -> f64 {
        self.value
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower_bound, self.upper_bound)
    }

    /// Steps the offset by one increment. An adjustment that would leave the
    /// bounds is rejected and the offset stays unchanged.
    pub fn adjust(&mut self, adjustment: Adjustment) -> bool {
        let candidate = match adjustment {
            Adjustment::Increase => round2(self.value + self.increment),
            Adjustment::Decrease => round2(self.value - self.increment),
        };

        if candidate > self.upper_bound || candidate < self.lower_bound {
            return false;
        }

        self.value = candidate;
        true
    }

    /// Replaces the value, rounding it and clamping it into bounds. Returns
    /// `true` if clamping changed the rounded value.
    pub fn set(&mut self, seconds: f64) -> bool {
        let rounded = round2(seconds);
        let clamped = round2(rounded.clamp(self.lower_bound, self.upper_bound));
        self.value = clamped;
        clamped != rounded
    }

    /// Same bounds and increment, value reset to zero (or the closest bound).
    pub fn zeroed(&self) -> Self {
        let mut copy = *self;
        copy.set(0.0);
        copy
    }
}

/// Wire shape of [`LatencyOffset`], checked before it becomes one.
#[derive(Deserialize)]
struct StoredOffset {
    value: f64,
    lower_bound: f64,
    upper_bound: f64,
    increment: f64,
}

impl TryFrom<StoredOffset> for LatencyOffset {
    type Error = CalibrationError;

    fn try_from(stored: StoredOffset) -> Result<Self> {
        let mut offset = LatencyOffset::new(&LatencyConfig {
            adjustment_magnitude: stored.increment,
            upper_bound: stored.upper_bound,
            lower_bound: stored.lower_bound,
            ..LatencyConfig::default()
        })?;
        if !(stored.lower_bound..=stored.upper_bound).contains(&stored.value) {
            return Err(CalibrationError::InvalidParameter {
                name: "latency.value",
                value: stored.value,
            });
        }
        offset.set(stored.value);
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset() -> LatencyOffset {
        LatencyOffset::new(&LatencyConfig::default()).unwrap()
    }

    #[test]
    fn rounding_is_stable() {
        for raw in [-0.4999, -0.05, 0.0, 0.015, 0.1 + 0.2, 0.45 + 0.05, 0.333] {
            let once = round2(raw);
            assert_eq!(round2(once), once);
        }

        let mut offset = offset();
        for _ in 0..7 {
            offset.adjust(Adjustment::Increase);
        }
        assert_eq!(round2(offset.seconds()), offset.seconds());
        assert_eq!(offset.seconds(), 0.35);
    }

    #[test]
    fn adjustments_stay_within_bounds() {
        let mut offset = offset();
        let mut accepted = 0;
        for _ in 0..20 {
            if offset.adjust(Adjustment::Increase) {
                accepted += 1;
            }
            assert!(offset.seconds() <= 0.5);
        }
        assert_eq!(accepted, 10);
        assert_eq!(offset.seconds(), 0.5);

        assert!(!offset.adjust(Adjustment::Increase));
        assert_eq!(offset.seconds(), 0.5);

        for _ in 0..30 {
            offset.adjust(Adjustment::Decrease);
            assert!(offset.seconds() >= -0.5);
        }
        assert_eq!(offset.seconds(), -0.5);
    }

    #[test]
    fn rejected_adjustment_leaves_value_untouched() {
        let config = LatencyConfig {
            adjustment_magnitude: 0.2,
            upper_bound: 0.3,
            lower_bound: -0.3,
            ..LatencyConfig::default()
        };
        let mut offset = LatencyOffset::new(&config).unwrap();
        assert!(offset.adjust(Adjustment::Increase));
        assert!(!offset.adjust(Adjustment::Increase));
        assert_eq!(offset.seconds(), 0.2);
    }

    #[test]
    fn set_clamps_and_rounds() {
        let mut offset = offset();
        assert!(!offset.set(0.01666));
        assert_eq!(offset.seconds(), 0.02);

        assert!(offset.set(0.9));
        assert_eq!(offset.seconds(), 0.5);
        assert_eq!(offset.zeroed().seconds(), 0.0);
    }

    #[test]
    fn deserialising_enforces_bounds_and_rounding() {
        let mut offset = offset();
        offset.set(-0.15);
        let json = serde_json::to_string(&offset).unwrap();
        assert_eq!(serde_json::from_str::<LatencyOffset>(&json).unwrap(), offset);

        let unrounded: LatencyOffset = serde_json::from_str(
            r#"{ "value": 0.123, "lower_bound": -0.5, "upper_bound": 0.5, "increment": 0.05 }"#,
        )
        .unwrap();
        assert_eq!(unrounded.seconds(), 0.12);

        for json in [
            r#"{ "value": 0.9, "lower_bound": -0.5, "upper_bound": 0.5, "increment": 0.05 }"#,
            r#"{ "value": 0.0, "lower_bound": 0.5, "upper_bound": -0.5, "increment": 0.05 }"#,
            r#"{ "value": 0.0, "lower_bound": -0.5, "upper_bound": 0.5, "increment": 0.0 }"#,
        ] {
            assert!(serde_json::from_str::<LatencyOffset>(json).is_err(), "{json}");
        }
    }

    #[test]
    fn rejects_inverted_bounds() {
        let config = LatencyConfig {
            lower_bound: 0.5,
            upper_bound: -0.5,
            ..LatencyConfig::default()
        };
        assert!(matches!(
            LatencyOffset::new(&config),
            Err(CalibrationError::InvalidBounds { .. })
        ));
    }
}
