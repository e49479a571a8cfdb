use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{song::Pitch, CalibrationError, Result};

/// Top-level configuration for the calibration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub latency: LatencyConfig,
    pub hit_window: HitWindowConfig,
    pub prompt: PromptConfig,
    pub auto: AutoCalibrationConfig,
    pub beat_match: BeatMatchConfig,
    pub lanes: Vec<LaneBinding>,
    pub controls: ControlBindings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latency: LatencyConfig::default(),
            hit_window: HitWindowConfig::default(),
            prompt: PromptConfig::default(),
            auto: AutoCalibrationConfig::default(),
            beat_match: BeatMatchConfig::default(),
            lanes: default_lanes(),
            controls: ControlBindings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Lane pitches in configuration order.
    pub fn lane_pitches(&self) -> Vec<Pitch> {
        self.lanes.iter().map(|lane| lane.pitch).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.latency.lower_bound < self.latency.upper_bound) {
            return Err(CalibrationError::InvalidBounds {
                lower: self.latency.lower_bound,
                upper: self.latency.upper_bound,
            });
        }

        positive("latency.adjustment_magnitude", self.latency.adjustment_magnitude)?;
        positive("hit_window.activation_duration", self.hit_window.activation_duration)?;
        non_negative("hit_window.refractory_duration", self.hit_window.refractory_duration)?;
        non_negative("hit_window.hit_tolerance", self.hit_window.hit_tolerance)?;
        positive("prompt.travel_duration", self.prompt.travel_duration)?;
        non_negative(
            "prompt.exist_after_arrival_duration",
            self.prompt.exist_after_arrival_duration,
        )?;
        non_negative(
            "prompt.exist_after_hit_duration",
            self.prompt.exist_after_hit_duration,
        )?;
        non_negative(
            "beat_match.pause_before_spawning",
            self.beat_match.pause_before_spawning,
        )?;
        if !(self.auto.bpm.is_finite() && self.auto.bpm > 0.0) {
            return Err(CalibrationError::InvalidTempo(self.auto.bpm));
        }
        if self.auto.test_length_in_beats == 0 {
            return Err(CalibrationError::InvalidParameter {
                name: "auto.test_length_in_beats",
                value: 0.0,
            });
        }

        crate::song::validate_lane_set(&self.lane_pitches())
    }
}

fn positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CalibrationError::InvalidParameter { name, value })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(CalibrationError::InvalidParameter { name, value })
    }
}

/// Latency offset range and the live adjustment step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub adjustment_magnitude: f64,
    pub upper_bound: f64,
    pub lower_bound: f64,
    /// Remove every live prompt whenever the offset is adjusted by hand.
    pub clear_prompts_on_adjust: bool,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            adjustment_magnitude: 0.05,
            upper_bound: 0.5,
            lower_bound: -0.5,
            clear_prompts_on_adjust: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HitWindowConfig {
    /// How long a window stays active after its key is pressed.
    pub activation_duration: f64,
    /// Lockout after a window deactivates, during which presses are ignored.
    pub refractory_duration: f64,
    /// Half-width around a prompt's arrival in which it overlaps its window.
    pub hit_tolerance: f64,
}

impl Default for HitWindowConfig {
    fn default() -> Self {
        Self {
            activation_duration: 0.1,
            refractory_duration: 0.15,
            hit_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub travel_duration: f64,
    pub exist_after_arrival_duration: f64,
    pub exist_after_hit_duration: f64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            travel_duration: 1.0,
            exist_after_arrival_duration: 0.25,
            exist_after_hit_duration: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCalibrationConfig {
    pub bpm: f64,
    pub intro_beat_count: u32,
    pub test_length_in_beats: u32,
}

impl Default for AutoCalibrationConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            intro_beat_count: 4,
            test_length_in_beats: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatMatchConfig {
    /// Song seconds to wait before the first beat prompt may spawn.
    pub pause_before_spawning: f64,
}

impl Default for BeatMatchConfig {
    fn default() -> Self {
        Self {
            pause_before_spawning: 4.0,
        }
    }
}

/// Physical key name bound to one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneBinding {
    pub pitch: Pitch,
    pub key: String,
}

impl LaneBinding {
    pub fn new(pitch: Pitch, key: impl Into<String>) -> Self {
        Self {
            pitch,
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlBindings {
    pub increase_offset: String,
    pub decrease_offset: String,
    pub tap: String,
}

impl Default for ControlBindings {
    fn default() -> Self {
        Self {
            increase_offset: "W".to_string(),
            decrease_offset: "S".to_string(),
            tap: "Space".to_string(),
        }
    }
}

pub fn default_lanes() -> Vec<LaneBinding> {
    vec![
        LaneBinding::new(Pitch::Low, "J"),
        LaneBinding::new(Pitch::Mid, "K"),
        LaneBinding::new(Pitch::High, "L"),
    ]
}
