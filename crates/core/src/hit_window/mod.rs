use serde::{Deserialize, Serialize};

use crate::{clock::ClockReading, config::HitWindowConfig, song::Pitch};

/// Placeholder offset meaning "nothing recorded". Deliberately far outside
/// any real timing error so that `|sample| < |closest|` always accepts the
/// first genuine sample.
pub const NO_OFFSET_RECORDED: f64 = 999.99;

pub fn is_recorded(offset: f64) -> bool {
    offset != NO_OFFSET_RECORDED
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    Inactive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowTransition {
    Activated,
    Deactivated,
}

/// Per-lane input acceptance state machine.
///
/// `Inactive -(key)-> Active -(activation elapses)-> Inactive`, followed by a
/// refractory lockout during which fresh presses are ignored. While the
/// countdown is positive no state change is accepted at all, which is what
/// stops players from beating the test by rapid tapping.
#[derive(Debug, Clone)]
pub struct HitWindow {
    pitch: Pitch,
    key: String,
    state: WindowState,
    activation_duration: f64,
    refractory_duration: f64,
    countdown: f64,
    transition: Option<WindowTransition>,
    last_activation: Option<ClockReading>,
    closest_offsets: Vec<f64>,
    hit_count: u32,
    miss_count: u32,
}

impl HitWindow {
    pub fn new(pitch: Pitch, key: impl Into<String>, config: &HitWindowConfig) -> Self {
        Self {
            pitch,
            key: key.into(),
            state: WindowState::Inactive,
            activation_duration: config.activation_duration,
            refractory_duration: config.refractory_duration,
            countdown: 0.0,
            transition: None,
            last_activation: None,
            closest_offsets: Vec::new(),
            hit_count: 0,
            miss_count: 0,
        }
    }

    pub fn pitch(&self) -> Pitch {
        self.pitch
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == WindowState::Active
    }

    pub fn last_activation(&self) -> Option<ClockReading> {
        self.last_activation
    }

    /// Applies this tick's input. Only accepted once the countdown has run
    /// out; an active window deactivates on the first tick after that
    /// regardless of input.
    pub fn sample_input(&mut self, pressed: bool, now: ClockReading) -> Option<WindowTransition> {
        self.transition = None;
        if self.countdown > 0.0 {
            return None;
        }

        let transition = match self.state {
            WindowState::Inactive if pressed => {
                self.state = WindowState::Active;
                self.countdown = self.activation_duration;
                self.last_activation = Some(now);
                WindowTransition::Activated
            }
            WindowState::Inactive => return None,
            WindowState::Active => {
                self.state = WindowState::Inactive;
                self.countdown = self.refractory_duration;
                WindowTransition::Deactivated
            }
        };

        self.transition = Some(transition);
        Some(transition)
    }

    /// Runs the debounce countdown. Skipped on a tick that changed state, so
    /// a window never both transitions and counts down in one tick.
    pub fn decrement(&mut self, delta: f64) {
        if self.transition.is_some() || self.countdown <= 0.0 {
            return;
        }
        self.countdown = (self.countdown - delta.max(0.0)).max(0.0);
    }

    /// Full per-tick update for callers that do not interleave other work
    /// between input and countdown.
    pub fn tick(&mut self, pressed: bool, now: ClockReading, delta: f64) -> Option<WindowTransition> {
        let transition = self.sample_input(pressed, now);
        self.decrement(delta);
        transition
    }

    pub fn activated_this_tick(&self) -> bool {
        self.transition == Some(WindowTransition::Activated)
    }

    pub fn register_result(&mut self, hit: bool, closest_offset: Option<f64>) {
        if hit {
            self.hit_count += 1;
        } else {
            self.miss_count += 1;
        }

        if let Some(offset) = closest_offset {
            self.closest_offsets.push(offset);
        }
    }

    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    pub fn miss_count(&self) -> u32 {
        self.miss_count
    }

    pub fn closest_offsets(&self) -> &[f64] {
        &self.closest_offsets
    }

    /// Mean closest offset, or [`NO_OFFSET_RECORDED`] with no samples.
    pub fn average_closest_offset(&self) -> f64 {
        if self.closest_offsets.is_empty() {
            return NO_OFFSET_RECORDED;
        }
        self.closest_offsets.iter().sum::<f64>() / self.closest_offsets.len() as f64
    }
}
