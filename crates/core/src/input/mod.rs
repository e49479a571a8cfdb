use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{config::EngineConfig, song::Pitch};

/// Logical control the engine reacts to. Physical keys are resolved by a
/// [`KeyMap`] before reaching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Lane(Pitch),
    IncreaseOffset,
    DecreaseOffset,
    Tap,
}

/// Controls that transitioned down during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputFrame {
    pressed: Vec<Control>,
}

impl InputFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, control: Control) -> Self {
        self.press(control);
        self
    }

    pub fn press(&mut self, control: Control) {
        if !self.pressed.contains(&control) {
            self.pressed.push(control);
        }
    }

    pub fn is_pressed(&self, control: Control) -> bool {
        self.pressed.contains(&control)
    }

    pub fn pressed(&self) -> &[Control] {
        &self.pressed
    }

    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty()
    }

    pub fn clear(&mut self) {
        self.pressed.clear();
    }
}

/// Physical key name to logical control routing, built from configuration.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    bindings: HashMap<String, Control>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut map = Self::new();
        for lane in &config.lanes {
            map.bind(&lane.key, Control::Lane(lane.pitch));
        }
        map.bind(&config.controls.increase_offset, Control::IncreaseOffset);
        map.bind(&config.controls.decrease_offset, Control::DecreaseOffset);
        map.bind(&config.controls.tap, Control::Tap);
        map
    }

    /// Key names are matched case-insensitively.
    pub fn bind(&mut self, key: &str, control: Control) {
        self.bindings.insert(key.to_ascii_lowercase(), control);
    }

    pub fn resolve(&self, key: &str) -> Option<Control> {
        self.bindings.get(&key.to_ascii_lowercase()).copied()
    }

    /// Builds an input frame from raw key names, skipping unbound keys.
    pub fn frame<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> InputFrame {
        let mut frame = InputFrame::new();
        for key in keys {
            match self.resolve(key) {
                Some(control) => frame.press(control),
                None => tracing::trace!(key, "ignoring unbound key"),
            }
        }
        frame
    }
}
