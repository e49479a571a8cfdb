use std::{path::Path, thread, time::Duration};

use latency_calibration_core::{
    CalibrationError, ClockReading, ClockSource, DeviceClock, InputFrame, KeyMap, ManualClock,
    Result,
};
use serde::Deserialize;

/// Hard stop for scripts without a duration whose run never completes.
const MAX_REPLAY_SECONDS: f64 = 3_600.0;

fn default_tick_rate() -> f64 {
    60.0
}

/// Key presses replayed at a fixed tick rate, against a manual clock or in
/// real time.
///
/// ```json
/// { "tick_rate": 120, "presses": [{ "time": 2.0, "key": "J" }] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct InputScript {
    #[serde(default = "default_tick_rate")]
    pub tick_rate: f64,
    #[serde(default)]
    pub presses: Vec<ScriptedPress>,
    /// Stop after this many seconds even if the run has not completed.
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedPress {
    /// Seconds since the run started.
    pub time: f64,
    pub key: String,
}

impl InputScript {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut script: Self = serde_json::from_str(json)?;
        script.normalise()?;
        Ok(script)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(?path, "loading input script");
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn tick_interval(&self) -> f64 {
        1.0 / self.tick_rate
    }

    /// Ticks a manual clock from zero until `step` reports completion or
    /// the script runs out of time. Each press lands on the first tick at or
    /// after its time. Returns the clock reading of the last tick.
    pub fn replay<F>(&self, keymap: &KeyMap, step: F) -> Result<ClockReading>
    where
        F: FnMut(ClockReading, &InputFrame) -> Result<bool>,
    {
        let clock = ManualClock::new();
        self.drive(
            keymap,
            |target| {
                clock.set(target);
                clock.now()
            },
            step,
        )
    }

    /// Same as [`InputScript::replay`] but paced by the device clock,
    /// sleeping until each tick is due. Times are measured from `clock`'s
    /// origin.
    pub fn replay_realtime<F>(&self, clock: &DeviceClock, keymap: &KeyMap, step: F) -> Result<ClockReading>
    where
        F: FnMut(ClockReading, &InputFrame) -> Result<bool>,
    {
        self.drive(
            keymap,
            |target| {
                let ahead = target - clock.now().seconds();
                if ahead > 0.0 {
                    thread::sleep(Duration::from_secs_f64(ahead));
                }
                clock.now()
            },
            step,
        )
    }

    fn drive<W, F>(&self, keymap: &KeyMap, mut wait_until: W, mut step: F) -> Result<ClockReading>
    where
        W: FnMut(f64) -> ClockReading,
        F: FnMut(ClockReading, &InputFrame) -> Result<bool>,
    {
        let limit = self.duration.unwrap_or(MAX_REPLAY_SECONDS);
        let interval = self.tick_interval();
        let mut next_press = 0;
        let mut last = ClockReading::ZERO;

        for tick in 1u64.. {
            let target = tick as f64 * interval;
            if target > limit {
                tracing::warn!(limit, "script ran out of time before completion");
                break;
            }
            let now = wait_until(target);
            last = now;

            let due = self.presses[next_press..]
                .iter()
                .take_while(|press| press.time <= now.seconds())
                .count();
            let keys = self.presses[next_press..next_press + due]
                .iter()
                .map(|press| press.key.as_str());
            let frame = keymap.frame(keys);
            next_press += due;

            if step(now, &frame)? {
                break;
            }
        }

        Ok(last)
    }

    fn normalise(&mut self) -> Result<()> {
        if !(self.tick_rate.is_finite() && self.tick_rate > 0.0) {
            return Err(CalibrationError::InvalidParameter {
                name: "tick_rate",
                value: self.tick_rate,
            });
        }
        if let Some(press) = self.presses.iter().find(|press| !(press.time >= 0.0)) {
            return Err(CalibrationError::InvalidParameter {
                name: "presses.time",
                value: press.time,
            });
        }
        self.presses.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latency_calibration_core::{Control, EngineConfig, Pitch};

    #[test]
    fn presses_land_on_the_next_tick() {
        let script = InputScript::from_json_str(
            r#"{ "tick_rate": 4, "presses": [
                { "time": 0.6, "key": "K" },
                { "time": 0.3, "key": "j" }
            ] }"#,
        )
        .unwrap();
        let keymap = KeyMap::from_config(&EngineConfig::default());

        let mut frames = Vec::new();
        let end = script
            .replay(&keymap, |now, frame| {
                frames.push((now.seconds(), frame.clone()));
                Ok(frames.len() == 4)
            })
            .unwrap();

        assert_eq!(end.seconds(), 1.0);
        assert!(frames[0].1.is_empty());
        assert!(frames[1].1.is_pressed(Control::Lane(Pitch::Low)));
        assert!(frames[2].1.is_pressed(Control::Lane(Pitch::Mid)));
        assert!(frames[3].1.is_empty());
    }

    #[test]
    fn stops_at_the_scripted_duration() {
        let script = InputScript::from_json_str(r#"{ "tick_rate": 10, "duration": 1.0 }"#).unwrap();
        let mut ticks = 0;
        script
            .replay(&KeyMap::new(), |_, _| {
                ticks += 1;
                Ok(false)
            })
            .unwrap();
        assert_eq!(ticks, 10);
    }

    #[test]
    fn realtime_replay_follows_the_device_clock() {
        let script = InputScript::from_json_str(r#"{ "tick_rate": 256, "duration": 0.0625 }"#).unwrap();
        let clock = DeviceClock::start();
        let mut readings = Vec::new();
        let end = script
            .replay_realtime(&clock, &KeyMap::new(), |now, _| {
                readings.push(now.seconds());
                Ok(false)
            })
            .unwrap();

        assert_eq!(readings.len(), 16);
        assert!(readings.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(end.seconds() >= 0.0625);
    }

    #[test]
    fn rejects_bad_tick_rates() {
        let err = InputScript::from_json_str(r#"{ "tick_rate": 0 }"#).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidParameter { name: "tick_rate", .. }));
    }
}
