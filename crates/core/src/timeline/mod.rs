use crate::{clock::ClockReading, latency::LatencyOffset, CalibrationError, Result};

/// Converts device time into song position.
///
/// Holds no timers of its own: every position is a pure function of the
/// clock reading, the recorded start instant and the current latency offset.
/// The offset may be changed while the timeline runs without resetting the
/// start instant.
#[derive(Debug, Clone)]
pub struct Timeline {
    started_at: Option<ClockReading>,
    seconds_per_beat: f64,
    latency: LatencyOffset,
}

impl Timeline {
    pub fn new(bpm: f64, latency: LatencyOffset) -> Result<Self> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(CalibrationError::InvalidTempo(bpm));
        }

        Ok(Self {
            started_at: None,
            seconds_per_beat: 60.0 / bpm,
            latency,
        })
    }

    pub fn start(&mut self, now: ClockReading) {
        self.started_at = Some(now);
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<ClockReading> {
        self.started_at
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.seconds_per_beat
    }

    pub fn latency(&self) -> &LatencyOffset {
        &self.latency
    }

    pub fn latency_mut(&mut self) -> &mut LatencyOffset {
        &mut self.latency
    }

    /// Song position in seconds, or `None` before [`Timeline::start`].
    pub fn position_seconds(&self, now: ClockReading) -> Option<f64> {
        self.started_at
            .map(|start| now.since(start) - self.latency.seconds())
    }

    pub fn position_beats(&self, now: ClockReading) -> Option<f64> {
        self.position_seconds(now)
            .map(|seconds| seconds / self.seconds_per_beat)
    }

    /// Song position in seconds at which `beat` falls.
    pub fn beat_to_seconds(&self, beat: f64) -> f64 {
        beat * self.seconds_per_beat
    }
}
