use std::{cell::Cell, time::Instant};

use serde::{Deserialize, Serialize};

/// Monotonic instant in seconds, read once per tick from a [`ClockSource`].
///
/// Readings are only meaningful relative to other readings of the same
/// source and must never be persisted across process restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClockReading(f64);

impl ClockReading {
    pub const ZERO: Self = Self(0.0);

    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    /// Seconds elapsed since `earlier`. Negative if `earlier` is in the future.
    pub fn since(self, earlier: ClockReading) -> f64 {
        self.0 - earlier.0
    }

    pub fn offset_by(self, seconds: f64) -> Self {
        Self(self.0 + seconds)
    }
}

/// The host audio device's notion of time.
///
/// Implementations must be monotonic and must not drift against whatever
/// primitive actually plays the audio, since every hit judgement is measured
/// against this clock.
pub trait ClockSource {
    fn now(&self) -> ClockReading;
}

impl<C: ClockSource + ?Sized> ClockSource for &C {
    fn now(&self) -> ClockReading {
        (**self).now()
    }
}

/// Clock backed by [`Instant`], used when no audio backend provides its own
/// device time.
#[derive(Debug, Clone, Copy)]
pub struct DeviceClock {
    origin: Instant,
}

impl DeviceClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for DeviceClock {
    fn default() -> Self {
        Self::start()
    }
}

impl ClockSource for DeviceClock {
    fn now(&self) -> ClockReading {
        ClockReading(self.origin.elapsed().as_secs_f64())
    }
}

/// Hand-driven clock for deterministic replays and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    seconds: Cell<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(seconds: f64) -> Self {
        Self {
            seconds: Cell::new(seconds),
        }
    }

    /// Moves the clock forward. Negative deltas are ignored to keep the
    /// clock monotonic.
    pub fn advance(&self, delta: f64) {
        if delta > 0.0 {
            self.seconds.set(self.seconds.get() + delta);
        }
    }

    /// Jumps to `seconds` if that is not earlier than the current time.
    pub fn set(&self, seconds: f64) {
        if seconds >= self.seconds.get() {
            self.seconds.set(seconds);
        }
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> ClockReading {
        ClockReading(self.seconds.get())
    }
}
