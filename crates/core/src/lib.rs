//! Core library for the latency calibration engine.
//!
//! A rhythm game loop reduced to the parts that matter for measuring
//! audio-to-input latency: a clock, a song timeline shifted by a latency
//! offset, debounced hit windows, prompt scheduling and judging, per-run
//! aggregation, a metronome-based offset estimator and a session that walks
//! an operator through each calibration technique. Nothing here renders or
//! plays audio; effects are emitted as requests for a presentation layer.

pub mod aggregate;
pub mod auto;
pub mod clock;
pub mod config;
pub mod error;
pub mod hit_window;
pub mod input;
pub mod latency;
pub mod run;
pub mod scheduler;
pub mod session;
pub mod song;
pub mod timeline;

pub use aggregate::{CalibrationRunStats, ResultsTable, RunAggregator, RunSummary, Technique};
pub use auto::{estimate_offset, AutoCalibrator, AutoOutcome, AutoPhase, AutoTick};
pub use clock::{ClockReading, ClockSource, DeviceClock, ManualClock};
pub use config::{EngineConfig, LaneBinding};
pub use error::{CalibrationError, Result};
pub use hit_window::{HitWindow, WindowState, NO_OFFSET_RECORDED};
pub use input::{Control, InputFrame, KeyMap};
pub use latency::{Adjustment, LatencyOffset};
pub use run::{EffectRequest, Run, RunMode, TickReport};
pub use scheduler::{EventScheduler, Judgement, Prompt, PromptOutcome, SpawnStrategy};
pub use session::{Phase, Session, SessionSongs, PHASE_ORDER};
pub use song::{Note, Pitch, Song};
pub use timeline::Timeline;
