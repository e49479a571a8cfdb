use crate::song::Pitch;

/// Result alias that carries the custom [`CalibrationError`] type.
pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// Free-form message for errors that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed song, config or script JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("at least one hit window must be configured")]
    NoHitWindows,
    #[error("more than one hit window is bound to pitch `{0}`")]
    DuplicatePitch(Pitch),
    /// A note asks for a lane that no hit window serves.
    #[error("note at beat {beat} has pitch `{pitch}` but no hit window is bound to it")]
    UnmappedPitch { pitch: Pitch, beat: f64 },
    #[error("note at beat {beat} lies outside the song (0..={duration} beats)")]
    NoteBeyondSongEnd { beat: f64, duration: f64 },
    #[error("tempo must be a positive, finite BPM (got {0})")]
    InvalidTempo(f64),
    #[error("latency lower bound {lower} must be below upper bound {upper}")]
    InvalidBounds { lower: f64, upper: f64 },
    #[error("parameter `{name}` has invalid value {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    /// The auto-calibration tap count does not pair up with the recorded beats.
    #[error("recorded {taps} taps for {beats} beats; expected {expected} taps, restart the test")]
    SampleMismatch {
        beats: usize,
        taps: usize,
        expected: usize,
    },
    #[error("the active run has not completed yet")]
    NotReady,
    #[error("the session has already reached its results phase")]
    SessionFinished,
}

impl CalibrationError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Whether the operator can recover by repeating the current run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SampleMismatch { .. } | Self::NotReady)
    }
}

impl From<&str> for CalibrationError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for CalibrationError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
