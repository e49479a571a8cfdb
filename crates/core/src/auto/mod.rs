use serde::{Deserialize, Serialize};

use crate::{clock::ClockReading, config::AutoCalibrationConfig, CalibrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoPhase {
    WaitingToStart,
    /// Metronome ticking, nothing recorded yet.
    Countdown,
    Recording,
    Completed,
}

/// Scalar result or named failure of one auto-calibration test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoOutcome {
    Offset(f64),
    SampleMismatch {
        beats: usize,
        taps: usize,
        expected: usize,
    },
}

impl AutoOutcome {
    pub fn offset(&self) -> Result<f64> {
        match *self {
            AutoOutcome::Offset(offset) => Ok(offset),
            AutoOutcome::SampleMismatch {
                beats,
                taps,
                expected,
            } => Err(CalibrationError::SampleMismatch {
                beats,
                taps,
                expected,
            }),
        }
    }
}

/// What happened during one auto-calibration tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoTick {
    pub phase: AutoPhase,
    /// The metronome should click this tick.
    pub metronome: bool,
    pub tap_recorded: bool,
    pub completed: bool,
}

/// Mean tap-minus-beat offset over paired samples.
///
/// The final beat has no tap: the player's answer to it would land after the
/// test is already over. So exactly `beats.len() - 1` taps are required and
/// anything else is reported as a mismatch instead of a number.
pub fn estimate_offset(beats: &[f64], taps: &[f64]) -> Result<f64> {
    let expected = beats.len().saturating_sub(1);
    if beats.is_empty() || taps.len() != expected || taps.is_empty() {
        return Err(CalibrationError::SampleMismatch {
            beats: beats.len(),
            taps: taps.len(),
            expected,
        });
    }

    let total: f64 = taps.iter().zip(beats).map(|(tap, beat)| tap - beat).sum();
    Ok(total / taps.len() as f64)
}

/// Runs a fixed-length metronome, records beat and tap instants during the
/// test portion and estimates the player's latency from them.
#[derive(Debug, Clone)]
pub struct AutoCalibrator {
    phase: AutoPhase,
    seconds_per_beat: f64,
    intro_beats: u32,
    test_beats: u32,
    started_at: Option<ClockReading>,
    last_beat: i64,
    beat_instants: Vec<f64>,
    tap_instants: Vec<f64>,
    outcome: Option<AutoOutcome>,
}

impl AutoCalibrator {
    pub fn new(config: &AutoCalibrationConfig) -> Result<Self> {
        if !(config.bpm.is_finite() && config.bpm > 0.0) {
            return Err(CalibrationError::InvalidTempo(config.bpm));
        }
        if config.test_length_in_beats == 0 {
            return Err(CalibrationError::InvalidParameter {
                name: "auto.test_length_in_beats",
                value: 0.0,
            });
        }

        Ok(Self {
            phase: AutoPhase::WaitingToStart,
            seconds_per_beat: 60.0 / config.bpm,
            intro_beats: config.intro_beat_count,
            test_beats: config.test_length_in_beats,
            started_at: None,
            last_beat: -1,
            beat_instants: Vec::new(),
            tap_instants: Vec::with_capacity(config.test_length_in_beats as usize),
            outcome: None,
        })
    }

    pub fn start(&mut self, now: ClockReading) {
        if self.phase != AutoPhase::WaitingToStart {
            return;
        }
        tracing::info!(
            intro = self.intro_beats,
            test = self.test_beats,
            "auto calibration started"
        );
        self.started_at = Some(now);
        self.phase = if self.intro_beats == 0 {
            AutoPhase::Recording
        } else {
            AutoPhase::Countdown
        };
    }

    pub fn phase(&self) -> AutoPhase {
        self.phase
    }

    pub fn started_at(&self) -> Option<ClockReading> {
        self.started_at
    }

    pub fn is_completed(&self) -> bool {
        self.phase == AutoPhase::Completed
    }

    pub fn outcome(&self) -> Option<AutoOutcome> {
        self.outcome
    }

    pub fn beat_instants(&self) -> &[f64] {
        &self.beat_instants
    }

    pub fn tap_instants(&self) -> &[f64] {
        &self.tap_instants
    }

    /// Elapsed beats since start, or `None` before start.
    pub fn elapsed_beats(&self, now: ClockReading) -> Option<f64> {
        self.started_at
            .map(|start| now.since(start) / self.seconds_per_beat)
    }

    pub fn tick(&mut self, now: ClockReading, tapped: bool) -> AutoTick {
        let mut report = AutoTick {
            phase: self.phase,
            metronome: false,
            tap_recorded: false,
            completed: false,
        };
        let Some(elapsed) = self.elapsed_beats(now) else {
            return report;
        };
        if self.phase == AutoPhase::Completed {
            return report;
        }

        let intro = f64::from(self.intro_beats);
        let end = f64::from(self.intro_beats + self.test_beats);

        if self.phase == AutoPhase::Countdown && elapsed >= intro {
            tracing::debug!("auto calibration recording");
            self.phase = AutoPhase::Recording;
        }

        let beat = elapsed.floor() as i64;
        if beat > self.last_beat {
            self.last_beat = beat;
            report.metronome = true;
            let recorded = i64::from(self.intro_beats)..=i64::from(self.intro_beats + self.test_beats);
            if self.phase == AutoPhase::Recording && recorded.contains(&beat) {
                self.beat_instants.push(now.seconds());
            }
        }

        if self.phase == AutoPhase::Recording && tapped && elapsed < end {
            self.tap_instants.push(now.seconds());
            report.tap_recorded = true;
        }

        if self.phase == AutoPhase::Recording && elapsed >= end {
            self.complete();
            report.completed = true;
        }

        report.phase = self.phase;
        report
    }

    fn complete(&mut self) {
        self.phase = AutoPhase::Completed;
        let outcome = match estimate_offset(&self.beat_instants, &self.tap_instants) {
            Ok(offset) => {
                tracing::info!(offset, taps = self.tap_instants.len(), "auto calibration completed");
                AutoOutcome::Offset(offset)
            }
            Err(err) => {
                tracing::warn!(%err, "auto calibration samples do not pair up");
                AutoOutcome::SampleMismatch {
                    beats: self.beat_instants.len(),
                    taps: self.tap_instants.len(),
                    expected: self.beat_instants.len().saturating_sub(1),
                }
            }
        };
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockSource, ManualClock};

    fn calibrator(intro: u32, test: u32) -> AutoCalibrator {
        AutoCalibrator::new(&AutoCalibrationConfig {
            bpm: 60.0,
            intro_beat_count: intro,
            test_length_in_beats: test,
        })
        .unwrap()
    }

    #[test]
    fn averages_paired_offsets() {
        let offset = estimate_offset(&[0.0, 1.0, 2.0, 3.0], &[0.05, 1.02, 1.98]).unwrap();
        assert!((offset - 0.0167).abs() < 1e-3);
    }

    #[test]
    fn refuses_mismatched_samples() {
        let err = estimate_offset(&[0.0, 1.0, 2.0, 3.0], &[0.05, 1.02]).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::SampleMismatch {
                beats: 4,
                taps: 2,
                expected: 3
            }
        ));
        assert!(err.is_recoverable());
        assert!(estimate_offset(&[], &[]).is_err());
        assert!(estimate_offset(&[0.0], &[]).is_err());
    }

    #[test]
    fn runs_countdown_then_records() {
        let clock = ManualClock::new();
        let mut auto = calibrator(2, 3);
        assert_eq!(auto.tick(clock.now(), true).phase, AutoPhase::WaitingToStart);

        auto.start(clock.now());
        let mut clicks = 0;
        let dt = 0.01;
        let mut completed = false;
        for step in 1..=700 {
            let now = clock.now();
            let elapsed = now.seconds();
            // Tap 30ms late after every recorded beat except the last.
            let phase_in_beat = elapsed - elapsed.floor();
            let tapped = (2.0..5.0).contains(&elapsed) && (phase_in_beat - 0.03).abs() < dt / 2.0;
            let tick = auto.tick(now, tapped);
            if tick.metronome {
                clicks += 1;
            }
            if elapsed < 2.0 {
                assert!(!tick.tap_recorded);
            }
            if tick.completed {
                completed = true;
                break;
            }
            clock.set(step as f64 * dt);
        }

        assert!(completed);
        assert_eq!(clicks, 6);
        assert_eq!(auto.beat_instants().len(), 4);
        assert_eq!(auto.tap_instants().len(), 3);
        let offset = auto.outcome().unwrap().offset().unwrap();
        assert!((offset - 0.03).abs() < 0.011);
        assert!(auto.is_completed());
    }

    #[test]
    fn missing_taps_report_failure() {
        let clock = ManualClock::new();
        let mut auto = calibrator(1, 4);
        auto.start(clock.now());

        while !auto.is_completed() {
            clock.advance(0.05);
            let now = clock.now();
            // Only ever tap during the second recorded beat.
            let tapped = (2.0..2.06).contains(&now.seconds());
            auto.tick(now, tapped);
        }

        let outcome = auto.outcome().unwrap();
        assert!(matches!(outcome, AutoOutcome::SampleMismatch { expected: 4, .. }));
        assert!(outcome.offset().is_err());
    }

    #[test]
    fn ignores_ticks_after_completion() {
        let clock = ManualClock::new();
        let mut auto = calibrator(0, 1);
        auto.start(clock.now());
        assert_eq!(auto.phase(), AutoPhase::Recording);

        auto.tick(clock.now(), false);
        clock.advance(0.5);
        auto.tick(clock.now(), true);
        clock.advance(0.5);
        assert!(auto.tick(clock.now(), false).completed);

        clock.advance(0.5);
        let tick = auto.tick(clock.now(), true);
        assert!(!tick.completed && !tick.tap_recorded);
        assert_eq!(auto.outcome(), Some(AutoOutcome::Offset(0.5)));
    }
}
