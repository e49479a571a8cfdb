use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{CalibrationRunStats, ResultsTable, Technique},
    auto::{AutoCalibrator, AutoOutcome, AutoPhase},
    clock::ClockReading,
    config::EngineConfig,
    input::{Control, InputFrame},
    latency::LatencyOffset,
    run::{EffectRequest, Run, RunMode, TickReport},
    song::Song,
    CalibrationError, Result,
};

/// Step of a calibration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "technique")]
pub enum Phase {
    /// Unscored warm-up run so the operator learns the controls.
    Acclimation,
    /// Scored run without any latency compensation.
    Baseline,
    Calibration(Technique),
    Scoring(Technique),
    Results,
}

/// The order a session walks through.
pub const PHASE_ORDER: [Phase; 9] = [
    Phase::Acclimation,
    Phase::Baseline,
    Phase::Calibration(Technique::Gameplay),
    Phase::Scoring(Technique::Gameplay),
    Phase::Calibration(Technique::BeatMatching),
    Phase::Scoring(Technique::BeatMatching),
    Phase::Calibration(Technique::AutoCalculated),
    Phase::Scoring(Technique::AutoCalculated),
    Phase::Results,
];

/// Songs the session plays in its different phases.
#[derive(Debug, Clone)]
pub struct SessionSongs {
    /// Played by the baseline and every scoring run.
    pub scoring: Song,
    /// Played during acclimation and while tuning the offset by hand.
    pub calibration: Song,
    /// Supplies tempo and length for the beat-matching calibration.
    pub beat_match: Song,
}

enum ActiveRun {
    Song(Run),
    Auto(AutoCalibrator),
    Idle,
}

/// Carries the latency offset and the results table across the runs of a
/// session. Runs never coexist: each phase builds a fresh one seeded with a
/// copy of the carried offset, and the offset is copied back out when the
/// phase ends.
pub struct Session {
    config: EngineConfig,
    songs: SessionSongs,
    offset: LatencyOffset,
    results: ResultsTable,
    in_progress: Option<(Technique, CalibrationRunStats)>,
    phase_index: usize,
    active: ActiveRun,
    /// First start of the current phase. Survives restarts.
    phase_entered_at: Option<ClockReading>,
    last_tick: Option<ClockReading>,
}

impl Session {
    pub fn new(config: EngineConfig, songs: SessionSongs) -> Result<Self> {
        config.validate()?;
        let lanes = config.lane_pitches();
        songs.scoring.validate_lanes(&lanes)?;
        songs.calibration.validate_lanes(&lanes)?;

        let offset = LatencyOffset::new(&config.latency)?;
        let mut session = Self {
            config,
            songs,
            offset,
            results: ResultsTable::new(),
            in_progress: None,
            phase_index: 0,
            active: ActiveRun::Idle,
            phase_entered_at: None,
            last_tick: None,
        };
        session.active = session.build_active(session.offset.zeroed())?;
        Ok(session)
    }

    pub fn phase(&self) -> Phase {
        PHASE_ORDER[self.phase_index]
    }

    pub fn results(&self) -> &ResultsTable {
        &self.results
    }

    /// The carried offset, or the live one while a run adjusts it.
    pub fn current_offset(&self) -> f64 {
        match &self.active {
            ActiveRun::Song(run) => run.latency().seconds(),
            _ => self.offset.seconds(),
        }
    }

    pub fn auto_outcome(&self) -> Option<AutoOutcome> {
        match &self.active {
            ActiveRun::Auto(auto) => auto.outcome(),
            _ => None,
        }
    }

    pub fn active_run(&self) -> Option<&Run> {
        match &self.active {
            ActiveRun::Song(run) => Some(run),
            _ => None,
        }
    }

    /// Stores a completed run's offset as the carried value, rounded and
    /// clamped into bounds.
    pub fn apply_offset_from_completed_run(&mut self, value: f64) -> f64 {
        if self.offset.set(value) {
            tracing::warn!(
                requested = value,
                applied = self.offset.seconds(),
                "offset clamped into configured bounds"
            );
        }
        self.offset.seconds()
    }

    pub fn record_stats(&mut self, technique: Technique, stats: CalibrationRunStats) {
        tracing::info!(%technique, ?stats, "recorded calibration stats");
        self.results.record(technique, stats);
    }

    pub fn start(&mut self, now: ClockReading) {
        self.phase_entered_at.get_or_insert(now);
        self.last_tick = Some(now);
        match &mut self.active {
            ActiveRun::Song(run) => run.start(now),
            ActiveRun::Auto(auto) => auto.start(now),
            ActiveRun::Idle => {}
        }
    }

    pub fn tick(&mut self, now: ClockReading, input: &InputFrame) -> Result<TickReport> {
        self.last_tick = Some(now);
        match &mut self.active {
            ActiveRun::Song(run) => run.tick(now, input),
            ActiveRun::Auto(auto) => {
                let tick = auto.tick(now, input.is_pressed(Control::Tap));
                let mut report = TickReport {
                    completed: tick.completed || tick.phase == AutoPhase::Completed,
                    ..TickReport::default()
                };
                if tick.metronome {
                    report.effects.push(EffectRequest::Metronome);
                }
                Ok(report)
            }
            ActiveRun::Idle => Ok(TickReport::default()),
        }
    }

    /// True once the active run has completed with a usable result.
    pub fn is_ready_to_advance(&self) -> bool {
        match &self.active {
            ActiveRun::Song(run) => run.is_completed(),
            ActiveRun::Auto(auto) => matches!(auto.outcome(), Some(AutoOutcome::Offset(_))),
            ActiveRun::Idle => false,
        }
    }

    /// Acclimation and the hand-tuned calibrations may be left at any time.
    pub fn can_skip(&self) -> bool {
        matches!(
            self.phase(),
            Phase::Acclimation
                | Phase::Calibration(Technique::Gameplay)
                | Phase::Calibration(Technique::BeatMatching)
        )
    }

    /// Closes the current phase, copying its offset and statistics out, and
    /// builds the next phase's run.
    pub fn advance(&mut self) -> Result<Phase> {
        let phase = self.phase();
        if phase == Phase::Results {
            return Err(CalibrationError::SessionFinished);
        }
        if !self.is_ready_to_advance() && !self.can_skip() {
            if let Some(outcome) = self.auto_outcome() {
                outcome.offset()?;
            }
            return Err(CalibrationError::NotReady);
        }

        self.finish_phase(phase)?;

        self.phase_index += 1;
        self.phase_entered_at = None;
        let next = self.phase();
        let seed = match next {
            Phase::Acclimation | Phase::Baseline | Phase::Calibration(_) => self.offset.zeroed(),
            Phase::Scoring(_) | Phase::Results => self.offset,
        };
        self.active = self.build_active(seed)?;
        tracing::info!(?next, offset = self.offset.seconds(), "advanced session");
        Ok(next)
    }

    /// Throws the active run away and builds a fresh one for the same phase.
    /// An offset tuned so far in this phase is kept, and so is the time
    /// already spent in it.
    pub fn restart(&mut self) -> Result<()> {
        let seed = match (&self.active, self.phase()) {
            (ActiveRun::Song(run), Phase::Calibration(_)) => run.latency(),
            (_, Phase::Acclimation | Phase::Baseline) => self.offset.zeroed(),
            _ => self.offset,
        };
        tracing::info!(phase = ?self.phase(), offset = seed.seconds(), "restarting phase");
        self.active = self.build_active(seed)?;
        Ok(())
    }

    fn finish_phase(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Acclimation | Phase::Results => {}
            Phase::Baseline => {
                let summary = self.song_run()?.summary();
                let mut stats = CalibrationRunStats::default();
                stats.apply_summary(&summary);
                self.record_stats(Technique::NoOffset, stats);
            }
            Phase::Calibration(technique) => {
                let duration = self.phase_duration();
                let offset = match &self.active {
                    ActiveRun::Song(run) => run.latency().seconds(),
                    ActiveRun::Auto(auto) => match auto.outcome() {
                        Some(outcome) => outcome.offset()?,
                        None => return Err(CalibrationError::NotReady),
                    },
                    ActiveRun::Idle => self.offset.seconds(),
                };
                let applied = self.apply_offset_from_completed_run(offset);
                self.in_progress = Some((
                    technique,
                    CalibrationRunStats {
                        duration,
                        latency_offset: applied,
                        ..CalibrationRunStats::default()
                    },
                ));
            }
            Phase::Scoring(technique) => {
                let summary = self.song_run()?.summary();
                let mut stats = match self.in_progress.take() {
                    Some((pending, stats)) if pending == technique => stats,
                    _ => CalibrationRunStats::default(),
                };
                stats.latency_offset = self.offset.seconds();
                stats.apply_summary(&summary);
                self.record_stats(technique, stats);
            }
        }
        Ok(())
    }

    fn song_run(&self) -> Result<&Run> {
        self.active_run()
            .ok_or_else(|| CalibrationError::msg("phase has no song run"))
    }

    /// Clock time since the phase was first started, across restarts.
    fn phase_duration(&self) -> f64 {
        match (self.phase_entered_at, self.last_tick) {
            (Some(start), Some(now)) => now.since(start).max(0.0),
            _ => 0.0,
        }
    }

    fn build_active(&self, seed: LatencyOffset) -> Result<ActiveRun> {
        let config = &self.config;
        let active = match self.phase() {
            Phase::Acclimation => ActiveRun::Song(Run::new(
                &self.songs.calibration,
                RunMode::Chart,
                config,
                seed.zeroed(),
            )?),
            Phase::Baseline | Phase::Scoring(Technique::NoOffset) => {
                ActiveRun::Song(Run::new(&self.songs.scoring, RunMode::Chart, config, seed.zeroed())?)
            }
            Phase::Scoring(_) => {
                ActiveRun::Song(Run::new(&self.songs.scoring, RunMode::Chart, config, seed)?)
            }
            Phase::Calibration(Technique::Gameplay) => ActiveRun::Song(
                Run::new(&self.songs.calibration, RunMode::Chart, config, seed)?
                    .with_live_adjustment(true),
            ),
            Phase::Calibration(Technique::BeatMatching) => ActiveRun::Song(
                Run::new(&self.songs.beat_match, RunMode::BeatMatch, config, seed)?
                    .with_live_adjustment(true),
            ),
            Phase::Calibration(Technique::AutoCalculated) => {
                ActiveRun::Auto(AutoCalibrator::new(&config.auto)?)
            }
            Phase::Calibration(Technique::NoOffset) => {
                return Err(CalibrationError::msg("the baseline has no calibration phase"))
            }
            Phase::Results => ActiveRun::Idle,
        };
        Ok(active)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase())
            .field("offset", &self.offset.seconds())
            .field("results", &self.results.len())
            .finish()
    }
}
