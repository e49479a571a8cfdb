use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{RunAggregator, RunSummary},
    clock::ClockReading,
    config::EngineConfig,
    hit_window::{HitWindow, WindowTransition},
    input::{Control, InputFrame},
    latency::{Adjustment, LatencyOffset},
    scheduler::{
        BeatMatchStrategy, ChartStrategy, EventScheduler, Judgement, Prompt, SpawnStrategy,
    },
    song::{Pitch, Song},
    timeline::Timeline,
    Result,
};

const HIT_SHAKE_DURATION: f64 = 0.1;
const HIT_SHAKE_MAGNITUDE: f32 = 0.05;

/// Fire-and-forget request for the presentation layer. The engine never
/// waits for an effect to finish.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "effect")]
pub enum EffectRequest {
    WindowActivated { pitch: Pitch },
    WindowDeactivated { pitch: Pitch },
    /// Fade the prompt out over `linger` seconds.
    PromptHit { pitch: Pitch, prompt: u64, linger: f64 },
    PromptMissed { pitch: Pitch, prompt: u64 },
    Shake { duration: f64, magnitude: f32 },
    Metronome,
    OffsetChanged { offset: f64 },
}

/// Everything one tick changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub position_seconds: Option<f64>,
    pub position_beats: Option<f64>,
    pub spawned: usize,
    pub judgements: Vec<Judgement>,
    pub effects: Vec<EffectRequest>,
    pub completed: bool,
}

/// How a run decides what to spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Spawn the song's charted notes.
    Chart,
    /// Spawn one prompt per lane on every beat.
    BeatMatch,
}

/// One playthrough of a song: a fresh timeline, hit windows and scheduler
/// seeded with a latency offset. Never reused; restarting means building a
/// new run.
#[derive(Debug)]
pub struct Run {
    mode: RunMode,
    timeline: Timeline,
    windows: Vec<HitWindow>,
    scheduler: EventScheduler,
    duration_in_beats: f64,
    live_adjustment: bool,
    clear_prompts_on_adjust: bool,
    last_tick: Option<ClockReading>,
    song_ended: bool,
    completed: bool,
}

impl Run {
    /// Refuses to build if the lanes are misconfigured or a note targets a
    /// lane no window serves.
    pub fn new(song: &Song, mode: RunMode, config: &EngineConfig, latency: LatencyOffset) -> Result<Self> {
        let lanes = config.lane_pitches();
        let strategy: Box<dyn SpawnStrategy> = match mode {
            RunMode::Chart => {
                song.validate_lanes(&lanes)?;
                Box::new(ChartStrategy::new(song))
            }
            RunMode::BeatMatch => Box::new(BeatMatchStrategy::new(
                song.duration_in_beats,
                config.beat_match.pause_before_spawning,
                lanes.clone(),
            )),
        };

        let timeline = Timeline::new(song.bpm, latency)?;
        let scheduler = EventScheduler::new(
            strategy,
            timeline.seconds_per_beat(),
            &config.prompt,
            &config.hit_window,
            &lanes,
        )?;
        let windows = config
            .lanes
            .iter()
            .map(|lane| HitWindow::new(lane.pitch, lane.key.clone(), &config.hit_window))
            .collect();

        Ok(Self {
            mode,
            timeline,
            windows,
            scheduler,
            duration_in_beats: song.duration_in_beats,
            live_adjustment: false,
            clear_prompts_on_adjust: config.latency.clear_prompts_on_adjust,
            last_tick: None,
            song_ended: false,
            completed: false,
        })
    }

    /// Lets the player nudge the offset with the offset controls mid-run.
    pub fn with_live_adjustment(mut self, enabled: bool) -> Self {
        self.live_adjustment = enabled;
        self
    }

    pub fn start(&mut self, now: ClockReading) {
        tracing::info!(
            mode = ?self.mode,
            offset = self.timeline.latency().seconds(),
            beats = self.duration_in_beats,
            "run started"
        );
        self.timeline.start(now);
        self.last_tick = Some(now);
    }

    pub fn is_started(&self) -> bool {
        self.timeline.is_started()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn started_at(&self) -> Option<ClockReading> {
        self.timeline.started_at()
    }

    pub fn latency(&self) -> LatencyOffset {
        *self.timeline.latency()
    }

    pub fn windows(&self) -> &[HitWindow] {
        &self.windows
    }

    pub fn live_prompts(&self) -> &[Prompt] {
        self.scheduler.live_prompts()
    }

    pub fn spawned(&self) -> usize {
        self.scheduler.spawned()
    }

    pub fn aggregator(&self) -> RunAggregator<'_> {
        RunAggregator::new(&self.windows, self.scheduler.prompt_total())
    }

    pub fn summary(&self) -> RunSummary {
        self.aggregator().summary()
    }

    /// One logical frame: input, timeline, spawning, prompts, then the
    /// windows' debounce countdown.
    pub fn tick(&mut self, now: ClockReading, input: &InputFrame) -> Result<TickReport> {
        let mut report = TickReport::default();
        let Some(previous) = self.last_tick else {
            return Ok(report);
        };
        let delta = now.since(previous).max(0.0);
        self.last_tick = Some(now);

        if self.live_adjustment {
            self.apply_adjustments(input, &mut report);
        }
        for window in &mut self.windows {
            let pressed = input.is_pressed(Control::Lane(window.pitch()));
            match window.sample_input(pressed, now) {
                Some(WindowTransition::Activated) => report
                    .effects
                    .push(EffectRequest::WindowActivated { pitch: window.pitch() }),
                Some(WindowTransition::Deactivated) => report
                    .effects
                    .push(EffectRequest::WindowDeactivated { pitch: window.pitch() }),
                None => {}
            }
        }

        let Some(position) = self.timeline.position_seconds(now) else {
            return Ok(report);
        };
        let beats = position / self.timeline.seconds_per_beat();
        report.position_seconds = Some(position);
        report.position_beats = Some(beats);

        report.spawned = self.scheduler.spawn_due(position, now)?;

        let judgements = self.scheduler.update_prompts(&mut self.windows, now, delta);
        self.record_judgements(judgements, &mut report);

        for window in &mut self.windows {
            window.decrement(delta);
        }

        if !self.song_ended && beats >= self.duration_in_beats {
            tracing::debug!(beats, "song reached its end");
            self.song_ended = true;
        }
        if self.song_ended && !self.completed && self.scheduler.is_drained() {
            let summary = self.summary();
            tracing::info!(
                hit = summary.total_hit,
                missed = summary.total_missed,
                hit_percentage = summary.hit_percentage,
                "run completed"
            );
            self.completed = true;
        }
        report.completed = self.completed;

        Ok(report)
    }

    fn apply_adjustments(&mut self, input: &InputFrame, report: &mut TickReport) {
        let mut changed = false;
        for (control, adjustment) in [
            (Control::IncreaseOffset, Adjustment::Increase),
            (Control::DecreaseOffset, Adjustment::Decrease),
        ] {
            if input.is_pressed(control) && self.timeline.latency_mut().adjust(adjustment) {
                changed = true;
            }
        }
        if !changed {
            return;
        }

        let offset = self.timeline.latency().seconds();
        tracing::debug!(offset, "latency offset adjusted");
        report.effects.push(EffectRequest::OffsetChanged { offset });
        if self.clear_prompts_on_adjust {
            let cleared = self.scheduler.clear_prompts(&mut self.windows);
            self.record_judgements(cleared, report);
        }
    }

    fn record_judgements(&self, judgements: Vec<Judgement>, report: &mut TickReport) {
        for judgement in &judgements {
            if judgement.hit {
                report.effects.push(EffectRequest::PromptHit {
                    pitch: judgement.pitch,
                    prompt: judgement.prompt,
                    linger: self.scheduler.hit_linger(),
                });
                report.effects.push(EffectRequest::Shake {
                    duration: HIT_SHAKE_DURATION,
                    magnitude: HIT_SHAKE_MAGNITUDE,
                });
            } else {
                report.effects.push(EffectRequest::PromptMissed {
                    pitch: judgement.pitch,
                    prompt: judgement.prompt,
                });
            }
        }
        report.judgements.extend(judgements);
    }
}
