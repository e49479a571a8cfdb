use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    clock::ClockReading,
    config::{HitWindowConfig, PromptConfig},
    hit_window::{is_recorded, HitWindow, NO_OFFSET_RECORDED},
    song::{PendingNotes, Pitch, Song},
    CalibrationError, Result,
};

/// Timeline facts a strategy needs to decide when a prompt must spawn.
#[derive(Debug, Clone, Copy)]
pub struct SpawnTiming {
    pub seconds_per_beat: f64,
    pub travel_duration: f64,
}

/// One spawn: a prompt per listed lane, all due at `arrival_seconds`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnDecision {
    pub pitches: Vec<Pitch>,
    pub arrival_seconds: f64,
}

/// Decides what spawns next. Called repeatedly within a tick until it
/// returns `None`, so everything due on the same tick spawns together.
pub trait SpawnStrategy: fmt::Debug {
    fn next_spawn(&mut self, position_seconds: f64, timing: &SpawnTiming) -> Option<SpawnDecision>;

    /// Denominator for the run's hit percentage, given how many prompts have
    /// spawned so far.
    fn prompt_total(&self, spawned: usize) -> usize;

    /// Nothing further will ever spawn.
    fn is_exhausted(&self) -> bool;
}

/// Spawns the notes of a charted song in order.
#[derive(Debug, Clone)]
pub struct ChartStrategy {
    pending: PendingNotes,
    total: usize,
}

impl ChartStrategy {
    pub fn new(song: &Song) -> Self {
        Self {
            pending: song.pending_notes(),
            total: song.note_count(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl SpawnStrategy for ChartStrategy {
    fn next_spawn(&mut self, position_seconds: f64, timing: &SpawnTiming) -> Option<SpawnDecision> {
        let note = self.pending.peek()?;
        let arrival_seconds = note.beat_position * timing.seconds_per_beat;
        let spawn_seconds = arrival_seconds - timing.travel_duration;
        if position_seconds < spawn_seconds {
            return None;
        }

        let note = self.pending.pop()?;
        Some(SpawnDecision {
            pitches: vec![note.pitch],
            arrival_seconds,
        })
    }

    fn prompt_total(&self, _spawned: usize) -> usize {
        self.total
    }

    fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Spawns one prompt per lane on every beat, once an initial pause is over.
#[derive(Debug, Clone)]
pub struct BeatMatchStrategy {
    next_beat: u32,
    last_beat: u32,
    pause_before_spawning: f64,
    pitches: Vec<Pitch>,
}

impl BeatMatchStrategy {
    pub fn new(duration_in_beats: f64, pause_before_spawning: f64, pitches: Vec<Pitch>) -> Self {
        Self {
            next_beat: 0,
            last_beat: duration_in_beats.max(0.0).floor() as u32,
            pause_before_spawning,
            pitches,
        }
    }
}

impl SpawnStrategy for BeatMatchStrategy {
    fn next_spawn(&mut self, position_seconds: f64, timing: &SpawnTiming) -> Option<SpawnDecision> {
        loop {
            if self.next_beat > self.last_beat {
                return None;
            }

            let arrival_seconds = f64::from(self.next_beat) * timing.seconds_per_beat;
            if position_seconds < arrival_seconds - timing.travel_duration {
                return None;
            }

            // Beats whose spawn falls inside the pause are skipped, not deferred.
            self.next_beat += 1;
            if position_seconds >= self.pause_before_spawning {
                return Some(SpawnDecision {
                    pitches: self.pitches.clone(),
                    arrival_seconds,
                });
            }
        }
    }

    fn prompt_total(&self, spawned: usize) -> usize {
        spawned
    }

    fn is_exhausted(&self) -> bool {
        self.next_beat > self.last_beat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptOutcome {
    Pending,
    Hit,
    Missed,
}

/// A moving representation of one note, judged against one hit window.
#[derive(Debug, Clone)]
pub struct Prompt {
    id: u64,
    pitch: Pitch,
    window: usize,
    spawned_at: ClockReading,
    arrives_at: ClockReading,
    closest_offset: f64,
    outcome: PromptOutcome,
    arrived_for: f64,
    linger: f64,
}

impl Prompt {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pitch(&self) -> Pitch {
        self.pitch
    }

    pub fn spawned_at(&self) -> ClockReading {
        self.spawned_at
    }

    pub fn arrives_at(&self) -> ClockReading {
        self.arrives_at
    }

    pub fn outcome(&self) -> PromptOutcome {
        self.outcome
    }

    /// Best-timed activation offset so far, or [`NO_OFFSET_RECORDED`].
    pub fn closest_offset(&self) -> f64 {
        self.closest_offset
    }

    /// Unclamped travel progress: 0 at spawn, 1 at arrival, beyond 1 when
    /// the prompt overshoots its window.
    pub fn progress(&self, now: ClockReading) -> f64 {
        now.since(self.spawned_at) / self.arrives_at.since(self.spawned_at)
    }

    pub fn has_arrived(&self, now: ClockReading) -> bool {
        self.progress(now) >= 1.0
    }

    /// Linear, unclamped interpolation between spawn and target points.
    pub fn position(&self, now: ClockReading, from: [f32; 2], to: [f32; 2]) -> [f32; 2] {
        let t = self.progress(now) as f32;
        [from[0] + (to[0] - from[0]) * t, from[1] + (to[1] - from[1]) * t]
    }

    fn capture_offset(&mut self, now: ClockReading) {
        let sample = now.since(self.arrives_at);
        if sample.abs() < self.closest_offset.abs() {
            self.closest_offset = sample;
        }
    }

    fn recorded_offset(&self) -> Option<f64> {
        is_recorded(self.closest_offset).then_some(self.closest_offset)
    }
}

/// Outcome of one prompt, reported once when it is judged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub prompt: u64,
    pub pitch: Pitch,
    pub hit: bool,
    pub closest_offset: f64,
}

/// Spawns prompts so they reach their window on time, moves them, captures
/// their best offset and judges them.
#[derive(Debug)]
pub struct EventScheduler {
    strategy: Box<dyn SpawnStrategy>,
    timing: SpawnTiming,
    hit_tolerance: f64,
    exist_after_arrival: f64,
    exist_after_hit: f64,
    lanes: HashMap<Pitch, usize>,
    prompts: Vec<Prompt>,
    spawned: usize,
    next_id: u64,
}

impl EventScheduler {
    /// `lanes` lists the pitch of each hit window, in window order.
    pub fn new(
        strategy: Box<dyn SpawnStrategy>,
        seconds_per_beat: f64,
        prompt: &PromptConfig,
        window: &HitWindowConfig,
        lanes: &[Pitch],
    ) -> Result<Self> {
        crate::song::validate_lane_set(lanes)?;
        if !(prompt.travel_duration > 0.0) {
            return Err(CalibrationError::InvalidParameter {
                name: "prompt.travel_duration",
                value: prompt.travel_duration,
            });
        }

        Ok(Self {
            strategy,
            timing: SpawnTiming {
                seconds_per_beat,
                travel_duration: prompt.travel_duration,
            },
            hit_tolerance: window.hit_tolerance,
            exist_after_arrival: prompt.exist_after_arrival_duration,
            exist_after_hit: prompt.exist_after_hit_duration,
            lanes: lanes
                .iter()
                .enumerate()
                .map(|(index, pitch)| (*pitch, index))
                .collect(),
            prompts: Vec::new(),
            spawned: 0,
            next_id: 0,
        })
    }

    /// Spawns every prompt due at `position_seconds`. Each targets
    /// `now + travel_duration`. Returns how many spawned.
    pub fn spawn_due(&mut self, position_seconds: f64, now: ClockReading) -> Result<usize> {
        let mut count = 0;
        while let Some(decision) = self.strategy.next_spawn(position_seconds, &self.timing) {
            for pitch in decision.pitches {
                let window = *self.lanes.get(&pitch).ok_or(CalibrationError::UnmappedPitch {
                    pitch,
                    beat: decision.arrival_seconds / self.timing.seconds_per_beat,
                })?;

                let prompt = Prompt {
                    id: self.next_id,
                    pitch,
                    window,
                    spawned_at: now,
                    arrives_at: now.offset_by(self.timing.travel_duration),
                    closest_offset: NO_OFFSET_RECORDED,
                    outcome: PromptOutcome::Pending,
                    arrived_for: 0.0,
                    linger: 0.0,
                };
                tracing::debug!(
                    id = prompt.id,
                    %pitch,
                    arrival = decision.arrival_seconds,
                    "spawned prompt"
                );
                self.prompts.push(prompt);
                self.next_id += 1;
                self.spawned += 1;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Advances every live prompt by one tick against the windows' current
    /// state and removes prompts whose grace period has run out.
    pub fn update_prompts(
        &mut self,
        windows: &mut [HitWindow],
        now: ClockReading,
        delta: f64,
    ) -> Vec<Judgement> {
        let mut judgements = Vec::new();

        for prompt in &mut self.prompts {
            let Some(window) = windows.get_mut(prompt.window) else {
                continue;
            };

            match prompt.outcome {
                PromptOutcome::Pending => {
                    if window.activated_this_tick() {
                        prompt.capture_offset(now);
                    }

                    let overlapping = now.since(prompt.arrives_at).abs() <= self.hit_tolerance;
                    if window.is_active() && overlapping {
                        window.register_result(true, prompt.recorded_offset());
                        prompt.outcome = PromptOutcome::Hit;
                        prompt.linger = self.exist_after_hit;
                        judgements.push(judge(prompt, true));
                    } else if prompt.has_arrived(now) {
                        // Only time past arrival counts towards the grace period.
                        let since_arrival = now.since(prompt.arrives_at).max(0.0);
                        prompt.arrived_for += delta.min(since_arrival);
                        if prompt.arrived_for >= self.exist_after_arrival {
                            window.register_result(false, prompt.recorded_offset());
                            prompt.outcome = PromptOutcome::Missed;
                            judgements.push(judge(prompt, false));
                        }
                    }
                }
                PromptOutcome::Hit => prompt.linger -= delta,
                PromptOutcome::Missed => {}
            }
        }

        self.prompts.retain(|prompt| match prompt.outcome {
            PromptOutcome::Pending => true,
            PromptOutcome::Hit => prompt.linger > 0.0,
            PromptOutcome::Missed => false,
        });

        judgements
    }

    /// Removes every live prompt. Prompts still awaiting judgement are booked
    /// as misses so none vanish unaccounted.
    pub fn clear_prompts(&mut self, windows: &mut [HitWindow]) -> Vec<Judgement> {
        let mut judgements = Vec::new();
        for prompt in self.prompts.drain(..) {
            if prompt.outcome != PromptOutcome::Pending {
                continue;
            }
            if let Some(window) = windows.get_mut(prompt.window) {
                window.register_result(false, prompt.recorded_offset());
            }
            judgements.push(judge(&prompt, false));
        }
        judgements
    }

    pub fn live_prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn spawned(&self) -> usize {
        self.spawned
    }

    pub fn prompt_total(&self) -> usize {
        self.strategy.prompt_total(self.spawned)
    }

    /// How long a hit prompt stays around for its fade-out.
    pub fn hit_linger(&self) -> f64 {
        self.exist_after_hit
    }

    /// Nothing left to spawn and nothing left on screen.
    pub fn is_drained(&self) -> bool {
        self.strategy.is_exhausted() && self.prompts.is_empty()
    }
}

fn judge(prompt: &Prompt, hit: bool) -> Judgement {
    Judgement {
        prompt: prompt.id,
        pitch: prompt.pitch,
        hit,
        closest_offset: prompt.closest_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::Note;

    const LANES: [Pitch; 2] = [Pitch::Low, Pitch::High];

    fn window_config() -> HitWindowConfig {
        HitWindowConfig {
            activation_duration: 0.1,
            refractory_duration: 0.1,
            hit_tolerance: 0.05,
        }
    }

    fn prompt_config() -> PromptConfig {
        PromptConfig {
            travel_duration: 1.0,
            exist_after_arrival_duration: 0.2,
            exist_after_hit_duration: 0.0,
        }
    }

    fn windows() -> Vec<HitWindow> {
        LANES
            .iter()
            .map(|pitch| HitWindow::new(*pitch, pitch.to_string(), &window_config()))
            .collect()
    }

    fn chart_scheduler(notes: Vec<Note>) -> EventScheduler {
        // 60 BPM: one beat per second.
        let song = Song::new(60.0, 16.0, notes).unwrap();
        EventScheduler::new(
            Box::new(ChartStrategy::new(&song)),
            song.seconds_per_beat(),
            &prompt_config(),
            &window_config(),
            &LANES,
        )
        .unwrap()
    }

    #[test]
    fn spawns_exactly_one_travel_duration_ahead() {
        let mut scheduler = chart_scheduler(vec![Note::new(Pitch::Low, 4.0)]);

        for position in [0.0, 2.5, 2.99] {
            let now = ClockReading::from_seconds(position);
            assert_eq!(scheduler.spawn_due(position, now).unwrap(), 0);
        }

        let now = ClockReading::from_seconds(3.0);
        assert_eq!(scheduler.spawn_due(3.0, now).unwrap(), 1);
        let prompt = &scheduler.live_prompts()[0];
        assert_eq!(prompt.arrives_at(), ClockReading::from_seconds(4.0));
        assert_eq!(scheduler.spawn_due(3.5, now).unwrap(), 0);
    }

    #[test]
    fn notes_due_together_spawn_on_the_same_tick() {
        let mut scheduler = chart_scheduler(vec![
            Note::new(Pitch::Low, 2.0),
            Note::new(Pitch::High, 2.0),
            Note::new(Pitch::Low, 5.0),
        ]);
        let now = ClockReading::from_seconds(1.2);
        assert_eq!(scheduler.spawn_due(1.2, now).unwrap(), 2);
        assert_eq!(scheduler.prompt_total(), 3);
    }

    #[test]
    fn progress_overshoots_past_arrival() {
        let mut scheduler = chart_scheduler(vec![Note::new(Pitch::Low, 1.0)]);
        scheduler.spawn_due(0.0, ClockReading::ZERO).unwrap();
        let prompt = &scheduler.live_prompts()[0];

        assert_eq!(prompt.progress(ClockReading::from_seconds(0.5)), 0.5);
        assert!(!prompt.has_arrived(ClockReading::from_seconds(0.99)));
        assert!(prompt.has_arrived(ClockReading::from_seconds(1.0)));
        assert_eq!(
            prompt.position(ClockReading::from_seconds(1.5), [0.0, 10.0], [0.0, 0.0]),
            [0.0, -5.0]
        );
    }

    #[test]
    fn keeps_the_smallest_activation_offset() {
        let mut scheduler = chart_scheduler(vec![Note::new(Pitch::Low, 2.0)]);
        let mut windows = windows();
        scheduler.spawn_due(1.0, ClockReading::from_seconds(1.0)).unwrap();

        let config = window_config();
        // Activations at -0.3, +0.06 and +0.3, all outside the hit tolerance.
        for (at, expected) in [(1.7, -0.3), (2.06, 0.06), (2.3, 0.06)] {
            windows[0] = HitWindow::new(Pitch::Low, "low", &config);
            let now = ClockReading::from_seconds(at);
            windows[0].sample_input(true, now);
            let judgements = scheduler.update_prompts(&mut windows, now, 0.0);
            assert!(judgements.is_empty());
            let closest = scheduler.live_prompts()[0].closest_offset();
            assert!((closest - expected).abs() < 1e-9, "{at}: {closest}");
        }
    }

    #[test]
    fn hit_registers_with_captured_offset() {
        let mut scheduler = chart_scheduler(vec![Note::new(Pitch::High, 2.0)]);
        let mut windows = windows();
        scheduler.spawn_due(1.0, ClockReading::from_seconds(1.0)).unwrap();

        let now = ClockReading::from_seconds(1.98);
        windows[1].sample_input(true, now);
        let judgements = scheduler.update_prompts(&mut windows, now, 0.016);

        assert_eq!(judgements.len(), 1);
        assert!(judgements[0].hit);
        assert!((judgements[0].closest_offset + 0.02).abs() < 1e-9);
        assert_eq!(windows[1].hit_count(), 1);
        assert_eq!(windows[1].closest_offsets().len(), 1);
        // No grace period configured, so the prompt is gone already.
        assert!(scheduler.live_prompts().is_empty());
    }

    #[test]
    fn unanswered_prompt_misses_after_grace_period() {
        let mut scheduler = chart_scheduler(vec![Note::new(Pitch::Low, 2.0)]);
        let mut windows = windows();
        scheduler.spawn_due(1.0, ClockReading::from_seconds(1.0)).unwrap();

        let mut judgements = Vec::new();
        let mut now = 1.0;
        while judgements.is_empty() && now < 4.0 {
            now += 0.05;
            judgements = scheduler.update_prompts(&mut windows, ClockReading::from_seconds(now), 0.05);
        }

        assert_eq!(judgements.len(), 1);
        assert!(!judgements[0].hit);
        assert_eq!(judgements[0].closest_offset, NO_OFFSET_RECORDED);
        assert!(now >= 2.0 + 0.2 - 0.05 - 1e-9);
        assert_eq!(windows[0].miss_count(), 1);
        assert!(windows[0].closest_offsets().is_empty());
        assert!(scheduler.is_drained());
    }

    #[test]
    fn grace_period_starts_at_arrival_not_at_the_tick() {
        let mut scheduler = chart_scheduler(vec![Note::new(Pitch::Low, 2.0)]);
        let mut windows = windows();
        scheduler.spawn_due(1.0, ClockReading::from_seconds(1.0)).unwrap();

        // Coarse ticks that straddle the arrival at 2.0.
        for at in [1.99, 2.09, 2.19] {
            let judgements = scheduler.update_prompts(&mut windows, ClockReading::from_seconds(at), 0.1);
            assert!(judgements.is_empty(), "missed early at {at}");
        }
        let judgements = scheduler.update_prompts(&mut windows, ClockReading::from_seconds(2.29), 0.1);
        assert_eq!(judgements.len(), 1);
        assert!(!judgements[0].hit);
    }

    #[test]
    fn clearing_books_pending_prompts_as_misses() {
        let mut scheduler = chart_scheduler(vec![
            Note::new(Pitch::Low, 2.0),
            Note::new(Pitch::High, 2.5),
        ]);
        let mut windows = windows();
        scheduler.spawn_due(1.5, ClockReading::from_seconds(1.5)).unwrap();

        let judgements = scheduler.clear_prompts(&mut windows);
        assert_eq!(judgements.len(), 2);
        assert!(scheduler.live_prompts().is_empty());
        assert_eq!(windows[0].miss_count() + windows[1].miss_count(), 2);
    }

    #[test]
    fn beat_match_spawns_every_lane_after_the_pause() {
        let strategy = BeatMatchStrategy::new(8.0, 2.0, LANES.to_vec());
        let mut scheduler = EventScheduler::new(
            Box::new(strategy),
            1.0,
            &prompt_config(),
            &window_config(),
            &LANES,
        )
        .unwrap();

        // Beats 0..=2 fall due before the pause ends and are skipped.
        assert_eq!(scheduler.spawn_due(1.9, ClockReading::from_seconds(1.9)).unwrap(), 0);
        // Beat 3 spawns for both lanes.
        assert_eq!(scheduler.spawn_due(2.0, ClockReading::from_seconds(2.0)).unwrap(), 2);
        assert_eq!(scheduler.spawn_due(2.5, ClockReading::from_seconds(2.5)).unwrap(), 0);
        // Beats 4..=8.
        assert_eq!(scheduler.spawn_due(20.0, ClockReading::from_seconds(20.0)).unwrap(), 10);
        assert_eq!(scheduler.prompt_total(), 12);
        assert!(!scheduler.is_drained());
    }

    #[test]
    fn rejects_a_strategy_that_targets_an_unknown_lane() {
        let strategy = BeatMatchStrategy::new(4.0, 0.0, vec![Pitch::Mid]);
        let mut scheduler = EventScheduler::new(
            Box::new(strategy),
            1.0,
            &prompt_config(),
            &window_config(),
            &LANES,
        )
        .unwrap();
        assert!(matches!(
            scheduler.spawn_due(0.0, ClockReading::ZERO),
            Err(CalibrationError::UnmappedPitch { pitch: Pitch::Mid, .. })
        ));
    }
}
