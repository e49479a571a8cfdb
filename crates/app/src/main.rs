mod script;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use latency_calibration_core::{
    AutoCalibrator, AutoOutcome, CalibrationRunStats, ClockReading, ClockSource, Control,
    DeviceClock, EngineConfig, InputFrame, KeyMap, LatencyOffset, Run, RunMode, RunSummary, Song,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::script::InputScript;

fn main() -> latency_calibration_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Defaults => print_json(&EngineConfig::default()),
        Commands::Validate { song, config } => run_validate(&song, config.as_deref()),
        Commands::Simulate {
            song,
            script,
            config,
            offset,
            beat_match,
            calibrate,
            realtime,
        } => run_simulate(
            &song,
            &script,
            config.as_deref(),
            offset,
            RunOptions {
                beat_match,
                calibrate,
                realtime,
            },
        ),
        Commands::Auto {
            script,
            config,
            realtime,
        } => run_auto(&script, config.as_deref(), realtime),
    }
}

/// Which clock a script is replayed against.
enum Pacing {
    /// Manual clock from zero, as fast as possible.
    Instant,
    Realtime(DeviceClock),
}

impl Pacing {
    fn new(realtime: bool) -> Self {
        if realtime {
            Pacing::Realtime(DeviceClock::start())
        } else {
            Pacing::Instant
        }
    }

    fn now(&self) -> ClockReading {
        match self {
            Pacing::Instant => ClockReading::ZERO,
            Pacing::Realtime(clock) => clock.now(),
        }
    }

    fn replay<F>(
        &self,
        script: &InputScript,
        keymap: &KeyMap,
        step: F,
    ) -> latency_calibration_core::Result<ClockReading>
    where
        F: FnMut(ClockReading, &InputFrame) -> latency_calibration_core::Result<bool>,
    {
        match self {
            Pacing::Instant => script.replay(keymap, step),
            Pacing::Realtime(clock) => {
                tracing::info!(tick_rate = script.tick_rate, "replaying in real time");
                script.replay_realtime(clock, keymap, step)
            }
        }
    }
}

#[derive(Serialize)]
struct SongReport<'a> {
    track: Option<&'a str>,
    bpm: f64,
    duration_in_beats: f64,
    duration_seconds: f64,
    notes: usize,
}

fn run_validate(song: &Path, config: Option<&Path>) -> latency_calibration_core::Result<()> {
    let config = load_config(config)?;
    let song = Song::load(song)?;
    song.validate_lanes(&config.lane_pitches())?;
    tracing::info!(notes = song.note_count(), "song is playable");

    print_json(&SongReport {
        track: song.track.as_deref(),
        bpm: song.bpm,
        duration_in_beats: song.duration_in_beats,
        duration_seconds: song.duration_in_beats * song.seconds_per_beat(),
        notes: song.note_count(),
    })
}

#[derive(Serialize)]
struct SimulationReport {
    mode: RunMode,
    completed: bool,
    summary: RunSummary,
    stats: CalibrationRunStats,
}

#[derive(Debug, Clone, Copy)]
struct RunOptions {
    beat_match: bool,
    calibrate: bool,
    realtime: bool,
}

fn run_simulate(
    song: &Path,
    script: &Path,
    config: Option<&Path>,
    offset: Option<f64>,
    options: RunOptions,
) -> latency_calibration_core::Result<()> {
    let config = load_config(config)?;
    let song = Song::load(song)?;
    let script = InputScript::load(script)?;

    let mut latency = LatencyOffset::new(&config.latency)?;
    if let Some(offset) = offset {
        if latency.set(offset) {
            tracing::warn!(
                requested = offset,
                applied = latency.seconds(),
                "offset clamped into configured bounds"
            );
        }
    }

    let mode = if options.beat_match { RunMode::BeatMatch } else { RunMode::Chart };
    let mut run = Run::new(&song, mode, &config, latency)?.with_live_adjustment(options.calibrate);
    let keymap = KeyMap::from_config(&config);

    let pacing = Pacing::new(options.realtime);
    run.start(pacing.now());
    let ended = pacing.replay(&script, &keymap, |now, frame| Ok(run.tick(now, frame)?.completed))?;
    let elapsed = run.started_at().map_or(0.0, |start| ended.since(start));

    let summary = run.summary();
    let mut stats = CalibrationRunStats {
        duration: elapsed,
        latency_offset: run.latency().seconds(),
        ..CalibrationRunStats::default()
    };
    stats.apply_summary(&summary);

    print_json(&SimulationReport {
        mode,
        completed: run.is_completed(),
        summary,
        stats,
    })
}

#[derive(Serialize)]
struct AutoReport<'a> {
    beats: &'a [f64],
    taps: &'a [f64],
    outcome: Option<AutoOutcome>,
    /// Estimate after rounding and clamping into the configured bounds.
    applied_offset: Option<f64>,
}

fn run_auto(
    script: &Path,
    config: Option<&Path>,
    realtime: bool,
) -> latency_calibration_core::Result<()> {
    let config = load_config(config)?;
    let script = InputScript::load(script)?;
    let keymap = KeyMap::from_config(&config);
    let mut auto = AutoCalibrator::new(&config.auto)?;

    let pacing = Pacing::new(realtime);
    auto.start(pacing.now());
    pacing.replay(&script, &keymap, |now, frame| {
        Ok(auto.tick(now, frame.is_pressed(Control::Tap)).completed)
    })?;

    let outcome = auto.outcome();
    let applied_offset = match outcome {
        Some(AutoOutcome::Offset(estimate)) => {
            let mut latency = LatencyOffset::new(&config.latency)?;
            latency.set(estimate);
            Some(latency.seconds())
        }
        _ => None,
    };

    print_json(&AutoReport {
        beats: auto.beat_instants(),
        taps: auto.tap_instants(),
        outcome,
        applied_offset,
    })?;

    match outcome {
        Some(outcome) => outcome.offset().map(drop),
        None => Err("script ended before the auto calibration test finished".into()),
    }
}

fn load_config(path: Option<&Path>) -> latency_calibration_core::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn print_json<T: Serialize>(value: &T) -> latency_calibration_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Rhythm game latency calibration engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the default engine configuration as JSON.
    Defaults,
    /// Load a song and check it against the configured lanes.
    Validate {
        #[arg(short, long)]
        song: PathBuf,
        /// Engine configuration; defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Replay scripted key presses through one run and print its statistics.
    Simulate {
        #[arg(short, long)]
        song: PathBuf,
        /// JSON list of timed key presses.
        #[arg(long)]
        script: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Latency offset in seconds to seed the run with.
        #[arg(short, long, allow_hyphen_values = true)]
        offset: Option<f64>,
        /// Spawn a prompt on every lane each beat instead of the song's notes.
        #[arg(long)]
        beat_match: bool,
        /// Let the offset keys adjust the latency mid-run.
        #[arg(long)]
        calibrate: bool,
        /// Pace the script by the device clock instead of replaying instantly.
        #[arg(long)]
        realtime: bool,
    },
    /// Replay a tap script through the metronome test and print the estimate.
    Auto {
        #[arg(long)]
        script: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        realtime: bool,
    },
}
