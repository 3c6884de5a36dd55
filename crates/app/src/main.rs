use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use rhythm_core::{
    InputEvent, Judgment, NoteTimeline, Session, SessionConfig, SessionEvent, TrackAnalyzer,
    TrackFile,
};
use tracing_subscriber::EnvFilter;

fn main() -> rhythm_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::Analyze { input, output } => run_analyze(&config, &input, output.as_deref()),
        Commands::Simulate {
            input,
            fps,
            spread,
        } => run_simulate(config, &input, fps, spread),
    }
}

fn analyze(config: &SessionConfig, input: &Path) -> rhythm_core::Result<NoteTimeline> {
    let track = TrackFile::load(input)?;
    tracing::info!(
        track = %track.name,
        voices = track.voices.len(),
        "loaded track"
    );
    let timeline = TrackAnalyzer::new(&config.analysis).analyze(&track);
    timeline.ensure_playable()?;
    Ok(timeline)
}

fn run_analyze(
    config: &SessionConfig,
    input: &Path,
    output: Option<&Path>,
) -> rhythm_core::Result<()> {
    let timeline = analyze(config, input)?;

    if let Some(output) = output {
        let json = serde_json::to_string_pretty(&timeline)?;
        std::fs::write(output, json)?;
        tracing::info!(?output, notes = timeline.len(), "wrote timeline");
        return Ok(());
    }

    println!("notes:    {}", timeline.len());
    println!("duration: {:.2}s", timeline.duration);
    println!("tempo:    {:.1} bpm", timeline.tempo_bpm);
    for (voice, role) in timeline.roles.layers() {
        println!("{role:?}: {voice}");
    }
    for (lane, count) in timeline
        .lane_histogram(config.analysis.lane_count)
        .into_iter()
        .enumerate()
    {
        println!("lane {lane}: {count}");
    }
    Ok(())
}

/// Plays the track with a scripted player against a chunky audio clock.
fn run_simulate(
    config: SessionConfig,
    input: &Path,
    fps: u32,
    spread: f64,
) -> rhythm_core::Result<()> {
    let timeline = analyze(&config, input)?;
    let mut inputs: VecDeque<InputEvent> = scripted_inputs(&timeline, spread).into();
    let mut session = Session::new(config, timeline)?;

    let frame = 1.0 / f64::from(fps.max(1));
    let mut wall = 0.0;
    let mut audio = 0.0;
    let mut frame_index: u64 = 0;
    let mut tiers = [0u32; 4];

    while !session.is_finished() {
        wall += frame;
        frame_index += 1;
        // The player reports its position in chunks of three frames.
        if frame_index % 3 == 0 {
            audio = wall;
        }

        let now = session.now();
        while let Some(input) = inputs.front().copied().filter(|input| input.time <= now) {
            inputs.pop_front();
            session.queue_input(input);
        }

        for event in session.tick(audio, frame) {
            if let SessionEvent::Judged { result } = event {
                let slot = match result.tier {
                    Judgment::Perfect => 0,
                    Judgment::Great => 1,
                    Judgment::Good => 2,
                    Judgment::Miss => 3,
                };
                tiers[slot] += 1;
            }
        }
    }

    let score = session.score();
    println!("score:     {}", score.score());
    println!("max combo: {}", score.max_combo());
    println!("accuracy:  {:.2}%", score.accuracy());
    println!(
        "perfect {} / great {} / good {} / miss {}",
        tiers[0], tiers[1], tiers[2], tiers[3]
    );
    Ok(())
}

/// Presses every note with a small deterministic timing error, releasing
/// holds at their end.
fn scripted_inputs(timeline: &NoteTimeline, spread: f64) -> Vec<InputEvent> {
    let mut inputs = Vec::with_capacity(timeline.len() * 2);
    for note in &timeline.notes {
        let offset = (f64::from(note.id.0 * 37 % 9) - 4.0) / 4.0 * spread;
        inputs.push(InputEvent::press(note.lane, note.hit_time + offset));
        if note.is_hold() {
            inputs.push(InputEvent::release(note.lane, note.end_time() + offset));
        }
    }
    inputs.sort_by(|a, b| a.time.total_cmp(&b.time));
    inputs
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Rhythm game timing core", long_about = None)]
struct Cli {
    /// Session configuration file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reduce a track to a playable timeline.
    Analyze {
        /// Track file (.mid, .midi or .json).
        input: PathBuf,
        /// Write the timeline as JSON instead of printing a summary.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Autoplay a track and report the resulting score.
    Simulate {
        /// Track file (.mid, .midi or .json).
        input: PathBuf,
        /// Simulated frame rate.
        #[arg(long, default_value_t = 60)]
        fps: u32,
        /// Largest timing error of the scripted player, in seconds.
        #[arg(long, default_value_t = 0.04)]
        spread: f64,
    },
}
