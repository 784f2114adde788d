use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use pitch_practice_core::{
    AppConfig, Clock, ClockedTransport, InputDevice, JsonMelodyFile, ManualClock, MelodyProvider,
    PlaybackBridge, ReplayInput, SessionController,
};
use tracing_subscriber::EnvFilter;

/// Audio fed to the engine per simulated refresh in offline scoring.
const REPLAY_STEP_MS: u64 = 10;

fn main() -> pitch_practice_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Score {
            song,
            take,
            json,
            save_recording,
        } => run_score(config, &song, &take, json, save_recording.as_deref()),
        Commands::Inspect { song, at } => run_inspect(config, &song, at),
        #[cfg(feature = "live")]
        Commands::Live { song, seconds } => run_live(config, &song, seconds),
    }
}

fn run_score(
    config: AppConfig,
    song: &SongArgs,
    take: &Path,
    json: bool,
    save_recording: Option<&Path>,
) -> pitch_practice_core::Result<()> {
    let (samples, sample_rate) = read_take(take)?;
    tracing::info!(take = %take.display(), sample_rate, samples = samples.len(), "scoring take");

    let clock = Arc::new(ManualClock::new());
    let mut session = build_session(
        config,
        clock.clone(),
        ReplayInput::new(samples, sample_rate),
        song,
    )?;
    session.start()?;

    while session.is_practicing() && !session.device().is_exhausted() {
        clock.advance(Duration::from_millis(REPLAY_STEP_MS));
        session.device_mut().pump_millis(REPLAY_STEP_MS as f64)?;
        session.tick();
    }
    let recording = session.stop().or_else(|| session.last_recording().cloned());

    if let (Some(path), Some(recording)) = (save_recording, &recording) {
        recording.write_wav(path)?;
        tracing::info!(path = %path.display(), "saved take recording");
    }

    let summary = session.summary().unwrap_or_default();
    if json {
        let report = serde_json::json!({
            "summary": summary,
            "session": session.snapshot(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} ticks, {} voiced, {} with a target, {} matched ({:.1}%)",
            summary.ticks,
            summary.voiced,
            summary.targeted,
            summary.matched,
            summary.match_ratio() * 100.0
        );
    }
    Ok(())
}

fn run_inspect(config: AppConfig, song: &SongArgs, at: f64) -> pitch_practice_core::Result<()> {
    let sample_rate = config.audio.sample_rate;
    let clock = Arc::new(ManualClock::new());
    let mut session = build_session(
        config,
        clock,
        ReplayInput::new(Vec::new(), sample_rate),
        song,
    )?;
    session.seek_to(at)?;

    let report = serde_json::json!({
        "session": session.snapshot(),
        "frame": session.frame(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(feature = "live")]
fn run_live(config: AppConfig, song: &SongArgs, seconds: Option<u64>) -> pitch_practice_core::Result<()> {
    use pitch_practice_core::{CpalInput, SystemClock};

    let clock = Arc::new(SystemClock::new());
    let mut session = build_session(config, clock.clone(), CpalInput::new(), song)?;
    let limit = seconds.map(Duration::from_secs);

    session.start()?;
    let started = clock.now();
    let mut last_status = Duration::ZERO;

    while session.is_practicing() {
        std::thread::sleep(Duration::from_millis(REPLAY_STEP_MS));
        session.tick();

        let elapsed = clock.now().saturating_sub(started);
        if elapsed.saturating_sub(last_status) >= Duration::from_millis(250) {
            last_status = elapsed;
            let snapshot = session.snapshot();
            println!(
                "{:>7.1}s  sung {:>3}  target {:>4}  {}  {}",
                snapshot.position_ms / 1000.0,
                snapshot.latest_pitch,
                snapshot
                    .target_pitch
                    .map_or_else(|| "-".to_string(), |pitch| pitch.to_string()),
                if snapshot.matched { "match" } else { "     " },
                snapshot.current_lyric.unwrap_or_default()
            );
        }
        if limit.is_some_and(|limit| elapsed >= limit) {
            break;
        }
    }
    session.stop();

    if let Some(summary) = session.summary() {
        println!(
            "matched {} of {} targeted ticks ({:.1}%)",
            summary.matched,
            summary.targeted,
            summary.match_ratio() * 100.0
        );
    }
    Ok(())
}

/// Session wired to clocked transports standing in for the two audio
/// renditions, with the song loaded.
fn build_session<D: InputDevice>(
    config: AppConfig,
    clock: Arc<dyn Clock>,
    device: D,
    song: &SongArgs,
) -> pitch_practice_core::Result<SessionController<D, ClockedTransport>> {
    let mut source = JsonMelodyFile::new(&song.melody);
    if let Some(lyrics) = &song.lyrics {
        source = source.with_lyrics(lyrics);
    }
    let melody = source.load()?;
    let duration_secs = melody.total_duration_ms / 1000.0;

    let bridge = PlaybackBridge::with_sources(
        ClockedTransport::new(clock.clone(), duration_secs),
        ClockedTransport::new(clock.clone(), duration_secs),
    );
    let mut session = SessionController::new(config, clock, device, bridge)?;
    session.set_melody(melody)?;
    Ok(session)
}

/// Reads a WAV file as mono `f32`, keeping the first channel.
fn read_take(path: &Path) -> pitch_practice_core::Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = interleaved.into_iter().step_by(channels).collect();
    Ok((mono, spec.sample_rate))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Karaoke pitch practice engine", long_about = None)]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct SongArgs {
    /// Melody JSON (camelCase `MelodyData`).
    #[arg(short, long)]
    melody: PathBuf,
    /// Lyrics JSON in `[{ "time": seconds, "lyric": text }]` form.
    #[arg(short, long)]
    lyrics: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded take against a melody and report how well it matched.
    Score {
        #[command(flatten)]
        song: SongArgs,
        /// WAV recording of the take.
        #[arg(short, long)]
        take: PathBuf,
        /// Print the summary and final session state as JSON.
        #[arg(long)]
        json: bool,
        /// Write the replayed take back out as a mono float WAV.
        #[arg(long)]
        save_recording: Option<PathBuf>,
    },
    /// Show lyrics, target pitch and score frame at a position.
    Inspect {
        #[command(flatten)]
        song: SongArgs,
        /// Position in milliseconds.
        #[arg(long)]
        at: f64,
    },
    /// Practice live against the default microphone.
    #[cfg(feature = "live")]
    Live {
        #[command(flatten)]
        song: SongArgs,
        /// Stop after this many seconds instead of at the end of the track.
        #[arg(short, long)]
        seconds: Option<u64>,
    },
}
