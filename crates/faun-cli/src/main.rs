//! Faun CLI - a small test player for the Faun audio engine.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use faun::{ControlOp, Faun, Limits, Param, PlayMode, SignalKind, pair, trio};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "faun")]
#[command(author, version, about = "Faun audio engine test player", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load audio files into buffers and play them in sequence
    Play(PlayArgs),

    /// Stream a compressed audio file from disk
    Stream(StreamArgs),
}

#[derive(Args)]
struct PlayArgs {
    /// Audio files (WAV, Ogg Vorbis, FLAC, or rFX; up to three are queued)
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Repeat forever instead of playing once
    #[arg(short, long)]
    r#loop: bool,

    /// Playback volume (0.0 to 1.0)
    #[arg(short, long, default_value = "1.0")]
    volume: f32,

    /// Fade in over the fade period
    #[arg(long)]
    fade_in: bool,

    /// Fade out before the end of playback
    #[arg(long)]
    fade_out: bool,

    /// Fade period in seconds
    #[arg(long, default_value = "1.5")]
    fade_period: f32,
}

#[derive(Args)]
struct StreamArgs {
    /// Ogg Vorbis or FLAC file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Byte offset of the audio data within the file
    #[arg(long, default_value = "0")]
    offset: u32,

    /// Byte size of the audio data, or 0 for the whole file
    #[arg(long, default_value = "0")]
    size: u32,

    /// Repeat forever instead of playing once
    #[arg(short, long)]
    r#loop: bool,

    /// Play only a segment: start time in seconds
    #[arg(long, requires = "duration")]
    start: Option<f64>,

    /// Play only a segment: length in seconds
    #[arg(long, requires = "start")]
    duration: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Play(args) => play(args),
        Commands::Stream(args) => stream(args),
    }
}

fn startup() -> anyhow::Result<Faun> {
    Faun::startup(
        Limits {
            buffers: 16,
            sources: 8,
            streams: 2,
            programs: 1,
        },
        "Faun Test",
    )
    .context("engine startup failed")
}

fn play_mode(looping: bool, fade_in: bool, fade_out: bool) -> PlayMode {
    let mut mode = if looping {
        PlayMode::LOOP
    } else {
        PlayMode::ONCE | PlayMode::SIGNAL_DONE
    };
    if fade_in {
        mode.insert(PlayMode::FADE_IN);
    }
    if fade_out {
        mode.insert(PlayMode::FADE_OUT);
    }
    mode
}

fn wait_for_done(engine: &Faun) {
    loop {
        let sig = engine.wait_signal();
        if sig.kind == SignalKind::Done {
            return;
        }
    }
}

fn run_forever() -> ! {
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}

fn play(args: PlayArgs) -> anyhow::Result<()> {
    if args.files.len() > 3 {
        bail!("at most three files can be queued on one source");
    }

    let engine = startup()?;
    let mut durations = Vec::new();
    for (bi, file) in args.files.iter().enumerate() {
        let duration = engine.load_buffer(bi, file, 0, 0);
        if duration == 0.0 {
            bail!("cannot load {}", file.display());
        }
        println!("{}: {:.2}s", file.display(), duration);
        durations.push(duration);
    }

    engine.set_parameter(0, 1, Param::Volume, args.volume.clamp(0.0, 1.0));
    engine.set_parameter(0, 1, Param::FadePeriod, args.fade_period);

    let buffers = match args.files.len() {
        1 => 0,
        2 => pair(0, 1),
        _ => trio(0, 1, 2),
    };
    let mode = play_mode(args.r#loop, args.fade_in, args.fade_out);
    let pid = engine.play_source(0, buffers, mode);
    tracing::debug!(pid = format_args!("{pid:#x}"), "playing");

    if args.r#loop {
        run_forever();
    }
    wait_for_done(&engine);
    engine.shutdown();
    Ok(())
}

fn stream(args: StreamArgs) -> anyhow::Result<()> {
    let engine = startup()?;
    let si = engine.limits().sources; // First stream slot.

    // A part request opens the stream idle, then plays the segment.
    let open_mode = if args.start.is_some() {
        PlayMode(0)
    } else {
        play_mode(args.r#loop, false, false)
    };
    let pid = engine.play_stream(si, &args.file, args.offset, args.size, open_mode);
    if pid == 0 {
        bail!("cannot stream {}", args.file.display());
    }

    if let (Some(start), Some(duration)) = (args.start, args.duration) {
        let mode = if args.r#loop {
            PlayMode::LOOP
        } else {
            PlayMode::ONCE | PlayMode::SIGNAL_DONE
        };
        engine.play_stream_part(si, start, duration, mode);
    }

    if args.r#loop {
        run_forever();
    }
    wait_for_done(&engine);
    engine.control(si, 1, ControlOp::Stop);
    engine.shutdown();
    Ok(())
}
