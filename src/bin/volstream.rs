use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use volstream::{
    CHUNK_FRAME_COUNT, FaultPolicy, FileBackend, Geometry, Header, HostFrames, PatternSource,
    PlaybackOpts, PlaybackSession, RecordSession,
};

#[derive(Parser, Debug)]
#[command(name = "volstream", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a test-pattern stream.
    Record(RecordArgs),
    /// Play a stream headless at its recorded cadence.
    Play(PlayArgs),
    /// Print a stream's header.
    Info(InfoArgs),
    /// Extract a single stored frame as a PNG.
    Frame(FrameArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Output stream path.
    #[arg(long)]
    out: PathBuf,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 64)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 64)]
    height: u32,

    /// Total frame count (multiple of the chunk frame count, at least two chunks).
    #[arg(long, default_value_t = 5 * CHUNK_FRAME_COUNT)]
    frames: u32,

    /// Frame period in milliseconds.
    #[arg(long, default_value_t = 16)]
    ms_per_frame: u32,

    /// Resume an interrupted recording instead of starting over.
    #[arg(long)]
    resume: bool,
}

#[derive(Parser, Debug)]
struct PlayArgs {
    /// Input stream path.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Stop after this many presented frames (default: one full back-and-forth pass).
    #[arg(long)]
    frames: Option<u64>,

    /// What to do when storage misbehaves mid-stream.
    #[arg(long, value_enum, default_value_t = FaultChoice::Retry)]
    on_fault: FaultChoice,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Input stream path.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input stream path.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Stored frame index (0-based).
    #[arg(long)]
    frame: u32,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FaultChoice {
    /// Retry the remainder synchronously on the I/O worker.
    Retry,
    /// Give up and flood the chunk with a sentinel byte.
    Sentinel,
}

impl From<FaultChoice> for FaultPolicy {
    fn from(choice: FaultChoice) -> Self {
        match choice {
            FaultChoice::Retry => FaultPolicy::BlockingRetry,
            FaultChoice::Sentinel => FaultPolicy::SentinelFill(0xED),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Record(args) => cmd_record(args),
        Command::Play(args) => cmd_play(args),
        Command::Info(args) => cmd_info(args),
        Command::Frame(args) => cmd_frame(args),
    }
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let (mut session, header) = if args.resume {
        RecordSession::resume(&args.out, FaultPolicy::BlockingRetry)
            .with_context(|| format!("resume recording '{}'", args.out.display()))?
    } else {
        let header = Header {
            width: args.width,
            height: args.height,
            frame_count: args.frames,
            ms_per_frame: args.ms_per_frame,
        };
        let session = RecordSession::create(&args.out, header, FaultPolicy::BlockingRetry)
            .with_context(|| format!("create recording '{}'", args.out.display()))?;
        (session, header)
    };

    let geom = Geometry::of(&header);
    let first = session.start_frame();
    session.record(&mut PatternSource::new(&geom))?;
    eprintln!(
        "recorded frames {first}..{} to {}",
        header.frame_count,
        args.out.display()
    );
    Ok(())
}

fn cmd_play(args: PlayArgs) -> anyhow::Result<()> {
    let (file, header) = volstream::store::open(&args.in_path)
        .with_context(|| format!("open stream '{}'", args.in_path.display()))?;
    let geom = Geometry::of(&header);
    let gpu = HostFrames::new(geom);
    let opts = PlaybackOpts {
        fault_policy: args.on_fault.into(),
    };
    let mut session = PlaybackSession::new(FileBackend::new(file), header, gpu, opts)?;

    let limit = args.frames.unwrap_or(2 * (header.frame_count as u64 - 1));
    session.run(|report| report.presented_frame + 1 < limit)?;
    session.close()?;
    eprintln!("played {limit} frames from {}", args.in_path.display());
    Ok(())
}

fn cmd_info(args: InfoArgs) -> anyhow::Result<()> {
    let (_file, header) = volstream::store::open(&args.in_path)
        .with_context(|| format!("open stream '{}'", args.in_path.display()))?;
    let geom = Geometry::of(&header);
    println!("{}x{} pixels", header.width, header.height);
    println!(
        "{} frames ({} chunks of {}), {} ms/frame",
        header.frame_count,
        geom.chunk_count(),
        CHUNK_FRAME_COUNT,
        header.ms_per_frame
    );
    println!(
        "{} bytes/frame, {} bytes/chunk",
        geom.frame_size(),
        geom.chunk_size()
    );
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let (mut file, header) = volstream::store::open(&args.in_path)
        .with_context(|| format!("open stream '{}'", args.in_path.display()))?;
    anyhow::ensure!(
        args.frame < header.frame_count,
        "frame {} out of range (stream has {})",
        args.frame,
        header.frame_count
    );
    let geom = Geometry::of(&header);
    let chunk = args.frame / CHUNK_FRAME_COUNT;
    let within = (args.frame % CHUNK_FRAME_COUNT) as usize;
    let offset = geom.chunk_offset(chunk) + (within * geom.frame_size()) as u64;

    let mut pixels = vec![0u8; geom.frame_size()];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut pixels)
        .with_context(|| format!("read frame {} at byte offset {offset}", args.frame))?;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &pixels,
        header.width,
        header.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
