mod audio;
mod fflog;
mod grabber;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::Parser;

use a2v::frames::FrameSource;
use a2v::mux::{Encoder, EncoderOpts};
use a2v::opcode::OpcodeTable;
use a2v::{cache, symbols, Palette, VideoMode};

/// Transcodes a video file into the a2v streaming format.
#[derive(Parser)]
#[command(name = "transcode")]
struct Args {
    /// Path to input video file
    input: Option<String>,

    /// Path to output stream (default: input with .a2m extension)
    #[arg(long)]
    output: Option<String>,

    /// Maximum output size in MB (0 = unlimited)
    #[arg(long = "max-output-mb", default_value_t = 0.0)]
    max_output_mb: f64,

    /// Override the autodetected audio normalization multiplier
    #[arg(long = "audio-normalization")]
    audio_normalization: Option<f32>,

    /// Only re-target every nth input frame; lowers the effective output
    /// frame rate, which can look better for noisy sources
    #[arg(long = "every-n-video-frames", default_value_t = 2)]
    every_n_video_frames: u32,

    /// Display mode to encode for (HGR or DHGR)
    #[arg(long = "video-mode", default_value = "HGR")]
    video_mode: String,

    /// Palette the converter targets (NTSC or IIGS)
    #[arg(long, default_value = "NTSC")]
    palette: String,

    /// Player symbol table (assembler debug output)
    #[arg(long = "symbol-table", default_value = "player/a2v.dbg")]
    symbol_table: String,

    /// Directory holding the cached distance tables
    #[arg(long = "data-dir", default_value = "data")]
    data_dir: String,

    /// External frame converter binary
    #[arg(long, default_value = "bmp2dhr")]
    converter: String,

    /// Display version and quit
    #[arg(long)]
    version: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.version {
        println!("a2v Transcode Tool");
        println!();

        let release = env!("RELEASE_VERSION");
        let commit = env!("GIT_COMMIT");
        if !release.is_empty() {
            println!("\tVersion:     {}", release);
        } else {
            println!("\tGit commit:  {}", commit);
        }
        return Ok(());
    }

    let input = args
        .input
        .as_deref()
        .ok_or("Expected an input video file!")?;

    let mode = match args.video_mode.to_uppercase().as_str() {
        "HGR" => VideoMode::Hgr,
        "DHGR" => VideoMode::Dhgr,
        other => return Err(format!("Unknown video mode {:?} (HGR or DHGR)", other).into()),
    };
    let palette = match args.palette.to_uppercase().as_str() {
        "NTSC" => Palette::Ntsc,
        "IIGS" => Palette::Iigs,
        other => return Err(format!("Unknown palette {:?} (NTSC or IIGS)", other).into()),
    };

    // Everything fallible happens before the output file is created, so a
    // bad input never leaves a partial stream behind.
    let syms = symbols::parse_file(Path::new(&args.symbol_table))
        .map_err(|e| format!("Reading symbol table {}: {}", args.symbol_table, e))?;
    let opcodes = OpcodeTable::from_symbols(&syms)?;

    let tables = cache::load_or_build(Path::new(&args.data_dir), mode, palette);

    log::info!("Analysing {}", input);
    let ticks = audio::read_ticks(Path::new(input), args.audio_normalization)?;
    let mut frames =
        grabber::FileFrameGrabber::new(Path::new(input), mode, palette, &args.converter)?;
    log::info!("Input frame rate: {:.3}", frames.frame_rate());

    let out_path = match &args.output {
        Some(path) => PathBuf::from(path),
        None => Path::new(input).with_extension("a2m"),
    };

    let opts = EncoderOpts {
        max_bytes_out: (args.max_output_mb > 0.0)
            .then(|| (args.max_output_mb * 1024.0 * 1024.0) as u64),
        every_n_frames: args.every_n_video_frames,
    };

    let mut out = BufWriter::new(File::create(&out_path)?);
    let mut encoder = Encoder::new(&tables, opcodes, opts);
    let written = encoder.encode(ticks, &mut frames, &mut out)?;

    log::info!("Wrote {} bytes to {}", written, out_path.display());
    Ok(())
}
