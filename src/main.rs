//! tilemark - stamp a tiled text watermark onto images

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tilemark::{
    Color, DEFAULT_ANGLE, DEFAULT_JPEG_QUALITY, DEFAULT_OPACITY, DEFAULT_OUT_DIR, Watermarker,
};

/// Add a repeating, rotated text watermark to images
#[derive(Parser, Debug)]
#[command(name = "tilemark")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Image files to watermark
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Watermark text; omit to only re-encode
    #[arg(short = 'm', long = "mark")]
    mark: Option<String>,

    /// Font size of the text in pixels [default: 50]
    #[arg(long = "size")]
    size: Option<u32>,

    /// Opacity of the watermark, 0..1
    #[arg(long = "opacity", default_value_t = DEFAULT_OPACITY)]
    opacity: f32,

    /// Text color like "#000000"
    #[arg(short = 'c', long = "color", default_value = "#8B8B1B")]
    color: Color,

    /// Rotation of the watermark in degrees, counter-clockwise
    #[arg(short = 'a', long = "angle", default_value_t = DEFAULT_ANGLE, allow_negative_numbers = true)]
    angle: f32,

    /// Space between watermarks in pixels [default: 75]
    #[arg(short = 's', long = "space")]
    space: Option<u32>,

    /// Derive size and space from the image height (explicit --size/--space win)
    #[arg(long = "autofit")]
    autofit: bool,

    /// Limit the output file size in bytes
    #[arg(long = "limit-size", alias = "limit_size")]
    limit_size: Option<u64>,

    /// Output directory, created if missing
    #[arg(short = 'o', long = "out", default_value = DEFAULT_OUT_DIR)]
    out: PathBuf,

    /// Font file (.ttf, .otf); defaults to a system sans font
    #[arg(long = "font")]
    font: Option<PathBuf>,

    /// Skip text shaping and place glyphs by their plain advances
    #[arg(long = "no-shaping")]
    no_shaping: bool,

    /// JPEG quality used when the size limit forces lossy output
    #[arg(long = "jpeg-quality", default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,

    /// Write JSON-lines stage timings to this file
    #[arg(long = "perf-log")]
    perf_log: Option<PathBuf>,

    /// Log stage details
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut builder = Watermarker::builder()
        .opacity(cli.opacity)
        .color(cli.color)
        .angle(cli.angle)
        .autofit(cli.autofit)
        .shaping(!cli.no_shaping)
        .out_dir(cli.out)
        .jpeg_quality(cli.jpeg_quality);
    if let Some(mark) = cli.mark {
        builder = builder.mark(mark);
    }
    if let Some(size) = cli.size {
        builder = builder.font_size(size);
    }
    if let Some(space) = cli.space {
        builder = builder.spacing(space);
    }
    if let Some(limit) = cli.limit_size {
        builder = builder.limit_size(limit);
    }
    if let Some(font) = cli.font {
        builder = builder.font_file(font);
    }
    if let Some(path) = cli.perf_log {
        builder = builder.perf_log(path);
    }
    let marker = builder.build().context("cannot set up watermarking")?;

    let mut failed = 0usize;
    for file in &cli.files {
        match marker.process_file(file) {
            Ok(report) => {
                println!("{}", report.status_line());
                log::debug!(
                    "{}: {}x{} {} bytes, {} tiles, {} fit iterations",
                    report.output.display(),
                    report.width,
                    report.height,
                    report.bytes,
                    report.tiles_placed,
                    report.fit_iterations
                );
            }
            Err(err) => {
                failed += 1;
                eprintln!("Add mark to {} fail: {err}", file.display());
            }
        }
    }

    if failed > 0 {
        log::warn!("{} of {} files failed", failed, cli.files.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
