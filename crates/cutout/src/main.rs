//! cutout: command-line background removal.
//!
//! Removes the background from an image file and writes the cut-out,
//! optionally composited over a color or another image. Useful for:
//!
//! - Comparing segmentation algorithms on the same input
//! - Tuning sensitivity, foreground bias, and smoothing
//! - Measuring per-stage durations with `--report` or `--json`
//! - Touching up a result with magic-wand toggles before saving
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin cutout -- [OPTIONS] <INPUT>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod encode;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use cutout_pipeline::decode::decode_rgba;
use cutout_pipeline::diagnostics::Clock;
use cutout_pipeline::{
    Algorithm, BackgroundDetection, Color, DetailLevel, EditSession, OutputBackground,
    OutputFormat, PipelineError, ProcessInput, ProcessResult, Settings,
};
use cutout_worker::{PipelineWorker, WorkerError, WorkerEvent};
use tracing_subscriber::EnvFilter;

/// Longest wait for any single worker event before giving up.
const WORKER_EVENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Remove the background from an image.
///
/// Runs segmentation, mask refinement, and compositing on the input
/// and writes the result next to it (or to `--output`).
#[derive(Parser)]
#[command(name = "cutout", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Output path. Defaults to `<input stem>-cutout.<format>`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Segmentation algorithm.
    #[arg(long, value_enum, default_value_t = Method::Adaptive)]
    algorithm: Method,

    /// Background tolerance (0-100). Higher removes more.
    #[arg(long, default_value_t = Settings::DEFAULT_SENSITIVITY)]
    sensitivity: f32,

    /// Foreground bias (0-100). Above 50 keeps more as foreground.
    #[arg(long, default_value_t = Settings::DEFAULT_FOREGROUND_BIAS)]
    foreground_bias: f32,

    /// Mask smoothing (0-100). 0 disables the blur.
    #[arg(long, default_value_t = Settings::DEFAULT_SMOOTHING)]
    smoothing: f32,

    /// Color sampling density.
    #[arg(long, value_enum, default_value_t = Detail::Medium)]
    detail: Detail,

    /// How the background color is estimated from the border.
    #[arg(long, value_enum, default_value_t = Detection::Cluster)]
    background_detection: Detection,

    /// Skip the edge term in blended segmentation.
    #[arg(long)]
    no_edges: bool,

    /// Skip soft defringing at compositing.
    #[arg(long)]
    no_defringe: bool,

    /// Output background: `transparent` or a hex color such as `#00ff00`.
    #[arg(long, value_parser = parse_background, conflicts_with = "background_image")]
    background: Option<OutputBackground>,

    /// Composite over this image, stretched to the output size.
    #[arg(long)]
    background_image: Option<PathBuf>,

    /// Use the pixel at `X,Y` as the background color.
    #[arg(long, value_parser = parse_point)]
    pick: Option<(i64, i64)>,

    /// k-means seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Output format. Defaults to the output extension, then PNG.
    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Output quality in (0, 1]; only JPEG uses it.
    #[arg(long, default_value_t = Settings::DEFAULT_QUALITY)]
    quality: f32,

    /// Toggle a color-connected region at `X,Y,TOLERANCE` after
    /// processing. May be repeated.
    #[arg(long, value_parser = parse_wand)]
    wand: Vec<(i64, i64, f32)>,

    /// Also write the final mask as a grayscale PNG.
    #[arg(long)]
    mask_out: Option<PathBuf>,

    /// Print a per-stage diagnostics report.
    #[arg(long)]
    report: bool,

    /// Print diagnostics as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Full settings as a JSON string.
    ///
    /// When provided, all other processing flags are ignored except
    /// `--background-image`, which cannot be expressed in JSON.
    #[arg(long)]
    config_json: Option<String>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Segmentation algorithm selection.
#[derive(Clone, Copy, ValueEnum)]
enum Method {
    /// Choose from image statistics.
    Adaptive,
    /// Color distance to the background.
    Color,
    /// Edge seeds grown over similar colors.
    Edge,
    /// Trimap seeding with alpha matting.
    Trimap,
}

/// Sampling density selection.
#[derive(Clone, Copy, ValueEnum)]
enum Detail {
    Low,
    Medium,
    High,
}

/// Background estimation selection.
#[derive(Clone, Copy, ValueEnum)]
enum Detection {
    /// Largest k-means cluster of border colors.
    Cluster,
    /// Mean border color.
    Average,
}

/// Output format selection.
#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Png,
    Jpeg,
    Webp,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => Self::Png,
            Format::Jpeg => Self::Jpeg,
            Format::Webp => Self::Webp,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("failed to encode output: {0}")]
    Encode(#[from] image::ImageError),

    #[error("processing failed: {0}")]
    Failed(String),

    #[error("processing was cancelled")]
    Cancelled,
}

fn parse_point(s: &str) -> Result<(i64, i64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let x = x.trim().parse().map_err(|e| format!("bad x {x:?}: {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("bad y {y:?}: {e}"))?;
    Ok((x, y))
}

fn parse_wand(s: &str) -> Result<(i64, i64, f32), String> {
    let (point, tolerance) = s
        .rsplit_once(',')
        .ok_or_else(|| format!("expected X,Y,TOLERANCE, got {s:?}"))?;
    let (x, y) = parse_point(point)?;
    let tolerance = tolerance
        .trim()
        .parse()
        .map_err(|e| format!("bad tolerance {tolerance:?}: {e}"))?;
    Ok((x, y, tolerance))
}

fn parse_background(s: &str) -> Result<OutputBackground, String> {
    if s.eq_ignore_ascii_case("transparent") {
        return Ok(OutputBackground::Transparent);
    }
    Color::from_hex(s)
        .map(OutputBackground::Color)
        .map_err(|e| e.to_string())
}

/// Build [`Settings`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual processing flags are ignored.
fn settings_from_cli(cli: &Cli) -> Result<Settings, CliError> {
    if let Some(ref json) = cli.config_json {
        return Ok(serde_json::from_str(json)?);
    }

    Ok(Settings {
        algorithm: match cli.algorithm {
            Method::Adaptive => Algorithm::Adaptive,
            Method::Color => Algorithm::Color,
            Method::Edge => Algorithm::Edge,
            Method::Trimap => Algorithm::Trimap,
        },
        sensitivity: cli.sensitivity,
        foreground_bias: cli.foreground_bias,
        smoothing: cli.smoothing,
        edge_detection: !cli.no_edges,
        detail_level: match cli.detail {
            Detail::Low => DetailLevel::Low,
            Detail::Medium => DetailLevel::Medium,
            Detail::High => DetailLevel::High,
        },
        background_detection: match cli.background_detection {
            Detection::Cluster => BackgroundDetection::Cluster,
            Detection::Average => BackgroundDetection::Average,
        },
        defringing: !cli.no_defringe,
        background: cli.background.clone().unwrap_or_default(),
        quality: cli.quality,
        format: cli
            .format
            .map(OutputFormat::from)
            .or_else(|| cli.output.as_deref().and_then(encode::format_from_path))
            .unwrap_or_default(),
        seed: cli.seed,
    })
}

/// `<dir>/<stem>-cutout.<ext>` next to the input.
fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    input.with_file_name(format!("{stem}-cutout.{}", format.extension()))
}

fn read(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    std::fs::write(path, bytes).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "written");
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the pipeline on the background worker, logging progress.
fn process_in_worker(input: ProcessInput) -> Result<ProcessResult, CliError> {
    let mut worker = PipelineWorker::spawn()?;
    let generation = worker.submit(input)?;
    let event = worker.wait(generation, WORKER_EVENT_TIMEOUT, |percent| {
        tracing::info!(percent, "progress");
    })?;
    match event {
        WorkerEvent::Completed { result, .. } => Ok(*result),
        WorkerEvent::Failed { message, .. } => Err(CliError::Failed(message)),
        WorkerEvent::Cancelled { .. } => Err(CliError::Cancelled),
        WorkerEvent::Progress { .. } => Err(CliError::Failed(
            "worker ended without a result".to_string(),
        )),
    }
}

/// Run the pipeline inline, printing diagnostics to stdout.
fn process_with_report(input: ProcessInput, json: bool) -> Result<ProcessResult, CliError> {
    let (result, diagnostics) = cutout_pipeline::process_with_diagnostics(input, &StdClock)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else {
        println!("{}", diagnostics.report());
    }
    Ok(result)
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let mut settings = settings_from_cli(cli)?;
    if let Some(ref path) = cli.background_image {
        let backdrop = decode_rgba(&read(path)?)?;
        settings.background = OutputBackground::Image(Arc::new(backdrop));
    }
    let format = settings.format;
    let quality = settings.quality;

    let bytes = read(&cli.input)?;
    tracing::info!(
        path = %cli.input.display(),
        bytes = bytes.len(),
        algorithm = %settings.algorithm,
        "processing",
    );
    let image = decode_rgba(&bytes)?;
    let mut session = EditSession::new(image, settings)?;

    if let Some((x, y)) = cli.pick {
        let color = session.pick_background(x, y)?;
        tracing::info!(%color, x, y, "background picked");
    }

    let input = session.begin_processing(false)?;
    let outcome = if cli.report || cli.json {
        process_with_report(input, cli.json)
    } else {
        process_in_worker(input)
    };
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            session.abort_processing();
            return Err(e);
        }
    };
    tracing::info!(
        segmenter = ?result.segmenter,
        background = %result.background,
        seed = result.seed,
        foreground = result.mask.foreground_fraction(),
        "processing finished",
    );
    let composited = result.composited.clone();
    session.complete_processing(result)?;

    for &(x, y, tolerance) in &cli.wand {
        let pixels = session.magic_wand(x, y, tolerance)?;
        tracing::info!(x, y, tolerance, pixels, "magic wand applied");
    }
    let output = if cli.wand.is_empty() {
        composited
    } else {
        session.render()?
    };

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input, format));
    write(&output_path, &encode::encode(&output, format, quality)?)?;
    eprintln!("Cut-out written to {}", output_path.display());

    if let Some(ref mask_path) = cli.mask_out {
        write(mask_path, &encode::encode_mask(&session.mask().to_gray_image())?)?;
        eprintln!("Mask written to {}", mask_path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cutout").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn points_and_wands_parse() {
        assert_eq!(parse_point("3, 4"), Ok((3, 4)));
        assert_eq!(parse_point("-1,2"), Ok((-1, 2)));
        assert!(parse_point("3").is_err());
        assert_eq!(parse_wand("10,20,32.5"), Ok((10, 20, 32.5)));
        assert!(parse_wand("10,20").is_err());
    }

    #[test]
    fn backgrounds_parse() {
        assert_eq!(
            parse_background("Transparent"),
            Ok(OutputBackground::Transparent)
        );
        assert_eq!(
            parse_background("#00ff00"),
            Ok(OutputBackground::Color(Color::new(0, 255, 0)))
        );
        assert!(parse_background("chartreuse").is_err());
    }

    #[test]
    fn defaults_match_settings_defaults() {
        let settings = settings_from_cli(&parse(&["in.png"])).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn flags_map_to_settings() {
        let cli = parse(&[
            "in.png",
            "-o",
            "out.webp",
            "--algorithm",
            "trimap",
            "--sensitivity",
            "70",
            "--no-defringe",
            "--background",
            "#ff0000",
            "--seed",
            "9",
            "--wand",
            "1,2,3",
            "--wand",
            "4,5,6",
        ]);
        let settings = settings_from_cli(&cli).unwrap();
        assert_eq!(settings.algorithm, Algorithm::Trimap);
        assert!((settings.sensitivity - 70.0).abs() < f32::EPSILON);
        assert!(!settings.defringing);
        assert_eq!(
            settings.background,
            OutputBackground::Color(Color::new(255, 0, 0))
        );
        assert_eq!(settings.seed, Some(9));
        assert_eq!(settings.format, OutputFormat::Webp);
        assert_eq!(cli.wand.len(), 2);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = parse(&[
            "in.png",
            "--sensitivity",
            "90",
            "--config-json",
            r#"{"algorithm":"edge","smoothing":0}"#,
        ]);
        let settings = settings_from_cli(&cli).unwrap();
        assert_eq!(settings.algorithm, Algorithm::Edge);
        assert!(settings.smoothing.abs() < f32::EPSILON);
        assert!((settings.sensitivity - Settings::DEFAULT_SENSITIVITY).abs() < f32::EPSILON);
    }

    #[test]
    fn background_flags_conflict() {
        let result = Cli::try_parse_from([
            "cutout",
            "in.png",
            "--background",
            "#000000",
            "--background-image",
            "bg.png",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("/tmp/photo.jpg"), OutputFormat::Png),
            PathBuf::from("/tmp/photo-cutout.png")
        );
    }
}
