// Command-line front end for the MRZ recognition pipeline

use clap::{Parser, Subcommand};
use log::info;
use mrzscan::models::Frame;
use mrzscan::processing::{BandLocalizer, FrameGate, ImageProcessor};
use mrzscan::{MrzError, MrzTextNormalizer, MrzValidator, PipelineConfig};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mrz-scan")]
#[command(about = "Locate, read and validate machine readable zones")]
struct Cli {
    /// Pipeline configuration as JSON; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalise, repair and parse raw OCR text
    Parse {
        /// File holding the OCR output
        input: PathBuf,
    },
    /// Print frame-quality metrics of an image
    Gate {
        image: PathBuf,
    },
    /// Find the MRZ band in an image
    Locate {
        image: PathBuf,
        /// Write the detected band as a PNG
        #[arg(long)]
        save_crop: Option<PathBuf>,
    },
    /// Run the full pipeline over a sequence of frames
    #[cfg(feature = "tesseract")]
    Scan {
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Simulated spacing between frames
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Where learned preprocessing presets are kept
        #[arg(long)]
        presets: Option<PathBuf>,
    },
}

fn load_gray(path: &Path) -> Result<image::GrayImage, MrzError> {
    let img = image::open(path)
        .map_err(|e| MrzError::ImageProcessing(format!("{}: {}", path.display(), e)))?;
    Ok(ImageProcessor::grayscale(&img))
}

fn load_frame(path: &Path, previous: Option<Vec<u8>>, timestamp_ms: u64) -> Result<Frame, MrzError> {
    let gray = load_gray(path)?;
    let (w, h) = gray.dimensions();
    let previous = previous.filter(|p| p.len() == (w * h) as usize);
    Frame::new(w, h, gray.into_raw(), previous, timestamp_ms)
}

fn print_json(value: &serde_json::Value) -> Result<(), MrzError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_command(input: &Path) -> Result<(), MrzError> {
    let raw = fs::read_to_string(input)?;
    let candidate = MrzTextNormalizer::find_candidate(&raw);
    let parse = candidate.as_ref().map(MrzValidator::parse_candidate);
    print_json(&json!({ "candidate": candidate, "parse": parse }))
}

fn gate_command(path: &Path, config: &PipelineConfig) -> Result<(), MrzError> {
    let frame = load_frame(path, None, 0)?;
    let result = FrameGate::evaluate(&frame, &config.gate);
    print_json(&json!(result))
}

fn locate_command(path: &Path, save_crop: Option<&Path>, config: &PipelineConfig) -> Result<(), MrzError> {
    let gray = load_gray(path)?;
    let localizer = BandLocalizer::new(config.localizer.clone());
    let found = localizer.locate_image(&gray);
    if let (Some(region), Some(out)) = (found, save_crop) {
        ImageProcessor::crop(&gray, &region)
            .save(out)
            .map_err(|e| MrzError::ImageProcessing(e.to_string()))?;
        info!("band written to {}", out.display());
    }
    print_json(&json!({ "width": gray.width(), "height": gray.height(), "band": found }))
}

#[cfg(feature = "tesseract")]
fn scan_command(
    frames: &[PathBuf],
    interval_ms: u64,
    presets: Option<&Path>,
    config: PipelineConfig,
) -> Result<(), MrzError> {
    use mrzscan::processing::{InMemoryPresetStore, JsonFilePresetStore, PresetStore};
    use mrzscan::recognition::{OcrRouter, TesseractEngine};
    use std::sync::Arc;
    use std::time::Duration;

    let runtime = tokio::runtime::Runtime::new()?;
    let store: Arc<dyn PresetStore> = match presets {
        Some(path) => Arc::new(JsonFilePresetStore::open(path)?),
        None => Arc::new(InMemoryPresetStore::new()),
    };
    let router = OcrRouter::new(
        Arc::new(TesseractEngine::general()),
        Arc::new(TesseractEngine::mrz()),
        store,
        config.router.clone(),
    );
    // the slowest routed attempt: general engine, then every preset
    let wait = Duration::from_millis(
        config.router.engine_timeout_ms * 5 + config.router.dual_timeout_ms,
    );
    let mut pipeline = mrzscan::MrzPipeline::new(config, Arc::new(router), runtime.handle().clone())?;

    let mut previous: Option<Vec<u8>> = None;
    for (i, path) in frames.iter().enumerate() {
        let frame = load_frame(path, previous.take(), i as u64 * interval_ms)?;
        let output = pipeline.on_frame(&frame);
        println!("{}", serde_json::to_string(&output)?);
        if output.ocr_started {
            if let Some(update) = pipeline.await_recognition(wait) {
                println!("{}", serde_json::to_string(&update)?);
            }
        }
        if let Some(confirmed) = pipeline.confirmation() {
            return print_json(&json!({ "confirmed": confirmed }));
        }
        previous = Some(frame.luma().to_vec());
    }
    print_json(&json!({ "confirmed": null, "state": pipeline.state() }))
}

fn run(cli: Cli) -> Result<(), MrzError> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    match cli.command {
        Command::Parse { input } => parse_command(&input),
        Command::Gate { image } => gate_command(&image, &config),
        Command::Locate { image, save_crop } => locate_command(&image, save_crop.as_deref(), &config),
        #[cfg(feature = "tesseract")]
        Command::Scan {
            frames,
            interval_ms,
            presets,
        } => scan_command(&frames, interval_ms, presets.as_deref(), config),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
