//! End-to-end pipeline: extraction, corpus analysis, training and inference.
//!
//! ## Usage
//!
//! ```bash
//! deepfake-pipeline --dataset /data/FaceForensics++_C23
//! deepfake-pipeline --skip-extract --test-video clip.mp4
//! deepfake-pipeline --dataset /data/ff --quick
//! ```
//!
//! Extraction and training failures stop the run. Analysis and inference
//! failures are reported and the run carries on. A summary is written to
//! `pipeline_summary.txt`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use deepfake_guard::config::Config;
use deepfake_guard::extract::{corpus_stats, FrameExtractor};
use deepfake_guard::faces::FaceDetector;
use deepfake_guard::inference::InferenceEngine;
use deepfake_guard::logging;
use deepfake_guard::model::{default_device, NetConfig};
use deepfake_guard::training;
use deepfake_guard::video::FfmpegBackend;

const SUMMARY_FILE: &str = "pipeline_summary.txt";

/// Frames per video and images per class used by `--quick`
const QUICK_FRAMES: usize = 3;
const QUICK_LIMIT: usize = 100;

#[derive(Debug, Default)]
struct PipelineArgs {
    config_path: Option<PathBuf>,
    dataset: Option<PathBuf>,
    test_image: Option<PathBuf>,
    test_video: Option<PathBuf>,
    skip_extract: bool,
    skip_train: bool,
    quick: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageStatus {
    Success,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

struct Pipeline {
    config: Config,
    started: DateTime<Local>,
    results: Vec<(&'static str, StageStatus)>,
}

impl Pipeline {
    fn new(config: Config) -> Self {
        Self {
            config,
            started: Local::now(),
            results: Vec::new(),
        }
    }

    /// Run one stage and record its outcome.
    fn stage<F>(&mut self, name: &'static str, run: F) -> bool
    where
        F: FnOnce(&Config) -> Result<()>,
    {
        info!(stage = name, "Starting stage");
        let status = match run(&self.config) {
            Ok(()) => {
                info!(stage = name, "Stage completed");
                StageStatus::Success
            }
            Err(e) => {
                error!(stage = name, error = ?e, "Stage failed");
                StageStatus::Failed
            }
        };
        self.results.push((name, status));
        status == StageStatus::Success
    }

    fn summary(&self) -> String {
        let finished = Local::now();
        let mut out = String::new();
        let _ = writeln!(out, "PIPELINE EXECUTION SUMMARY");
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "Start time: {}", self.started.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "End time:   {}", finished.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Duration:   {}s", (finished - self.started).num_seconds());
        let _ = writeln!(out, "\nStages:");
        for (name, status) in &self.results {
            let _ = writeln!(out, "  {:<24} {}", name, status);
        }
        out
    }
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if args.quick {
        config.extract.frames_per_video = QUICK_FRAMES;
        config.train.limit_samples = Some(QUICK_LIMIT);
    }
    // Train on whatever extraction writes
    config.train.data_path = config.extract.output_root.clone();
    config.validate()?;

    if !args.skip_extract && args.dataset.is_none() {
        bail!("--dataset is required unless --skip-extract is given");
    }

    info!(quick = args.quick, "Deepfake detection pipeline starting");
    let mut pipeline = Pipeline::new(config);
    let ok = run(&mut pipeline, &args);

    let summary = pipeline.summary();
    println!("{}", summary);
    if let Err(e) = std::fs::write(SUMMARY_FILE, &summary) {
        warn!(error = %e, "Could not write {}", SUMMARY_FILE);
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn run(pipeline: &mut Pipeline, args: &PipelineArgs) -> bool {
    if let Some(dataset) = args.dataset.as_deref().filter(|_| !args.skip_extract) {
        if !pipeline.stage("Frame extraction", |config| extract(config, dataset)) {
            error!("Pipeline stopped: frame extraction failed");
            return false;
        }
    }

    if !pipeline.stage("Corpus analysis", analyze) {
        warn!("Corpus analysis failed, continuing anyway");
    }

    if !args.skip_train && !pipeline.stage("Model training", train) {
        error!("Pipeline stopped: training failed");
        return false;
    }

    if let Some(image) = &args.test_image {
        pipeline.stage("Inference (image)", |config| predict_image(config, image));
    }
    if let Some(video) = &args.test_video {
        pipeline.stage("Inference (video)", |config| predict_video(config, video));
    }

    true
}

fn extract(config: &Config, dataset: &Path) -> Result<()> {
    let extract = &config.extract;
    let detector = FaceDetector::negotiate(extract.detector, extract)?;
    let backend = FfmpegBackend::new()?;
    let mut extractor = FrameExtractor::new(detector, backend, extract);

    let report = extractor.extract_faceforensics(dataset, extract.frames_per_video)?;
    if report.total_frames() == 0 {
        bail!("no frames were extracted from {}", dataset.display());
    }
    Ok(())
}

fn analyze(config: &Config) -> Result<()> {
    let stats = corpus_stats(&config.train.data_path);
    if stats.total() == 0 {
        bail!("corpus at {} is empty", config.train.data_path.display());
    }
    info!(
        real = stats.real,
        fake = stats.fake,
        balance = stats.balance_ratio(),
        "Corpus statistics"
    );
    if stats.real == 0 || stats.fake == 0 {
        warn!("Corpus contains a single class");
    }
    Ok(())
}

fn train(config: &Config) -> Result<()> {
    let device = default_device();
    let net = NetConfig::default().with_input_size(config.inference.input_size);
    let report = training::run(&config.train, net, &device)?;
    info!(
        best_epoch = ?report.outcome.best_epoch,
        accuracy = report.final_report.accuracy,
        f1 = report.final_report.f1,
        "Training finished"
    );
    Ok(())
}

fn load_engine(config: &Config) -> Result<InferenceEngine> {
    let path = &config.train.checkpoint_path;
    InferenceEngine::from_checkpoint(path, &default_device())
        .with_context(|| format!("Failed to load model {}", path.display()))
}

fn predict_image(config: &Config, image: &Path) -> Result<()> {
    let engine = load_engine(config)?;
    let prediction = engine.predict_image(image)?;
    std::fs::write("test_inference.json", serde_json::to_string_pretty(&prediction)?)?;
    info!(
        image = %image.display(),
        prediction = %prediction.label,
        confidence = prediction.confidence,
        "Image classified"
    );
    Ok(())
}

fn predict_video(config: &Config, video: &Path) -> Result<()> {
    let engine = load_engine(config)?;
    let backend = FfmpegBackend::new()?;
    let Some(result) = engine.predict_video(&backend, video, config.inference.frames_to_check) else {
        bail!("could not read video {}", video.display());
    };
    std::fs::write("test_inference_video.json", serde_json::to_string_pretty(&result)?)?;
    Ok(())
}

fn parse_args() -> PipelineArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = PipelineArgs::default();

    let mut i = 1;
    while i < args.len() {
        let path_value = |flag: &str| -> PathBuf {
            match args.get(i + 1) {
                Some(value) => PathBuf::from(value),
                None => {
                    eprintln!("Error: {} requires a path argument", flag);
                    std::process::exit(1);
                }
            }
        };

        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config_path = Some(path_value("--config"));
                i += 1;
            }
            "--dataset" => {
                parsed.dataset = Some(path_value("--dataset"));
                i += 1;
            }
            "--test-image" => {
                parsed.test_image = Some(path_value("--test-image"));
                i += 1;
            }
            "--test-video" => {
                parsed.test_video = Some(path_value("--test-video"));
                i += 1;
            }
            "--skip-extract" => parsed.skip_extract = true,
            "--skip-train" => parsed.skip_train = true,
            "--quick" => parsed.quick = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("deepfake-pipeline {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"deepfake-pipeline - extract, train and test in one run

USAGE:
    deepfake-pipeline [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --dataset PATH      FaceForensics++ (c23) root to extract frames from
    --skip-extract      Reuse the frames already in extract.output_root
    --skip-train        Reuse the checkpoint at train.checkpoint_path
    --quick             Few frames per video and a capped corpus
    --test-image PATH   Classify an image with the trained model
    --test-video PATH   Classify a video with the trained model
    --version, -V       Show version
    --help, -h          Show this help message

See also: deepfake-guard --help"#
    );
}
