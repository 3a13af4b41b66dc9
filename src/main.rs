use anyhow::{bail, Context, Result};
use candle_core::Device;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use deepfake_guard::config::{Config, DetectorKind};
use deepfake_guard::discovery::{has_extension, VIDEO_EXTENSIONS};
use deepfake_guard::extract::{corpus_stats, FrameExtractor};
use deepfake_guard::faces::FaceDetector;
use deepfake_guard::inference::{ImagePrediction, InferenceEngine, InputKind};
use deepfake_guard::label::Label;
use deepfake_guard::logging;
use deepfake_guard::model::{default_device, Checkpoint, NetConfig};
use deepfake_guard::training::{self, Termination};
use deepfake_guard::video::{FfmpegBackend, FrameSequenceBackend};

#[derive(Debug, Default)]
struct Args {
    command: Option<String>,
    input: Option<PathBuf>,
    config_path: Option<PathBuf>,
    label: Option<Label>,
    faceforensics: bool,
    video: bool,
    output: Option<PathBuf>,
    checkpoint: Option<PathBuf>,
    resume: Option<PathBuf>,
    frames: Option<usize>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    limit: Option<usize>,
    detector: Option<DetectorKind>,
}

fn parse_value<T>(args: &[String], i: usize, flag: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    };
    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error: invalid value '{}' for {}: {}", raw, flag, e);
            std::process::exit(1);
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("deepfake-guard {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                parsed.config_path = Some(parse_value(&args, i, "--config"));
                i += 1;
            }
            "--label" | "-l" => {
                parsed.label = Some(parse_value(&args, i, "--label"));
                i += 1;
            }
            "--output" | "-o" => {
                parsed.output = Some(parse_value(&args, i, "--output"));
                i += 1;
            }
            "--checkpoint" | "-m" => {
                parsed.checkpoint = Some(parse_value(&args, i, "--checkpoint"));
                i += 1;
            }
            "--resume" => {
                parsed.resume = Some(parse_value(&args, i, "--resume"));
                i += 1;
            }
            "--frames" | "-f" => {
                parsed.frames = Some(parse_value(&args, i, "--frames"));
                i += 1;
            }
            "--epochs" | "-e" => {
                parsed.epochs = Some(parse_value(&args, i, "--epochs"));
                i += 1;
            }
            "--batch-size" | "-b" => {
                parsed.batch_size = Some(parse_value(&args, i, "--batch-size"));
                i += 1;
            }
            "--limit" => {
                parsed.limit = Some(parse_value(&args, i, "--limit"));
                i += 1;
            }
            "--detector" | "-d" => {
                parsed.detector = Some(parse_value(&args, i, "--detector"));
                i += 1;
            }
            "--faceforensics" => parsed.faceforensics = true,
            "--video" => parsed.video = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg if parsed.command.is_none() => parsed.command = Some(arg.to_string()),
            arg if parsed.input.is_none() => parsed.input = Some(PathBuf::from(arg)),
            arg => {
                eprintln!("Unexpected argument: {}", arg);
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
        r#"deepfake-guard - face-forgery detection for video clips

USAGE:
    deepfake-guard <COMMAND> [PATH] [OPTIONS]

COMMANDS:
    extract PATH        Extract face crops from the videos in PATH
                        (needs --label, or --faceforensics for a FaceForensics++ root)
    train [PATH]        Train the classifier on an extracted corpus
    predict PATH        Classify an image, a video, or every file in a directory
    evaluate [PATH]     Score a checkpoint against a REAL/ + FAKE/ corpus
    info                Describe a checkpoint

OPTIONS:
    --config, -c PATH       Path to config file
    --label, -l LABEL       real or fake (extract)
    --faceforensics         Treat PATH as a FaceForensics++ root (extract)
    --detector, -d NAME     neural or cascade (extract)
    --output, -o PATH       Frame output root (extract) or JSON report (evaluate)
    --checkpoint, -m PATH   Model checkpoint
    --resume PATH           Continue training from a checkpoint
    --frames, -f N          Frames sampled per video
    --epochs, -e N          Epoch budget (train)
    --batch-size, -b N      Mini-batch size
    --limit N               Images per class (train)
    --video                 Treat a directory passed to predict as videos
    --version, -V           Show version
    --help, -h              Show this help message

ENVIRONMENT:
    DEEPFAKE_GUARD_CONFIG   Path to config file (overrides default location)
    DEEPFAKE_GUARD_LOG      Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/deepfake-guard/config.toml

See also: deepfake-pipeline --help"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match &args.config_path {
        Some(path) => Config::load_from(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load()?,
    };

    match args.command.as_deref() {
        Some("extract") => run_extract(config, &args),
        Some("train") => run_train(config, &args),
        Some("predict") => run_predict(config, &args),
        Some("evaluate") => run_evaluate(config, &args),
        Some("info") => run_info(&config, &args),
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
        None => {
            print_help();
            std::process::exit(1);
        }
    }
}

fn run_extract(mut config: Config, args: &Args) -> Result<()> {
    let input = args.input.as_deref().context("extract needs a video directory")?;
    if let Some(output) = &args.output {
        config.extract.output_root = output.clone();
    }
    if let Some(frames) = args.frames {
        config.extract.frames_per_video = frames;
    }
    if let Some(detector) = args.detector {
        config.extract.detector = detector;
    }
    config.validate()?;
    let extract = &config.extract;

    let detector = FaceDetector::negotiate(extract.detector, extract).context("No face detector available")?;
    let backend = FfmpegBackend::new().context("ffmpeg and ffprobe are required for extraction")?;
    let mut extractor = FrameExtractor::new(detector, backend, extract);

    let report = if args.faceforensics {
        extractor.extract_faceforensics(input, extract.frames_per_video)?
    } else {
        let label = args
            .label
            .context("--label real|fake is required unless --faceforensics is given")?;
        extractor.extract_directory(input, label, extract.frames_per_video)?
    };

    let stats = corpus_stats(extractor.output_root());
    println!("Videos processed: {}", report.videos_processed);
    println!("Videos skipped:   {}", report.videos_skipped);
    println!("Frames written:   {} REAL, {} FAKE", report.real_frames, report.fake_frames);
    println!(
        "Corpus now:       {} REAL, {} FAKE (balance {:.2})",
        stats.real,
        stats.fake,
        stats.balance_ratio()
    );
    Ok(())
}

fn run_train(mut config: Config, args: &Args) -> Result<()> {
    let train = &mut config.train;
    if let Some(data) = &args.input {
        train.data_path = data.clone();
    }
    if let Some(epochs) = args.epochs {
        train.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        train.batch_size = batch_size;
    }
    if let Some(limit) = args.limit {
        train.limit_samples = Some(limit);
    }
    if let Some(checkpoint) = &args.checkpoint {
        train.checkpoint_path = checkpoint.clone();
    }
    if let Some(resume) = &args.resume {
        train.resume = Some(resume.clone());
    }
    config.validate()?;

    let device = default_device();
    let net = NetConfig::default().with_input_size(config.inference.input_size);
    let report = training::run(&config.train, net, &device).context("Training failed")?;

    let outcome = &report.outcome;
    match outcome.termination {
        Termination::EarlyStop { epoch } => println!("Early stopping at epoch {}", epoch),
        Termination::EpochLimitReached => println!("Epoch budget of {} reached", config.train.epochs),
    }
    if let (Some(epoch), Some(loss)) = (outcome.best_epoch, outcome.best_val_loss) {
        println!("Best epoch {} with validation loss {:.4}", epoch, loss);
    }
    println!("Checkpoint: {}", outcome.checkpoint_path.display());
    println!(
        "Samples: {} train, {} validation",
        report.train_samples, report.val_samples
    );
    println!("\nFinal evaluation (validation set):\n{}", report.final_report);
    Ok(())
}

fn checkpoint_path(config: &Config, args: &Args) -> PathBuf {
    args.checkpoint
        .clone()
        .unwrap_or_else(|| config.inference.checkpoint_path.clone())
}

fn load_engine(path: &Path) -> Result<InferenceEngine> {
    InferenceEngine::from_checkpoint(path, &default_device())
        .with_context(|| format!("Failed to load model {}", path.display()))
}

fn run_predict(mut config: Config, args: &Args) -> Result<()> {
    let input = args.input.as_deref().context("predict needs an image, video or directory")?;
    if let Some(frames) = args.frames {
        config.inference.frames_to_check = frames;
    }
    config.validate()?;
    let frames = config.inference.frames_to_check;
    let engine = load_engine(&checkpoint_path(&config, args))?;

    let json = if input.is_dir() {
        let results = if args.video {
            let backend = FfmpegBackend::new().context("ffmpeg is required for video prediction")?;
            engine.predict_batch(&backend, input, InputKind::Video, frames)
        } else {
            engine.predict_batch(&FrameSequenceBackend::new(), input, InputKind::Image, frames)
        };
        serde_json::to_string_pretty(&results)?
    } else if has_extension(input, VIDEO_EXTENSIONS) {
        let backend = FfmpegBackend::new().context("ffmpeg is required for video prediction")?;
        let Some(result) = engine.predict_video(&backend, input, frames) else {
            bail!("Could not read video {}", input.display());
        };
        serde_json::to_string_pretty(&result)?
    } else {
        let prediction = engine
            .predict_image(input)
            .with_context(|| format!("Failed to classify {}", input.display()))?;
        serde_json::to_string_pretty(&ImagePrediction {
            image: input.to_path_buf(),
            prediction,
        })?
    };

    println!("{}", json);
    Ok(())
}

fn run_evaluate(mut config: Config, args: &Args) -> Result<()> {
    let data = args.input.clone().unwrap_or_else(|| config.train.data_path.clone());
    if let Some(batch_size) = args.batch_size {
        config.inference.batch_size = batch_size;
    }
    config.validate()?;
    let batch_size = config.inference.batch_size;
    let engine = load_engine(&checkpoint_path(&config, args))?;

    let evaluation = engine
        .evaluate_corpus(&data, batch_size)
        .with_context(|| format!("Failed to evaluate {}", data.display()))?;

    println!("{}", evaluation.report);
    if evaluation.skipped > 0 {
        println!("Skipped {} unreadable images", evaluation.skipped);
    }

    if let Some(output) = &args.output {
        let json = serde_json::to_string_pretty(&evaluation.rows)?;
        std::fs::write(output, json).with_context(|| format!("Failed to write {}", output.display()))?;
        println!("Per-image results written to {}", output.display());
    }
    Ok(())
}

fn run_info(config: &Config, args: &Args) -> Result<()> {
    let path = args.input.clone().unwrap_or_else(|| checkpoint_path(config, args));
    let checkpoint =
        Checkpoint::read(&path, &Device::Cpu).with_context(|| format!("Failed to read {}", path.display()))?;
    print!("{}", checkpoint.summary());
    Ok(())
}
