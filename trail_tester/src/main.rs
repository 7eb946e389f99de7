//! trail_tester - runs the trail overlay over one video file and reports where
//! the annotated copy was written.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use trail_vision::{OutputNaming, PipelineConfig, TrackerBackend, track_video};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input video file.
    #[arg(short = 'v', long)]
    video: PathBuf,
    /// TOML configuration file (falls back to TRAIL_VISION_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    /// MOT-format tracks file (defaults to <stem>.tracks.txt next to the video).
    #[arg(long)]
    tracks: Option<PathBuf>,
    /// Detect objects with this YOLOv8 ONNX model instead of replaying tracks.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Directory for `<stem>_tracked.mp4`.
    #[arg(long, conflicts_with = "output")]
    output_dir: Option<PathBuf>,
    /// Write the annotated video to exactly this path.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Maximum number of points kept per trail.
    #[arg(long)]
    trail_length: Option<usize>,
}

impl Args {
    /// Loads the configuration and layers the command-line overrides on top.
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;

        if let Some(tracks) = &self.tracks {
            config.tracks_path = Some(tracks.clone());
        }
        if let Some(model) = &self.model {
            config.tracker = TrackerBackend::Yolo;
            config.detector.model = model.clone();
        }
        if let Some(length) = self.trail_length {
            config.trail.capacity = length;
        }
        if let Some(output) = &self.output {
            config.output.naming = OutputNaming::Fixed(output.clone());
        } else if let Some(dir) = &self.output_dir {
            if matches!(config.output.naming, OutputNaming::Fixed(_)) {
                config.output.naming = OutputNaming::default();
            }
            if let OutputNaming::Suffixed { directory, .. } = &mut config.output.naming {
                *directory = Some(dir.clone());
            }
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let config = match args.pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    // --- 2. Processing ---
    info!("Processing video: {}", args.video.display());
    let start = Instant::now();
    let output = track_video(&args.video, &config);
    info!("Processing time: {:.2} seconds", start.elapsed().as_secs_f64());

    // --- 3. Report ---
    match output {
        Some(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("Video processing failed.");
            ExitCode::FAILURE
        }
    }
}
