// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use video_filters::RenderBackend;

mod cli;

#[derive(Parser)]
#[command(name = "video-filters")]
#[command(about = "Real-time blur and virtual background for video frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Blur every frame of a directory
    Blur {
        /// Directory of input frames (PNG/JPEG, processed in name order)
        #[arg(short, long)]
        input: PathBuf,

        /// Directory the processed frames are written to
        #[arg(short, long)]
        output: PathBuf,

        /// Blur radius in kernel taps (0-12)
        #[arg(short, long, default_value = "6")]
        radius: f64,

        /// Frame rate of the input track
        #[arg(long, default_value = "30")]
        fps: f64,

        /// Renderer: auto, gpu or cpu
        #[arg(long, default_value = "auto", value_parser = parse_backend)]
        backend: RenderBackend,
    },

    /// Replace or blur the background behind the person
    Background {
        /// Directory of input frames (PNG/JPEG, processed in name order)
        #[arg(short, long)]
        input: PathBuf,

        /// Directory the processed frames are written to
        #[arg(short, long)]
        output: PathBuf,

        /// Directory of grayscale person masks (white = person), one per frame
        #[arg(short, long)]
        masks: PathBuf,

        /// Background image path
        #[arg(long, conflicts_with_all = ["video", "blur_level"])]
        image: Option<String>,

        /// Animated GIF background path
        #[arg(long, conflicts_with = "blur_level")]
        video: Option<String>,

        /// Background blur: low, medium, high or a number
        #[arg(long)]
        blur_level: Option<String>,

        /// Segmentation model path; selects the mask polarity
        #[arg(long)]
        model_path: Option<String>,

        /// Milliseconds before segmentation output is used
        #[arg(long)]
        warmup_ms: Option<u64>,

        /// Frame rate of the input track
        #[arg(long, default_value = "30")]
        fps: f64,

        /// Renderer: auto, gpu or cpu
        #[arg(long, default_value = "auto", value_parser = parse_backend)]
        backend: RenderBackend,
    },

    /// Run the effect described by a JSON configuration file
    Run {
        /// Effect configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory of input frames
        #[arg(short, long)]
        input: PathBuf,

        /// Directory the processed frames are written to
        #[arg(short, long)]
        output: PathBuf,

        /// Directory of person masks for the virtual background
        #[arg(short, long)]
        masks: Option<PathBuf>,

        /// Frame rate of the input track
        #[arg(long, default_value = "30")]
        fps: f64,
    },

    /// Show streaming capabilities and the GPU adapter
    Probe,
}

fn parse_backend(value: &str) -> Result<RenderBackend, String> {
    RenderBackend::from_name(value).ok_or_else(|| format!("unknown backend '{}'", value))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=video_filters=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Blur {
            input,
            output,
            radius,
            fps,
            backend,
        } => cli::blur_frames(&input, &output, radius, fps, backend),
        Commands::Background {
            input,
            output,
            masks,
            image,
            video,
            blur_level,
            model_path,
            warmup_ms,
            fps,
            backend,
        } => cli::replace_background(
            &input,
            &output,
            cli::BackgroundOptions {
                masks,
                image,
                video,
                blur_level,
                model_path,
                warmup_ms,
                backend,
            },
            fps,
        ),
        Commands::Run {
            config,
            input,
            output,
            masks,
            fps,
        } => cli::run_config(&config, &input, &output, masks, fps),
        Commands::Probe => cli::probe(),
    }
}
