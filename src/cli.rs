// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for running effects over image sequences
//!
//! This module provides command-line functionality for:
//! - Blurring a directory of frames
//! - Replacing the background of a directory of frames
//! - Running an effect from a JSON configuration
//! - Probing streaming and GPU capabilities

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use video_filters::backends::StreamingCapabilities;
use video_filters::config::{
    BackgroundBlurLevel, BackgroundFilter, EffectConfig, FullScreenBlurConfig, RenderBackend,
    VirtualBackgroundConfig, load_effect_config,
};
use video_filters::constants::BlurPreset;
use video_filters::effects::create_effect;
use video_filters::errors::FilterError;
use video_filters::gpu::create_render_device;
use video_filters::pipeline::PerformanceMonitor;
use video_filters::segmentation::{PrecomputedMaskLoader, SegmentationEngineLoader};
use video_filters::{
    Frame, PipelineHooks, TrackSettings, VideoEffect, VideoFilterPipeline, VideoTrack,
};

/// Stop waiting for output once nothing has arrived for this long
const OUTPUT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Options of the `background` command
pub struct BackgroundOptions {
    pub masks: PathBuf,
    pub image: Option<String>,
    pub video: Option<String>,
    pub blur_level: Option<String>,
    pub model_path: Option<String>,
    pub warmup_ms: Option<u64>,
    pub backend: RenderBackend,
}

/// Blur every frame in `input`
pub fn blur_frames(
    input: &Path,
    output: &Path,
    radius: f64,
    fps: f64,
    backend: RenderBackend,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = EffectConfig::FullScreenBlur(FullScreenBlurConfig {
        blur_radius: radius,
        backend,
    });
    process_frames(create_effect(&config, None), input, output, fps)
}

/// Composite every frame in `input` against a new background
pub fn replace_background(
    input: &Path,
    output: &Path,
    options: BackgroundOptions,
    fps: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = VirtualBackgroundConfig {
        model_path: options.model_path,
        backend: options.backend,
        ..Default::default()
    };
    if let Some(warmup_ms) = options.warmup_ms {
        config.segmentation_warmup_ms = warmup_ms;
    }

    if let Some(image) = options.image {
        config.background_filter = BackgroundFilter::Image;
        config.background_image = Some(image);
    } else if let Some(video) = options.video {
        config.background_filter = BackgroundFilter::Video;
        config.background_video = Some(video);
    } else if let Some(level) = options.blur_level {
        config.background_blur_level = Some(parse_blur_level(&level)?);
    }

    let loader: Arc<dyn SegmentationEngineLoader> =
        Arc::new(PrecomputedMaskLoader::new(options.masks));
    let effect = create_effect(&EffectConfig::VirtualBackground(config), Some(loader));
    process_frames(effect, input, output, fps)
}

/// Run the effect stored in a configuration file
pub fn run_config(
    config_path: &Path,
    input: &Path,
    output: &Path,
    masks: Option<PathBuf>,
    fps: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_effect_config(config_path)?;
    println!("Loaded {} configuration", effect_label(&config));

    let loader = masks.map(|dir| {
        Arc::new(PrecomputedMaskLoader::new(dir)) as Arc<dyn SegmentationEngineLoader>
    });
    if loader.is_none() && matches!(config, EffectConfig::VirtualBackground(_)) {
        println!("No mask directory given, frames will pass through unchanged");
    }
    process_frames(create_effect(&config, loader), input, output, fps)
}

/// Print streaming capabilities and the GPU adapter
pub fn probe() -> Result<(), Box<dyn std::error::Error>> {
    let capabilities = StreamingCapabilities::detect();
    println!("Streaming capabilities:");
    println!("{}", serde_json::to_string_pretty(&capabilities)?);
    println!();

    match pollster::block_on(create_render_device("video_filters_probe")) {
        Ok((_, _, info)) => {
            println!("GPU adapter: {}", info.adapter_name);
            println!("GPU backend: {:?}", info.backend);
        }
        Err(reason) => {
            println!("GPU adapter: unavailable ({})", reason);
            println!("Effects with backend 'auto' will use the CPU renderers");
        }
    }
    Ok(())
}

fn effect_label(config: &EffectConfig) -> &'static str {
    match config {
        EffectConfig::FullScreenBlur(_) => "full-screen blur",
        EffectConfig::VirtualBackground(_) => "virtual background",
    }
}

fn parse_blur_level(value: &str) -> Result<BackgroundBlurLevel, Box<dyn std::error::Error>> {
    if let Ok(level) = value.parse::<f64>() {
        return Ok(BackgroundBlurLevel::Numeric(level));
    }
    BlurPreset::ALL
        .into_iter()
        .find(|preset| preset.display_name().eq_ignore_ascii_case(value))
        .map(BackgroundBlurLevel::Preset)
        .ok_or_else(|| format!("Unknown blur level '{}'", value).into())
}

/// Image files in `dir`, in name order
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg")
                })
        })
        .collect();
    frames.sort();
    Ok(frames)
}

/// Feed `input` frames through `effect` on a live track and save the output
fn process_frames(
    effect: Box<dyn VideoEffect>,
    input: &Path,
    output: &Path,
    fps: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let inputs = list_frames(input)?;
    if inputs.is_empty() {
        return Err(format!("No frames found in {}", input.display()).into());
    }
    std::fs::create_dir_all(output)?;

    let first = image::open(&inputs[0])?;
    let settings = TrackSettings::new(first.width(), first.height(), fps);
    println!(
        "Processing {} frames ({}x{} @ {} fps)",
        inputs.len(),
        first.width(),
        first.height(),
        settings.frame_rate_or_default()
    );

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let monitor = Arc::new(Mutex::new(PerformanceMonitor::new()));
    let monitor_clone = Arc::clone(&monitor);

    let rt = tokio::runtime::Runtime::new()?;
    let output_dir = output.to_path_buf();
    let (fed, written) = rt.block_on(async move {
        let (writer, camera) = VideoTrack::new("camera", settings);
        let hooks = PipelineHooks::new()
            .on_error(|e| eprintln!("Frame error: {}", e))
            .on_stats(move |stats| {
                tracing::info!(fps = stats.fps, delay_ms = stats.delay, "Pipeline stats");
                let mut monitor = monitor_clone.lock().unwrap_or_else(PoisonError::into_inner);
                let was_degraded = monitor.status(false).degraded;
                monitor.observe(stats);
                let status = monitor.status(false);
                if status.degraded && !was_degraded {
                    eprintln!(
                        "Warning: processing fell to {:.1} fps on average",
                        status.average_fps
                    );
                }
            });
        let mut pipeline = VideoFilterPipeline::new(camera, effect).with_hooks(hooks);
        let processed_track = pipeline.start()?;
        let mut processed = processed_track
            .claim_frames()
            .ok_or_else(|| FilterError::InvalidState("output frames already claimed".into()))?;

        let written = Arc::new(AtomicU64::new(0));
        let written_clone = Arc::clone(&written);
        let collector = tokio::spawn(async move {
            while let Some(frame) = processed.recv().await {
                let index = written_clone.load(Ordering::SeqCst);
                let path = output_dir.join(format!("frame_{:05}.png", index));
                let saved = frame.picture().save(&path);
                frame.close();
                if let Err(e) = saved {
                    eprintln!("Failed to save {}: {}", path.display(), e);
                    break;
                }
                written_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let frame_duration = settings.frame_duration();
        let mut ticker = tokio::time::interval(frame_duration);
        let mut fed = 0u64;
        for path in &inputs {
            if stop_flag.load(Ordering::SeqCst) {
                println!("Interrupted, stopping");
                break;
            }
            ticker.tick().await;
            let picture = match image::open(path) {
                Ok(image) => image.to_rgba8(),
                Err(e) => {
                    eprintln!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let timestamp_us = (fed as f64 * frame_duration.as_micros() as f64) as u64;
            if let Err(e) = writer.write(Frame::new(Arc::new(picture), timestamp_us)).await {
                eprintln!("Input track closed: {}", e);
                break;
            }
            fed += 1;
        }

        // Wait for the output to catch up; the polyfill may sample fewer frames
        let mut last_count = written.load(Ordering::SeqCst);
        let mut last_progress = Instant::now();
        while written.load(Ordering::SeqCst) < fed
            && last_progress.elapsed() < OUTPUT_IDLE_TIMEOUT
            && !stop_flag.load(Ordering::SeqCst)
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let count = written.load(Ordering::SeqCst);
            if count != last_count {
                last_count = count;
                last_progress = Instant::now();
            }
        }

        pipeline.stop();
        drop(writer);
        pipeline.closed().await;
        let _ = collector.await;
        Ok::<_, FilterError>((fed, written.load(Ordering::SeqCst)))
    })?;

    println!("Frames in: {}, frames out: {}", fed, written);
    let status = monitor
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .status(false);
    if status.degraded {
        println!("Average frame rate: {:.1} fps (degraded)", status.average_fps);
    }
    println!("Output written to: {}", output.display());
    Ok(())
}
