// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the pipeline harness

use image::{Rgba, RgbaImage};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use video_filters::backends::{StreamingCapabilities, TrackWriter};
use video_filters::errors::{FilterError, FilterResult};
use video_filters::pipeline::EffectContext;
use video_filters::{
    Frame, PipelineHooks, RenderSurface, TrackSettings, VideoEffect, VideoFilterPipeline,
    VideoTrack,
};

/// Inverts colors; fails on frames whose timestamp is listed in `fail_at`
struct InvertEffect {
    fail_at: Vec<u64>,
    stops: Arc<AtomicU32>,
}

impl InvertEffect {
    fn new() -> Self {
        Self {
            fail_at: Vec::new(),
            stops: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl VideoEffect for InvertEffect {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn initialize(&mut self, _context: &EffectContext) -> FilterResult<()> {
        Ok(())
    }

    fn transform(&mut self, frame: &Frame, surface: &mut RenderSurface) -> FilterResult<Frame> {
        if self.fail_at.contains(&frame.timestamp_us()) {
            return Err(FilterError::Transform("synthetic failure".into()));
        }
        let mut image = frame.picture().as_ref().clone();
        for pixel in image.pixels_mut() {
            pixel.0 = [255 - pixel[0], 255 - pixel[1], 255 - pixel[2], pixel[3]];
        }
        surface.present(image)?;
        Ok(surface.snapshot(frame.timestamp_us()))
    }

    fn on_stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingInit;

impl VideoEffect for FailingInit {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn initialize(&mut self, _context: &EffectContext) -> FilterResult<()> {
        Err(FilterError::Config("bad configuration".into()))
    }

    fn transform(&mut self, frame: &Frame, surface: &mut RenderSurface) -> FilterResult<Frame> {
        Ok(surface.snapshot(frame.timestamp_us()))
    }
}

/// Waits inside `transform` for a task spawned on the pipeline's runtime
struct RuntimeRoundTripEffect {
    runtime: Option<tokio::runtime::Handle>,
}

impl VideoEffect for RuntimeRoundTripEffect {
    fn name(&self) -> &'static str {
        "runtime-round-trip"
    }

    fn initialize(&mut self, context: &EffectContext) -> FilterResult<()> {
        self.runtime = Some(context.runtime.clone());
        Ok(())
    }

    fn transform(&mut self, frame: &Frame, surface: &mut RenderSurface) -> FilterResult<Frame> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| FilterError::InvalidState("not initialized".into()))?;
        let (tx, rx) = std::sync::mpsc::channel();
        runtime.spawn(async move {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(1))
            .map_err(|_| FilterError::Transform("runtime task never ran".into()))?;
        surface.present(frame.picture().as_ref().clone())?;
        Ok(surface.snapshot(frame.timestamp_us()))
    }
}

fn solid(width: u32, height: u32, color: [u8; 4], timestamp_us: u64) -> Frame {
    Frame::new(
        Arc::new(RgbaImage::from_pixel(width, height, Rgba(color))),
        timestamp_us,
    )
}

fn camera() -> (TrackWriter, VideoTrack) {
    VideoTrack::new("camera", TrackSettings::new(64, 48, 30.0))
}

#[tokio::test]
async fn test_native_pipeline_transforms_frames_in_order() {
    let (writer, track) = camera();
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(InvertEffect::new()))
        .with_capabilities(StreamingCapabilities::native());
    let output = pipeline.start().unwrap();
    let mut frames = output.claim_frames().unwrap();

    for index in 0..5u64 {
        writer
            .write(solid(64, 48, [10, 20, 30, 255], index * 33_000))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.timestamp_us(), index * 33_000);
        assert_eq!(frame.display_width(), 64);
        assert_eq!(frame.display_height(), 48);
        assert_eq!(frame.picture().get_pixel(5, 5).0, [245, 235, 225, 255]);
        frame.close();
    }

    pipeline.stop();
    pipeline.closed().await;
    assert!(output.is_ended());
}

#[tokio::test]
async fn test_transform_error_is_reported_and_processing_continues() {
    let (writer, track) = camera();
    let errors = Arc::new(AtomicU32::new(0));
    let errors_clone = Arc::clone(&errors);
    let hooks = PipelineHooks::new().on_error(move |e| {
        assert!(matches!(e, FilterError::Transform(_)));
        errors_clone.fetch_add(1, Ordering::SeqCst);
    });

    let mut effect = InvertEffect::new();
    effect.fail_at = vec![1];
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(effect))
        .with_hooks(hooks)
        .with_capabilities(StreamingCapabilities::native());
    let output = pipeline.start().unwrap();
    let mut frames = output.claim_frames().unwrap();

    for timestamp in 0..3u64 {
        writer
            .write(solid(64, 48, [0, 0, 0, 255], timestamp))
            .await
            .unwrap();
    }

    let first = frames.recv().await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.timestamp_us(), 0);
    // Frame 1 failed and was dropped
    assert_eq!(second.timestamp_us(), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(pipeline.is_running());

    pipeline.stop();
}

#[tokio::test]
async fn test_initialization_failure_is_returned_from_start() {
    let (_writer, track) = camera();
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(FailingInit));
    assert!(matches!(pipeline.start(), Err(FilterError::Config(_))));
    assert!(!pipeline.is_running());
    assert!(pipeline.output().is_none());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (_writer, track) = camera();
    let effect = InvertEffect::new();
    let stops = Arc::clone(&effect.stops);
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(effect))
        .with_capabilities(StreamingCapabilities::native());

    pipeline.start().unwrap();
    pipeline.stop();
    pipeline.stop();
    pipeline.closed().await;
    pipeline.stop();

    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(!pipeline.is_running());
    assert!(matches!(pipeline.start(), Err(FilterError::InvalidState(_))));
}

#[tokio::test]
async fn test_stop_before_start_releases_effect() {
    let (_writer, track) = camera();
    let effect = InvertEffect::new();
    let stops = Arc::clone(&effect.stops);
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(effect));

    pipeline.stop();
    pipeline.closed().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let (_writer, track) = camera();
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(InvertEffect::new()))
        .with_capabilities(StreamingCapabilities::native());
    pipeline.start().unwrap();
    assert!(matches!(pipeline.start(), Err(FilterError::InvalidState(_))));
    pipeline.stop();
}

#[tokio::test]
async fn test_ended_input_stops_output() {
    let (writer, track) = camera();
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(InvertEffect::new()))
        .with_capabilities(StreamingCapabilities::native());
    let output = pipeline.start().unwrap();
    let _frames = output.claim_frames().unwrap();

    drop(writer);
    tokio::time::timeout(Duration::from_secs(2), output.ended())
        .await
        .unwrap();
    pipeline.closed().await;
}

#[tokio::test]
async fn test_polyfill_pipeline_releases_every_frame() {
    let (writer, track) = camera();
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(InvertEffect::new()))
        .with_capabilities(StreamingCapabilities::polyfill());
    let output = pipeline.start().unwrap();
    let mut frames = output.claim_frames().unwrap();

    writer
        .write(solid(64, 48, [200, 100, 50, 255], 0))
        .await
        .unwrap();

    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.picture().get_pixel(0, 0).0, [55, 155, 205, 255]);
        frame.close();
    }

    pipeline.stop();
    pipeline.closed().await;
    drop(frames);

    assert_eq!(pipeline.ledger().live(), 0);
    assert!(pipeline.ledger().released() >= 3);
}

#[tokio::test]
async fn test_claimed_input_queue_falls_back_to_polyfill() {
    let (writer, track) = camera();
    // Someone else already consumes the frame queue
    let _other = track.claim_frames().unwrap();

    let mut pipeline = VideoFilterPipeline::new(track, Box::new(InvertEffect::new()))
        .with_capabilities(StreamingCapabilities::native());
    let output = pipeline.start().unwrap();
    let mut frames = output.claim_frames().unwrap();

    writer.publish_picture(Arc::new(RgbaImage::from_pixel(64, 48, Rgba([0, 0, 0, 255]))), 0);

    let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.picture().get_pixel(1, 1).0, [255, 255, 255, 255]);
    frame.close();
    pipeline.stop();
}

#[tokio::test]
async fn test_stats_are_emitted_per_window() {
    let (writer, track) = camera();
    let emitted = Arc::new(AtomicU32::new(0));
    let emitted_clone = Arc::clone(&emitted);
    let hooks = PipelineHooks::new().on_stats(move |stats| {
        assert!(stats.fps >= 0.0);
        assert!(stats.delay >= 0.0);
        emitted_clone.fetch_add(1, Ordering::SeqCst);
    });
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(InvertEffect::new()))
        .with_hooks(hooks)
        .with_capabilities(StreamingCapabilities::polyfill());
    let output = pipeline.start().unwrap();
    let mut frames = output.claim_frames().unwrap();

    writer
        .write(solid(64, 48, [1, 2, 3, 255], 0))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while emitted.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
        if let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(100), frames.recv()).await
        {
            frame.close();
        }
    }
    assert!(emitted.load(Ordering::SeqCst) >= 1);
    pipeline.stop();
}

#[tokio::test]
async fn test_transform_does_not_block_runtime_tasks() {
    let (writer, track) = camera();
    let errors = Arc::new(AtomicU32::new(0));
    let errors_clone = Arc::clone(&errors);
    let hooks = PipelineHooks::new().on_error(move |_| {
        errors_clone.fetch_add(1, Ordering::SeqCst);
    });
    let mut pipeline = VideoFilterPipeline::new(
        track,
        Box::new(RuntimeRoundTripEffect { runtime: None }),
    )
    .with_capabilities(StreamingCapabilities::native())
    .with_hooks(hooks);
    let output = pipeline.start().unwrap();
    let mut frames = output.claim_frames().unwrap();

    for index in 0..3u64 {
        writer
            .write(solid(64, 48, [10, 20, 30, 255], index))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(3), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.timestamp_us(), index);
        frame.close();
    }
    assert_eq!(errors.load(Ordering::SeqCst), 0);

    pipeline.stop();
    pipeline.closed().await;
}
