// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the full-screen blur renderers and effect

use image::{Rgba, RgbaImage};
use std::sync::Arc;
use std::time::Duration;
use video_filters::backends::StreamingCapabilities;
use video_filters::renderers::{BlurRenderer, CpuBlurRenderer, GpuBlurRenderer};
use video_filters::{
    Frame, FullScreenBlur, FullScreenBlurConfig, RenderBackend, RenderSurface, TrackSettings,
    VideoFilterPipeline, VideoTrack,
};

/// 8px black/white stripes, a worst case for local variance
fn striped(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        if (x / 8) % 2 == 0 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    })
}

/// Mean squared difference between horizontally adjacent pixels (red channel)
fn local_variance(image: &RgbaImage) -> f64 {
    let mut total = 0.0;
    let mut count = 0u64;
    for y in 0..image.height() {
        for x in 1..image.width() {
            let a = f64::from(image.get_pixel(x - 1, y)[0]);
            let b = f64::from(image.get_pixel(x, y)[0]);
            total += (a - b) * (a - b);
            count += 1;
        }
    }
    total / count as f64
}

fn frame(image: RgbaImage, timestamp_us: u64) -> Frame {
    Frame::new(Arc::new(image), timestamp_us)
}

#[test]
fn test_cpu_blur_reduces_local_variance() {
    let input = striped(1280, 720);
    let before = local_variance(&input);

    let mut renderer = CpuBlurRenderer::new();
    let mut surface = RenderSurface::new(1, 1);
    renderer
        .render(&frame(input, 0), 6.0, &mut surface)
        .unwrap();

    assert_eq!((surface.width(), surface.height()), (1280, 720));
    assert_eq!(renderer.working_size(), (192, 108));
    let after = local_variance(surface.pixels());
    assert!(
        after < before * 0.5,
        "variance {} not reduced from {}",
        after,
        before
    );
}

#[test]
fn test_cpu_blur_ignores_empty_frame() {
    let mut renderer = CpuBlurRenderer::new();
    let mut surface = RenderSurface::new(8, 8);
    renderer
        .render(&frame(RgbaImage::new(0, 0), 0), 6.0, &mut surface)
        .unwrap();
    assert_eq!((surface.width(), surface.height()), (8, 8));
    assert_eq!(surface.resize_count(), 0);
}

#[test]
fn test_gpu_blur_reduces_local_variance() {
    let mut renderer = match GpuBlurRenderer::new() {
        Ok(renderer) => renderer,
        Err(_) => {
            println!("Skipping test (no GPU)");
            return;
        }
    };

    let input = striped(1280, 720);
    let before = local_variance(&input);
    let mut surface = RenderSurface::new(1, 1);
    renderer
        .render(&frame(input, 0), 6.0, &mut surface)
        .unwrap();

    assert_eq!((surface.width(), surface.height()), (1280, 720));
    assert!(local_variance(surface.pixels()) < before * 0.5);
    renderer.close();
}

#[tokio::test]
async fn test_full_screen_blur_pipeline() {
    let (writer, track) = VideoTrack::new("camera", TrackSettings::new(160, 120, 30.0));
    let effect = FullScreenBlur::new(FullScreenBlurConfig {
        blur_radius: 6.0,
        backend: RenderBackend::Cpu,
    });
    let mut pipeline = VideoFilterPipeline::new(track, Box::new(effect))
        .with_capabilities(StreamingCapabilities::native());
    let output = pipeline.start().unwrap();
    let mut frames = output.claim_frames().unwrap();

    let input = striped(160, 120);
    let before = local_variance(&input);
    writer.write(frame(input, 42)).await.unwrap();

    let blurred = tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blurred.timestamp_us(), 42);
    assert_eq!((blurred.display_width(), blurred.display_height()), (160, 120));
    assert!(local_variance(blurred.picture()) < before);
    blurred.close();

    pipeline.stop();
    pipeline.closed().await;
}
