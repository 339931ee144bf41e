// SPDX-License-Identifier: GPL-3.0-only

//! Frame sinks: processed frames → live output track

use super::capabilities::StreamingImpl;
use super::track::{TrackWriter, VideoTrack};
use crate::errors::FilterResult;
use crate::media::Frame;
use futures::future::BoxFuture;
use image::RgbaImage;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Push side of the pipeline
pub trait FrameSink: Send {
    fn kind(&self) -> StreamingImpl;

    /// The live output track fed by this sink
    fn track(&self) -> VideoTrack;

    /// Hand a processed frame downstream; the sink takes ownership
    fn write(&mut self, frame: Frame) -> BoxFuture<'_, FilterResult<()>>;

    /// Stop the output track
    fn close(&mut self);
}

/// Sink that writes frames straight into a generated track
pub struct NativeFrameSink {
    writer: TrackWriter,
    input_watcher: Option<JoinHandle<()>>,
}

impl NativeFrameSink {
    /// Create the sink; the output track stops when `input` ends
    pub fn new(input: &VideoTrack, label: &str) -> Self {
        let (writer, output) = VideoTrack::new(label, input.settings());
        let input_watcher = watch_input(input, output);
        Self {
            writer,
            input_watcher,
        }
    }
}

/// Stop `output` once `input` ends, when a runtime is available to watch on
fn watch_input(input: &VideoTrack, output: VideoTrack) -> Option<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let input = input.clone();
    Some(runtime.spawn(async move {
        input.ended().await;
        debug!(track = %input.label(), "Input track ended, stopping output track");
        output.stop();
    }))
}

impl FrameSink for NativeFrameSink {
    fn kind(&self) -> StreamingImpl {
        StreamingImpl::Native
    }

    fn track(&self) -> VideoTrack {
        self.writer.track()
    }

    fn write(&mut self, frame: Frame) -> BoxFuture<'_, FilterResult<()>> {
        let writer = &self.writer;
        Box::pin(async move { writer.write(frame).await })
    }

    fn close(&mut self) {
        self.writer.end();
        if let Some(watcher) = self.input_watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for NativeFrameSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sink that draws each frame onto a canvas and captures the canvas as a track
pub struct PolyfillFrameSink {
    canvas: RgbaImage,
    writer: TrackWriter,
    input_watcher: Option<JoinHandle<()>>,
}

impl PolyfillFrameSink {
    /// Create the sink; the output track stops when `input` ends
    pub fn new(input: &VideoTrack, label: &str) -> Self {
        let settings = input.settings();
        let (writer, output) = VideoTrack::new(label, settings);

        let input_watcher = watch_input(input, output);

        info!(track = %label, "Using polyfill frame sink");

        Self {
            canvas: RgbaImage::new(settings.width.unwrap_or(1), settings.height.unwrap_or(1)),
            writer,
            input_watcher,
        }
    }
}

impl FrameSink for PolyfillFrameSink {
    fn kind(&self) -> StreamingImpl {
        StreamingImpl::Polyfill
    }

    fn track(&self) -> VideoTrack {
        self.writer.track()
    }

    fn write(&mut self, frame: Frame) -> BoxFuture<'_, FilterResult<()>> {
        Box::pin(async move {
            let (width, height) = (frame.display_width(), frame.display_height());
            if self.canvas.dimensions() != (width, height) {
                debug!(width, height, "Resizing sink canvas");
                self.canvas = RgbaImage::new(width, height);
                self.writer.update_dimensions(width, height);
            }

            self.canvas.copy_from_slice(frame.picture().as_raw());
            let timestamp_us = frame.timestamp_us();
            frame.close();

            let captured = Frame::new(Arc::new(self.canvas.clone()), timestamp_us);
            self.writer.write(captured).await
        })
    }

    fn close(&mut self) {
        self.writer.end();
        if let Some(watcher) = self.input_watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for PolyfillFrameSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::track::TrackSettings;
    use image::Rgba;

    #[tokio::test]
    async fn test_polyfill_sink_resizes_and_forwards() {
        let (_camera, input) = VideoTrack::new("camera", TrackSettings::new(2, 2, 30.0));
        let mut sink = PolyfillFrameSink::new(&input, "processed");
        let output = sink.track();
        let mut frames = output.claim_frames().unwrap();

        let picture = Arc::new(RgbaImage::from_pixel(3, 5, Rgba([9, 8, 7, 255])));
        sink.write(Frame::new(picture, 11)).await.unwrap();

        let captured = frames.recv().await.unwrap();
        assert_eq!((captured.display_width(), captured.display_height()), (3, 5));
        assert_eq!(captured.picture().get_pixel(2, 4), &Rgba([9, 8, 7, 255]));
        assert_eq!(output.settings().width, Some(3));
    }

    #[tokio::test]
    async fn test_polyfill_sink_stops_when_input_ends() {
        let (camera, input) = VideoTrack::new("camera", TrackSettings::default());
        let sink = PolyfillFrameSink::new(&input, "processed");
        let output = sink.track();

        drop(camera);
        output.ended().await;
        assert!(output.is_ended());
    }

    #[tokio::test]
    async fn test_native_sink_stops_when_input_ends() {
        let (camera, input) = VideoTrack::new("camera", TrackSettings::default());
        let sink = NativeFrameSink::new(&input, "processed");
        let output = sink.track();
        assert!(!output.is_ended());

        drop(camera);
        output.ended().await;
        assert!(output.is_ended());
    }
}
