// SPDX-License-Identifier: GPL-3.0-only

//! Frame sources: live track → stream of frames

use super::capabilities::StreamingImpl;
use super::timer::FrameTimer;
use super::track::{FrameReceiver, TrackPicture, VideoTrack};
use crate::media::{Frame, FrameLedger, Picture};
use async_stream::stream;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Stream of frames pulled from a track; ends with the track
pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// Pull side of the pipeline
///
/// Dropping the stream cancels the source and releases everything it holds.
pub trait FrameSource: Send {
    fn kind(&self) -> StreamingImpl;

    fn into_stream(self: Box<Self>) -> FrameStream;
}

/// Source reading frames straight from the track's frame queue
pub struct NativeFrameSource {
    track: VideoTrack,
    frames: FrameReceiver,
}

impl NativeFrameSource {
    pub fn new(track: VideoTrack, frames: FrameReceiver) -> Self {
        Self { track, frames }
    }
}

impl FrameSource for NativeFrameSource {
    fn kind(&self) -> StreamingImpl {
        StreamingImpl::Native
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let mut source = *self;
        Box::pin(stream! {
            loop {
                let next = tokio::select! {
                    frame = source.frames.recv() => frame,
                    _ = source.track.ended() => None,
                };
                match next {
                    Some(frame) => yield frame,
                    None => break,
                }
            }
            debug!(track = %source.track.label(), "Native frame source finished");
        })
    }
}

/// Hidden playback of a track: exposes whatever picture is current
pub struct PlaybackElement {
    track: VideoTrack,
    picture: watch::Receiver<Option<TrackPicture>>,
    playing: bool,
}

impl PlaybackElement {
    pub fn attach(track: &VideoTrack) -> Self {
        Self {
            track: track.clone(),
            picture: track.subscribe_picture(),
            playing: true,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing && !self.track.is_ended()
    }

    /// Current picture, waiting for the first one; None once playback stops
    pub async fn current_picture(&mut self) -> Option<Picture> {
        loop {
            if !self.is_playing() {
                return None;
            }
            if let Some(current) = self.picture.borrow_and_update().as_ref() {
                return Some(current.picture.clone());
            }
            tokio::select! {
                changed = self.picture.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = self.track.ended() => return None,
            }
        }
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }
}

/// Source that samples a playback element at the track's frame rate
pub struct PolyfillFrameSource {
    element: PlaybackElement,
    timer: FrameTimer,
    frame_duration: Duration,
    ledger: FrameLedger,
    origin: Instant,
}

impl PolyfillFrameSource {
    pub fn new(track: &VideoTrack, timer: FrameTimer, ledger: FrameLedger) -> Self {
        let frame_duration = track.settings().frame_duration();
        info!(
            track = %track.label(),
            frame_duration_ms = frame_duration.as_millis() as u64,
            "Using polyfill frame source"
        );
        Self {
            element: PlaybackElement::attach(track),
            timer,
            frame_duration,
            ledger,
            origin: Instant::now(),
        }
    }
}

impl FrameSource for PolyfillFrameSource {
    fn kind(&self) -> StreamingImpl {
        StreamingImpl::Polyfill
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let mut source = *self;
        Box::pin(stream! {
            let mut last_pull: Option<Instant> = None;
            loop {
                if let Some(previous) = last_pull {
                    let deadline = previous + source.frame_duration;
                    if source.timer.sleep_until(deadline).await.is_err() {
                        break;
                    }
                }
                let Some(picture) = source.element.current_picture().await else {
                    break;
                };

                let captured = Instant::now();
                last_pull = Some(captured);
                let timestamp_us = captured.duration_since(source.origin).as_micros() as u64;

                // Copy into a buffer owned by the new frame, like drawing to a canvas
                let drawn = Arc::new(picture.as_ref().clone());
                yield Frame::tracked(drawn, timestamp_us, &source.ledger);
            }
            debug!("Polyfill frame source finished");
        })
    }
}

impl Drop for PolyfillFrameSource {
    fn drop(&mut self) {
        self.element.stop();
        self.timer.shutdown();
    }
}
