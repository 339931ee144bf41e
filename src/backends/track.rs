// SPDX-License-Identifier: GPL-3.0-only

//! Live video tracks
//!
//! A track is created as a pair: the [`TrackWriter`] held by the producer
//! (camera, frame sink) and any number of cloned [`VideoTrack`] handles held by
//! consumers. Every written frame updates the track's current picture, which
//! is what a playback element would show. If a consumer has claimed the
//! track's frame queue the frame itself is also delivered through it, with
//! backpressure; otherwise it is released right away.

use crate::constants::{DEFAULT_FRAME_RATE, FRAME_QUEUE_DEPTH};
use crate::errors::{FilterError, FilterResult};
use crate::media::{Frame, Picture};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

/// Receiving end of a track's frame queue
pub type FrameReceiver = mpsc::Receiver<Frame>;

/// Settings a track reports to its consumers
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
}

impl TrackSettings {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
        }
    }

    /// Reported frame rate, or 30 when unknown
    pub fn frame_rate_or_default(&self) -> f64 {
        self.frame_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or(DEFAULT_FRAME_RATE)
    }

    /// Target duration of one frame (`1000 / frameRate` ms)
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_or_default())
    }
}

/// Picture most recently written to a track, with its capture timestamp
#[derive(Debug, Clone)]
pub struct TrackPicture {
    pub picture: Picture,
    pub timestamp_us: u64,
}

struct TrackShared {
    id: Uuid,
    label: String,
    settings: Mutex<TrackSettings>,
    queue: Mutex<Option<FrameReceiver>>,
    queue_claimed: AtomicBool,
    picture: watch::Sender<Option<TrackPicture>>,
    ended: watch::Sender<bool>,
}

impl TrackShared {
    fn end(&self) {
        let was_live = !self.ended.send_replace(true);
        if was_live {
            debug!(track = %self.label, id = %self.id, "Track ended");
        }
    }
}

/// Consumer handle to a live video track
#[derive(Clone)]
pub struct VideoTrack {
    shared: Arc<TrackShared>,
}

/// Producer handle of a live video track
///
/// Dropping the writer ends the track.
pub struct TrackWriter {
    shared: Arc<TrackShared>,
    frames: mpsc::Sender<Frame>,
}

impl VideoTrack {
    /// Create a new live track and the writer that feeds it
    pub fn new(label: &str, settings: TrackSettings) -> (TrackWriter, VideoTrack) {
        let (frames, queue) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (picture, _) = watch::channel(None);
        let (ended, _) = watch::channel(false);

        let shared = Arc::new(TrackShared {
            id: Uuid::new_v4(),
            label: label.to_string(),
            settings: Mutex::new(settings),
            queue: Mutex::new(Some(queue)),
            queue_claimed: AtomicBool::new(false),
            picture,
            ended,
        });

        (
            TrackWriter {
                shared: Arc::clone(&shared),
                frames,
            },
            VideoTrack { shared },
        )
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn settings(&self) -> TrackSettings {
        *self
            .shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ended(&self) -> bool {
        *self.shared.ended.borrow()
    }

    /// End the track; idempotent
    pub fn stop(&self) {
        self.shared.end();
    }

    /// Resolves once the track has ended
    pub async fn ended(&self) {
        let mut ended = self.shared.ended.subscribe();
        // An error means the sender is gone, which also means the track is over
        let _ = ended.wait_for(|ended| *ended).await;
    }

    /// Whether the frame queue is still available to be claimed
    pub fn supports_frame_queue(&self) -> bool {
        !self.shared.queue_claimed.load(Ordering::SeqCst)
    }

    /// Take the frame queue; only one consumer can ever hold it
    pub fn claim_frames(&self) -> Option<FrameReceiver> {
        let receiver = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        self.shared.queue_claimed.store(true, Ordering::SeqCst);
        Some(receiver)
    }

    /// Watch the track's current picture, as a playback element would
    pub fn subscribe_picture(&self) -> watch::Receiver<Option<TrackPicture>> {
        self.shared.picture.subscribe()
    }

    pub fn current_picture(&self) -> Option<TrackPicture> {
        self.shared.picture.borrow().clone()
    }
}

impl std::fmt::Debug for VideoTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoTrack")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl TrackWriter {
    /// Consumer handle for the track this writer feeds
    pub fn track(&self) -> VideoTrack {
        VideoTrack {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Publish a frame, waiting for queue space if a consumer holds the queue
    pub async fn write(&self, frame: Frame) -> FilterResult<()> {
        if *self.shared.ended.borrow() {
            return Err(FilterError::InvalidState(format!(
                "track '{}' has ended",
                self.shared.label
            )));
        }

        self.publish_picture(frame.picture().clone(), frame.timestamp_us());
        self.update_dimensions(frame.display_width(), frame.display_height());

        if !self.shared.queue_claimed.load(Ordering::SeqCst) {
            frame.close();
            return Ok(());
        }

        // A dropped receiver means the consumer is shutting down
        self.frames
            .send(frame)
            .await
            .map_err(|_| FilterError::Aborted)
    }

    /// Update the current picture without delivering a frame
    pub fn publish_picture(&self, picture: Picture, timestamp_us: u64) {
        self.shared.picture.send_replace(Some(TrackPicture {
            picture,
            timestamp_us,
        }));
    }

    /// Record the size of the frames now flowing through the track
    pub fn update_dimensions(&self, width: u32, height: u32) {
        let mut settings = self
            .shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        settings.width = Some(width);
        settings.height = Some(height);
    }

    pub fn end(&self) {
        self.shared.end();
    }

    pub fn is_ended(&self) -> bool {
        *self.shared.ended.borrow()
    }
}

impl Drop for TrackWriter {
    fn drop(&mut self) {
        self.shared.end();
    }
}
