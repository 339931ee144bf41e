// SPDX-License-Identifier: GPL-3.0-only

//! Streaming capability probe and source/sink factory
//!
//! The probe runs once when a pipeline starts. Callers get back boxed
//! [`FrameSource`] and [`FrameSink`] trait objects and never branch on which
//! implementation is active.

use super::frame_sink::{FrameSink, NativeFrameSink, PolyfillFrameSink};
use super::frame_source::{FrameSource, NativeFrameSource, PolyfillFrameSource};
use super::timer::FrameTimer;
use super::track::VideoTrack;
use crate::constants::FORCE_POLYFILL_ENV;
use crate::errors::{FilterError, FilterResult};
use crate::media::FrameLedger;
use serde::Serialize;
use tracing::{debug, info};

/// Which implementation backs a frame source or sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingImpl {
    Native,
    Polyfill,
}

impl std::fmt::Display for StreamingImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamingImpl::Native => write!(f, "native"),
            StreamingImpl::Polyfill => write!(f, "polyfill"),
        }
    }
}

/// Streaming primitives available in the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingCapabilities {
    /// Frames can be read from a track's frame queue
    pub track_processor: bool,
    /// Frames can be written into a generated track
    pub track_generator: bool,
}

impl Default for StreamingCapabilities {
    fn default() -> Self {
        Self::native()
    }
}

impl StreamingCapabilities {
    /// Probe the host; `VIDEO_FILTERS_FORCE_POLYFILL=1` disables native primitives
    pub fn detect() -> Self {
        let forced = std::env::var(FORCE_POLYFILL_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let capabilities = if forced {
            Self::polyfill()
        } else {
            Self::native()
        };
        debug!(?capabilities, forced, "Probed streaming capabilities");
        capabilities
    }

    pub fn native() -> Self {
        Self {
            track_processor: true,
            track_generator: true,
        }
    }

    pub fn polyfill() -> Self {
        Self {
            track_processor: false,
            track_generator: false,
        }
    }

    /// Build the frame source for `track`
    ///
    /// Falls back to the polyfill when the track's frame queue is already
    /// held by another consumer.
    pub fn create_source(
        &self,
        track: &VideoTrack,
        ledger: &FrameLedger,
    ) -> FilterResult<Box<dyn FrameSource>> {
        if track.is_ended() {
            return Err(FilterError::InvalidState(format!(
                "input track '{}' has already ended",
                track.label()
            )));
        }

        if self.track_processor {
            if let Some(frames) = track.claim_frames() {
                info!(track = %track.label(), "Using native frame source");
                return Ok(Box::new(NativeFrameSource::new(track.clone(), frames)));
            }
            debug!(track = %track.label(), "Frame queue already claimed, using polyfill");
        }

        let timer = FrameTimer::spawn(track.label())?;
        Ok(Box::new(PolyfillFrameSource::new(
            track,
            timer,
            ledger.clone(),
        )))
    }

    /// Build the frame sink producing the output track for `input`
    pub fn create_sink(&self, input: &VideoTrack, label: &str) -> Box<dyn FrameSink> {
        if self.track_generator {
            info!(track = %label, "Using native frame sink");
            Box::new(NativeFrameSink::new(input, label))
        } else {
            Box::new(PolyfillFrameSink::new(input, label))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::track::TrackSettings;

    #[tokio::test]
    async fn test_claimed_queue_falls_back_to_polyfill() {
        let (_writer, track) = VideoTrack::new("camera", TrackSettings::default());
        let ledger = FrameLedger::new();
        let capabilities = StreamingCapabilities::native();

        let first = capabilities.create_source(&track, &ledger).unwrap();
        assert_eq!(first.kind(), StreamingImpl::Native);

        let second = capabilities.create_source(&track, &ledger).unwrap();
        assert_eq!(second.kind(), StreamingImpl::Polyfill);
    }

    #[tokio::test]
    async fn test_sink_follows_generator_capability() {
        let (_writer, track) = VideoTrack::new("camera", TrackSettings::default());

        let sink = StreamingCapabilities::native().create_sink(&track, "out");
        assert_eq!(sink.kind(), StreamingImpl::Native);

        let sink = StreamingCapabilities::polyfill().create_sink(&track, "out");
        assert_eq!(sink.kind(), StreamingImpl::Polyfill);
    }

    #[tokio::test]
    async fn test_ended_track_is_rejected() {
        let (writer, track) = VideoTrack::new("camera", TrackSettings::default());
        drop(writer);
        let result = StreamingCapabilities::native().create_source(&track, &FrameLedger::new());
        assert!(result.is_err());
    }
}
