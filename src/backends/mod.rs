// SPDX-License-Identifier: GPL-3.0-only

//! Track plumbing between the camera and the effect pipeline
//!
//! This module turns a live input track into a pull-based stream of frames
//! and a push-based sequence of processed frames back into a live track:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Input VideoTrack                  │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │  FrameSource                                 │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │   Native    │    │    Polyfill      │    │
//! │  │ frame queue │    │ playback + timer │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └────────────────────┬────────────────────────┘
//!                      │  effect transform
//! ┌────────────────────┴────────────────────────┐
//! │  FrameSink                                   │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │   Native    │    │    Polyfill      │    │
//! │  │  generator  │    │  canvas capture  │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └────────────────────┬────────────────────────┘
//!                      │
//!              Output VideoTrack
//! ```
//!
//! # Modules
//!
//! - [`track`]: live tracks, their writers and frame queues
//! - [`timer`]: off-runtime pacing timer used by the polyfill source
//! - [`frame_source`] / [`frame_sink`]: both implementations of each side
//! - [`capabilities`]: the one-shot probe that picks an implementation

pub mod capabilities;
pub mod frame_sink;
pub mod frame_source;
pub mod timer;
pub mod track;

pub use capabilities::{StreamingCapabilities, StreamingImpl};
pub use frame_sink::{FrameSink, NativeFrameSink, PolyfillFrameSink};
pub use frame_source::{
    FrameSource, FrameStream, NativeFrameSource, PlaybackElement, PolyfillFrameSource,
};
pub use timer::FrameTimer;
pub use track::{FrameReceiver, TrackPicture, TrackSettings, TrackWriter, VideoTrack};
