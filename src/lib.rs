// SPDX-License-Identifier: GPL-3.0-only

//! Video Filters - real-time effects for live camera tracks
//!
//! This library takes a live video track, runs every frame through an effect
//! and exposes the result as a new live track.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Live tracks, frame sources/sinks (native and polyfill)
//! - [`pipeline`]: Effect trait, pipeline harness and frame statistics
//! - [`effects`]: Full-screen blur and virtual background
//! - [`renderers`]: GPU (wgpu) and CPU renderers behind both effects
//! - [`segmentation`]: Segmentation engine adapter and latest-wins coordinator
//! - [`backgrounds`]: Color, image and animated backgrounds
//! - [`config`]: Effect configuration
//!
//! # Example
//!
//! ```ignore
//! let (writer, camera) = VideoTrack::new("camera", TrackSettings::new(1280, 720, 30.0));
//! let effect = FullScreenBlur::new(FullScreenBlurConfig::default());
//! let mut pipeline = VideoFilterPipeline::new(camera, Box::new(effect));
//! let output = pipeline.start()?;
//! ```

pub mod backends;
pub mod backgrounds;
pub mod config;
pub mod constants;
pub mod effects;
pub mod errors;
pub mod gpu;
pub mod media;
pub mod pipeline;
pub mod renderers;
pub mod segmentation;
pub mod shaders;

// Re-export commonly used types
pub use backends::{TrackSettings, VideoTrack};
pub use config::{EffectConfig, FullScreenBlurConfig, RenderBackend, VirtualBackgroundConfig};
pub use effects::{FullScreenBlur, VirtualBackground, VirtualBackgroundHandle};
pub use errors::{FilterError, FilterResult};
pub use media::{Frame, RenderSurface};
pub use pipeline::{PipelineHooks, VideoEffect, VideoFilterPipeline};
