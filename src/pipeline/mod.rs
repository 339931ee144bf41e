// SPDX-License-Identifier: GPL-3.0-only

//! Effect pipeline: the effect contract, runtime hooks and the harness

pub mod harness;
pub mod performance;
pub mod stats;

pub use harness::VideoFilterPipeline;
pub use performance::{DegradationReason, PerformanceMonitor, PerformanceStatus};
pub use stats::{PerformanceStats, StatsWindow};

use crate::errors::{FilterError, FilterResult};
use crate::media::{Frame, RenderSurface};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Context handed to an effect during one-time initialization
#[derive(Debug, Clone)]
pub struct EffectContext {
    /// Initial render surface width
    pub width: u32,
    /// Initial render surface height
    pub height: u32,
    /// Runtime for background work the effect starts (asset and model loading)
    pub runtime: Handle,
}

/// A per-frame video transformation driven by [`VideoFilterPipeline`]
pub trait VideoEffect: Send {
    /// Short name used in logs and track labels
    fn name(&self) -> &'static str;

    /// One-time setup; an error here is fatal and returned from `start()`
    fn initialize(&mut self, context: &EffectContext) -> FilterResult<()>;

    /// Render `frame` into `surface` and return the output frame
    ///
    /// The surface already has the frame's dimensions. The input frame is
    /// released by the harness whatever the outcome.
    fn transform(&mut self, frame: &Frame, surface: &mut RenderSurface) -> FilterResult<Frame>;

    /// Release everything acquired in `initialize`; may run more than once
    fn on_stop(&mut self) {}
}

pub type ErrorHook = Arc<dyn Fn(&FilterError) + Send + Sync>;
pub type StatsHook = Arc<dyn Fn(&PerformanceStats) + Send + Sync>;

/// Callbacks fired by a running pipeline
#[derive(Clone, Default)]
pub struct PipelineHooks {
    on_error: Option<ErrorHook>,
    on_stats: Option<StatsHook>,
}

impl PipelineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every steady-state failure
    pub fn on_error(mut self, hook: impl Fn(&FilterError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Called about once per second with frame statistics
    pub fn on_stats(mut self, hook: impl Fn(&PerformanceStats) + Send + Sync + 'static) -> Self {
        self.on_stats = Some(Arc::new(hook));
        self
    }

    pub(crate) fn emit_error(&self, error: &FilterError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }

    pub(crate) fn emit_stats(&self, stats: &PerformanceStats) {
        if let Some(hook) = &self.on_stats {
            hook(stats);
        }
    }
}

impl std::fmt::Debug for PipelineHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHooks")
            .field("on_error", &self.on_error.is_some())
            .field("on_stats", &self.on_stats.is_some())
            .finish()
    }
}
