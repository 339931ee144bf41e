// SPDX-License-Identifier: GPL-3.0-only

//! Frame renderers behind the two effects
//!
//! Each renderer comes in a GPU flavour built on wgpu and a CPU flavour that
//! runs the same passes in software. Both draw into the pipeline's
//! [`RenderSurface`](crate::media::RenderSurface).
//!
//! ```text
//! BlurRenderer         upload ─► H blur (15%) ─► V blur (15%) ─► canvas
//! CompositorRenderer   state update ─► bilateral refine ─► [masked blur ×4] ─► blend
//! ```

mod blur_cpu;
mod blur_gpu;
pub mod compositor;
pub mod kernel;
pub mod texture;

pub use crate::config::RenderBackend;
pub use blur_cpu::CpuBlurRenderer;
pub use blur_gpu::GpuBlurRenderer;
pub use compositor::{
    BackgroundLayer, BackgroundPixels, CompositeRequest, CompositorRenderer, CpuCompositor,
    GpuCompositor,
};

use crate::constants::blur::WORKING_SCALE;
use crate::errors::{FilterError, FilterResult};
use crate::media::{Frame, RenderSurface};
use tracing::{info, warn};

/// Full-screen Gaussian blur of one frame
pub trait BlurRenderer: Send {
    /// Short backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Draw `frame` blurred with `radius` into `surface`, resizing it to the
    /// frame's display size
    ///
    /// A zero-sized frame is ignored. After [`close`](Self::close) this
    /// returns [`FilterError::InvalidState`].
    fn render(&mut self, frame: &Frame, radius: f64, surface: &mut RenderSurface)
    -> FilterResult<()>;

    /// Release all resources; idempotent
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Size of the reduced-resolution blur targets: 15% of the frame, at least 1×1
pub fn blur_working_size(width: u32, height: u32) -> (u32, u32) {
    let scale = |value: u32| ((value as f32 * WORKING_SCALE).floor() as u32).max(1);
    (scale(width), scale(height))
}

fn closed_error(what: &str) -> FilterError {
    FilterError::InvalidState(format!("{} renderer is closed", what))
}

/// Create a blur renderer for the requested backend
///
/// `Auto` prefers the GPU and falls back to the CPU when no device can be
/// created. Shader build failures are always returned.
pub fn create_blur_renderer(backend: RenderBackend) -> FilterResult<Box<dyn BlurRenderer>> {
    let renderer: Box<dyn BlurRenderer> = match backend {
        RenderBackend::Cpu => Box::new(CpuBlurRenderer::new()),
        RenderBackend::Gpu => Box::new(GpuBlurRenderer::new()?),
        RenderBackend::Auto => match GpuBlurRenderer::new() {
            Ok(renderer) => Box::new(renderer),
            Err(FilterError::UnsupportedContext(reason)) => {
                warn!(reason = %reason, "GPU unavailable, using CPU blur renderer");
                Box::new(CpuBlurRenderer::new())
            }
            Err(e) => return Err(e),
        },
    };
    info!(backend = renderer.backend_name(), "Blur renderer created");
    Ok(renderer)
}

/// Create a compositor for the requested backend, with the same fallback rules
/// as [`create_blur_renderer`]
pub fn create_compositor_renderer(
    backend: RenderBackend,
) -> FilterResult<Box<dyn CompositorRenderer>> {
    let renderer: Box<dyn CompositorRenderer> = match backend {
        RenderBackend::Cpu => Box::new(CpuCompositor::new()),
        RenderBackend::Gpu => Box::new(GpuCompositor::new()?),
        RenderBackend::Auto => match GpuCompositor::new() {
            Ok(renderer) => Box::new(renderer),
            Err(FilterError::UnsupportedContext(reason)) => {
                warn!(reason = %reason, "GPU unavailable, using CPU compositor");
                Box::new(CpuCompositor::new())
            }
            Err(e) => return Err(e),
        },
    };
    info!(backend = renderer.backend_name(), "Compositor renderer created");
    Ok(renderer)
}
