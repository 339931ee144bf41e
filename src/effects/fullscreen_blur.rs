// SPDX-License-Identifier: GPL-3.0-only

//! Full-screen blur effect

use crate::config::FullScreenBlurConfig;
use crate::errors::{FilterError, FilterResult};
use crate::media::{Frame, RenderSurface};
use crate::pipeline::{EffectContext, VideoEffect};
use crate::renderers::{BlurRenderer, create_blur_renderer};
use tracing::{debug, info};

/// Blurs every frame with a separable Gaussian kernel
pub struct FullScreenBlur {
    config: FullScreenBlurConfig,
    renderer: Option<Box<dyn BlurRenderer>>,
}

impl std::fmt::Debug for FullScreenBlur {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullScreenBlur")
            .field("config", &self.config)
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl FullScreenBlur {
    pub fn new(config: FullScreenBlurConfig) -> Self {
        Self {
            config,
            renderer: None,
        }
    }

    pub fn radius(&self) -> f64 {
        self.config.blur_radius
    }

    /// Backend of the live renderer, if initialized
    pub fn backend_name(&self) -> Option<&'static str> {
        self.renderer.as_ref().map(|renderer| renderer.backend_name())
    }
}

impl VideoEffect for FullScreenBlur {
    fn name(&self) -> &'static str {
        "full-screen-blur"
    }

    fn initialize(&mut self, context: &EffectContext) -> FilterResult<()> {
        let renderer = create_blur_renderer(self.config.backend)?;
        info!(
            backend = renderer.backend_name(),
            radius = self.config.blur_radius,
            width = context.width,
            height = context.height,
            "Full-screen blur initialized"
        );
        self.renderer = Some(renderer);
        Ok(())
    }

    fn transform(&mut self, frame: &Frame, surface: &mut RenderSurface) -> FilterResult<Frame> {
        let renderer = self
            .renderer
            .as_mut()
            .ok_or_else(|| FilterError::InvalidState("blur renderer is not running".into()))?;
        renderer.render(frame, self.config.blur_radius, surface)?;
        Ok(surface.snapshot(frame.timestamp_us()))
    }

    fn on_stop(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.close();
            debug!("Full-screen blur stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderBackend;
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    fn cpu_blur() -> FullScreenBlur {
        FullScreenBlur::new(FullScreenBlurConfig {
            blur_radius: 6.0,
            backend: RenderBackend::Cpu,
        })
    }

    fn context() -> EffectContext {
        EffectContext {
            width: 32,
            height: 18,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    #[tokio::test]
    async fn test_output_keeps_timestamp_and_size() {
        let mut effect = cpu_blur();
        effect.initialize(&context()).unwrap();
        assert_eq!(effect.backend_name(), Some("cpu"));

        let input = Frame::new(Arc::new(RgbaImage::from_pixel(32, 18, Rgba([9, 9, 9, 255]))), 1234);
        let mut surface = RenderSurface::new(32, 18);
        let output = effect.transform(&input, &mut surface).unwrap();

        assert_eq!(output.timestamp_us(), 1234);
        assert_eq!((output.display_width(), output.display_height()), (32, 18));
    }

    #[tokio::test]
    async fn test_transform_after_stop_is_invalid_state() {
        let mut effect = cpu_blur();
        effect.initialize(&context()).unwrap();
        effect.on_stop();
        effect.on_stop();

        let input = Frame::new(Arc::new(RgbaImage::new(4, 4)), 0);
        let mut surface = RenderSurface::new(4, 4);
        let result = effect.transform(&input, &mut surface);
        assert!(matches!(result, Err(FilterError::InvalidState(_))));
    }
}
