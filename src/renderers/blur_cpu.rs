// SPDX-License-Identifier: GPL-3.0-only

//! Software full-screen blur

use super::kernel::{GaussianKernel, KernelCache};
use super::texture::{ColorTexture, Filter, Target, draw_canvas};
use super::{BlurRenderer, blur_working_size, closed_error};
use crate::constants::blur::MAX_RADIUS;
use crate::errors::FilterResult;
use crate::media::{Frame, RenderSurface};

/// One separable blur pass over `source` (the body of `blur.wgsl`)
fn blur_tap_sum(
    source: &ColorTexture,
    uv: [f32; 2],
    direction: [f32; 2],
    texel_size: [f32; 2],
    kernel: &GaussianKernel,
) -> [f32; 4] {
    let step = [direction[0] * texel_size[0], direction[1] * texel_size[1]];
    let mut color = [0.0f32; 4];
    for (index, weight) in kernel.iter().enumerate() {
        if *weight == 0.0 {
            continue;
        }
        let offset = index as f32 - MAX_RADIUS as f32;
        let sample = source.sample([uv[0] + step[0] * offset, uv[1] + step[1] * offset]);
        for (channel, value) in color.iter_mut().zip(sample) {
            *channel += weight * value;
        }
    }
    color
}

/// Blur renderer running the two reduced-resolution passes on the CPU
#[derive(Debug)]
pub struct CpuBlurRenderer {
    kernels: KernelCache,
    input: ColorTexture,
    ping: ColorTexture,
    pong: ColorTexture,
    closed: bool,
}

impl Default for CpuBlurRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBlurRenderer {
    pub fn new() -> Self {
        Self {
            kernels: KernelCache::new(),
            input: ColorTexture::new(1, 1, Filter::Linear),
            ping: ColorTexture::new(1, 1, Filter::Linear),
            pong: ColorTexture::new(1, 1, Filter::Linear),
            closed: false,
        }
    }

    /// Current size of the working textures
    pub fn working_size(&self) -> (u32, u32) {
        self.ping.dimensions()
    }

    /// Times the working textures have been allocated
    pub fn working_allocations(&self) -> u64 {
        self.ping.allocations()
    }

    /// Number of distinct kernels computed so far
    pub fn cached_kernels(&self) -> usize {
        self.kernels.len()
    }
}

impl BlurRenderer for CpuBlurRenderer {
    fn backend_name(&self) -> &'static str {
        "cpu"
    }

    fn render(
        &mut self,
        frame: &Frame,
        radius: f64,
        surface: &mut RenderSurface,
    ) -> FilterResult<()> {
        if self.closed {
            return Err(closed_error("blur"));
        }
        let (width, height) = (frame.display_width(), frame.display_height());
        if width == 0 || height == 0 {
            return Ok(());
        }
        surface.ensure_size(width, height);

        let (scaled_width, scaled_height) = blur_working_size(width, height);
        self.ping.reallocate(scaled_width, scaled_height);
        self.pong.reallocate(scaled_width, scaled_height);
        self.input.upload(frame.picture());

        let kernel = *self.kernels.get(radius);
        let texel_size = [1.0 / scaled_width as f32, 1.0 / scaled_height as f32];

        let input = &self.input;
        self.ping.draw(Target::Offscreen, |uv| {
            blur_tap_sum(input, uv, [1.0, 0.0], texel_size, &kernel)
        });
        let ping = &self.ping;
        self.pong.draw(Target::Offscreen, |uv| {
            blur_tap_sum(ping, uv, [0.0, 1.0], texel_size, &kernel)
        });

        let pong = &self.pong;
        draw_canvas(surface.pixels_mut(), |uv| pong.sample(uv));
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.input = ColorTexture::new(1, 1, Filter::Linear);
        self.ping = ColorTexture::new(1, 1, Filter::Linear);
        self.pong = ColorTexture::new(1, 1, Filter::Linear);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FilterError;
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    fn solid_frame(width: u32, height: u32, color: [u8; 4]) -> Frame {
        Frame::new(Arc::new(RgbaImage::from_pixel(width, height, Rgba(color))), 0)
    }

    #[test]
    fn test_solid_frame_stays_solid() {
        let mut renderer = CpuBlurRenderer::new();
        let mut surface = RenderSurface::new(1, 1);
        let frame = solid_frame(64, 48, [200, 100, 50, 255]);

        renderer.render(&frame, 6.0, &mut surface).unwrap();

        assert_eq!(surface.pixels().dimensions(), (64, 48));
        for pixel in surface.pixels().pixels() {
            for (actual, expected) in pixel.0.iter().zip([200u8, 100, 50, 255]) {
                assert!(actual.abs_diff(expected) <= 1, "{:?}", pixel);
            }
        }
    }

    #[test]
    fn test_working_textures_follow_scaled_size() {
        let mut renderer = CpuBlurRenderer::new();
        let mut surface = RenderSurface::new(1, 1);

        renderer.render(&solid_frame(100, 100, [0; 4]), 3.0, &mut surface).unwrap();
        assert_eq!(renderer.working_size(), (15, 15));
        let allocations = renderer.working_allocations();

        // 101 * 0.15 still floors to 15
        renderer.render(&solid_frame(101, 101, [0; 4]), 3.0, &mut surface).unwrap();
        assert_eq!(renderer.working_allocations(), allocations);

        renderer.render(&solid_frame(200, 100, [0; 4]), 3.0, &mut surface).unwrap();
        assert_eq!(renderer.working_size(), (30, 15));
        assert_eq!(renderer.working_allocations(), allocations + 1);
    }

    #[test]
    fn test_kernels_cached_by_clamped_radius() {
        let mut renderer = CpuBlurRenderer::new();
        let mut surface = RenderSurface::new(1, 1);
        let frame = solid_frame(20, 20, [0; 4]);
        renderer.render(&frame, 6.0, &mut surface).unwrap();
        renderer.render(&frame, 6.7, &mut surface).unwrap();
        renderer.render(&frame, 40.0, &mut surface).unwrap();
        renderer.render(&frame, 12.0, &mut surface).unwrap();
        assert_eq!(renderer.cached_kernels(), 2);
    }

    #[test]
    fn test_render_after_close_is_invalid_state() {
        let mut renderer = CpuBlurRenderer::new();
        renderer.close();
        renderer.close();
        let mut surface = RenderSurface::new(1, 1);
        let result = renderer.render(&solid_frame(4, 4, [0; 4]), 6.0, &mut surface);
        assert!(matches!(result, Err(FilterError::InvalidState(_))));
    }
}
