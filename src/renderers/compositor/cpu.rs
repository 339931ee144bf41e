// SPDX-License-Identifier: GPL-3.0-only

//! Software compositor
//!
//! Each pass is the Rust counterpart of the WGSL program of the same name,
//! fed the same uniform blocks.

use super::{
    BackgroundLayer, BackgroundPixels, BackgroundSlot, BlurStage, CompositeRequest,
    CompositorRenderer, CoverTransform, DEFAULT_LAYER, MaskedBlurPass, PingPong,
    background_blur_passes, background_blur_size, refine_params, state_params,
};
use crate::constants::compositor::{BACKGROUND_KERNEL_RADIUS, MIN_WEIGHT};
use crate::errors::{FilterError, FilterResult};
use crate::media::RenderSurface;
use crate::renderers::closed_error;
use crate::renderers::texture::{ColorTexture, Filter, MaskTexture, Target, Texel, draw_canvas};
use crate::shaders::{MaskedBlurParams, RefineParams, StateParams};
use tracing::debug;

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// `state_update.wgsl`
fn state_update(
    category: &MaskTexture,
    confidence: &MaskTexture,
    previous: &MaskTexture,
    params: &StateParams,
    uv: [f32; 2],
) -> f32 {
    let prev_coord = [uv[0], 1.0 - uv[1]];
    let mut category = category.sample(uv);
    let mut confidence = confidence.sample(uv);
    let previous = previous.sample(prev_coord);

    if params.selfie_mode != 0 {
        category = 1.0 - category;
        confidence = 1.0 - confidence;
    }
    if category > 0.0 {
        category = 1.0;
        confidence = 1.0 - confidence;
    }

    let alpha = params.smoothing_factor
        * smoothstep(params.smoothstep_min, params.smoothstep_max, confidence);
    alpha * category + (1.0 - alpha) * previous
}

fn distance_squared(a: [f32; 4], b: [f32; 4]) -> f32 {
    (0..3).map(|i| (a[i] - b[i]) * (a[i] - b[i])).sum()
}

/// `mask_refine.wgsl`
fn mask_refine(state: &MaskTexture, frame: &ColorTexture, params: &RefineParams, uv: [f32; 2]) -> f32 {
    let centre = frame.sample(uv);
    let spatial_denom = 2.0 * params.sigma_spatial * params.sigma_spatial;
    let range_denom = 2.0 * params.sigma_range * params.sigma_range;

    let mut total = 0.0;
    let mut accum = 0.0;
    for dy in -2..=2 {
        for dx in -2..=2 {
            let shift = [
                dx as f32 * params.texel_size[0],
                dy as f32 * params.texel_size[1],
            ];
            let coord = [uv[0] + shift[0], uv[1] + shift[1]];
            let color = frame.sample(coord);
            let mask = state.sample(coord);

            let spatial = (-(shift[0] * shift[0] + shift[1] * shift[1]) / spatial_denom).exp();
            let range = (-distance_squared(color, centre) / range_denom).exp();
            let weight = spatial * range;
            total += weight;
            accum += mask * weight;
        }
    }
    accum / total.max(MIN_WEIGHT)
}

/// `masked_blur.wgsl`
fn masked_blur(
    source: &ColorTexture,
    person: &MaskTexture,
    params: &MaskedBlurParams,
    uv: [f32; 2],
) -> [f32; 4] {
    let step = [
        params.direction[0] * params.texel_size[0],
        params.direction[1] * params.texel_size[1],
    ];
    let denom = 2.0 * params.sigma * params.sigma;
    let vertical = params.direction[1] > 0.5;

    let mut color = [0.0f32; 4];
    let mut weight_sum = 0.0f32;
    let mut tap = |coord: [f32; 2], weight: f32| {
        let mask_coord = if vertical {
            [coord[0], 1.0 - coord[1]]
        } else {
            coord
        };
        let weight = weight * (1.0 - person.sample(mask_coord));
        let sample = source.sample(coord);
        for (channel, value) in color.iter_mut().zip(sample) {
            *channel += value * weight;
        }
        weight_sum += weight;
    };

    tap(uv, 1.0);
    for i in 1..=BACKGROUND_KERNEL_RADIUS {
        let offset = i as f32 * params.radius_scale;
        let weight = (-(offset * offset) / denom).exp();
        tap([uv[0] + step[0] * offset, uv[1] + step[1] * offset], weight);
        tap([uv[0] - step[0] * offset, uv[1] - step[1] * offset], weight);
    }

    let denominator = weight_sum.max(MIN_WEIGHT);
    color.map(|channel| channel / denominator)
}

fn run_blur_pass(
    pass: &MaskedBlurPass,
    frame: &ColorTexture,
    person: &MaskTexture,
    first: &mut ColorTexture,
    second: &mut ColorTexture,
) -> FilterResult<()> {
    let params = &pass.params;
    match (pass.input, pass.output) {
        (BlurStage::Frame, BlurStage::First) => {
            first.draw(Target::Offscreen, |uv| masked_blur(frame, person, params, uv));
        }
        (BlurStage::Frame, BlurStage::Second) => {
            second.draw(Target::Offscreen, |uv| masked_blur(frame, person, params, uv));
        }
        (BlurStage::First, BlurStage::Second) => {
            let source = &*first;
            second.draw(Target::Offscreen, |uv| masked_blur(source, person, params, uv));
        }
        (BlurStage::Second, BlurStage::First) => {
            let source = &*second;
            first.draw(Target::Offscreen, |uv| masked_blur(source, person, params, uv));
        }
        (input, output) => {
            return Err(FilterError::Transform(format!(
                "blur pass cannot read {:?} and write {:?}",
                input, output
            )));
        }
    }
    Ok(())
}

fn create_background(layer: &BackgroundLayer<'_>) -> FilterResult<ColorTexture> {
    Ok(match layer.pixels {
        BackgroundPixels::Color(color) => ColorTexture::solid(color),
        BackgroundPixels::Image(image) => ColorTexture::from_rgba(image, Filter::Linear),
    })
}

fn refresh_background(texture: &mut ColorTexture, layer: &BackgroundLayer<'_>) -> FilterResult<()> {
    if let BackgroundPixels::Image(image) = layer.pixels {
        texture.upload(image);
    }
    Ok(())
}

/// Compositor running every pass on the CPU
#[derive(Debug)]
pub struct CpuCompositor {
    frame: ColorTexture,
    category: MaskTexture,
    confidence: MaskTexture,
    states: PingPong<MaskTexture>,
    refined: MaskTexture,
    blur_first: ColorTexture,
    blur_second: ColorTexture,
    background: BackgroundSlot<ColorTexture>,
    frames_composited: u64,
    closed: bool,
}

impl Default for CpuCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuCompositor {
    pub fn new() -> Self {
        Self {
            frame: ColorTexture::new(1, 1, Filter::Nearest),
            category: MaskTexture::new(1, 1, Filter::Linear),
            confidence: MaskTexture::new(1, 1, Filter::Linear),
            states: PingPong::new(
                MaskTexture::new(1, 1, Filter::Linear),
                MaskTexture::new(1, 1, Filter::Linear),
            ),
            refined: MaskTexture::new(1, 1, Filter::Linear),
            blur_first: ColorTexture::new(1, 1, Filter::Linear),
            blur_second: ColorTexture::new(1, 1, Filter::Linear),
            background: BackgroundSlot::new(),
            frames_composited: 0,
            closed: false,
        }
    }

    /// The smoothed mask read by the next frame
    pub fn current_state(&self) -> &MaskTexture {
        self.states.current()
    }

    /// The refined mask of the last composited frame
    pub fn refined_mask(&self) -> &MaskTexture {
        &self.refined
    }
}

impl CompositorRenderer for CpuCompositor {
    fn backend_name(&self) -> &'static str {
        "cpu"
    }

    fn render(
        &mut self,
        request: &CompositeRequest<'_>,
        surface: &mut RenderSurface,
    ) -> FilterResult<()> {
        if self.closed {
            return Err(closed_error("compositor"));
        }
        let frame = request.frame;
        let (width, height) = (frame.display_width(), frame.display_height());
        if width == 0 || height == 0 {
            return Ok(());
        }
        surface.ensure_size(width, height);
        self.frame.upload(frame.picture());

        let Some(masks) = request.masks else {
            let source = &self.frame;
            draw_canvas(surface.pixels_mut(), |uv| source.sample(uv));
            return Ok(());
        };

        self.category.upload_mask(&masks.category);
        self.confidence.upload_mask(&masks.confidence);

        let layer = request.background.unwrap_or(DEFAULT_LAYER);
        if !request.blur.is_active() {
            self.background
                .update(&layer, create_background, refresh_background)?;
        }

        // 1. temporal smoothing into the next state
        let params = state_params(request.selfie_mode);
        let (previous, next) = self.states.split();
        next.reallocate(width, height);
        let (category, confidence) = (&self.category, &self.confidence);
        next.draw(Target::Offscreen, |uv| {
            state_update(category, confidence, previous, &params, uv)
        });

        // 2. edge-aware refinement guided by the frame
        let state = self.states.next_mut();
        let refine = refine_params(width, height);
        self.refined.reallocate(width, height);
        let (state, source) = (&*state, &self.frame);
        self.refined
            .draw(Target::Offscreen, |uv| mask_refine(state, source, &refine, uv));

        // 3 and 4. background selection, blurring the frame's own background if configured
        let (background, background_size) = if request.blur.is_active() {
            let blur_size = background_blur_size(width, height);
            self.blur_first.reallocate(blur_size.0, blur_size.1);
            self.blur_second.reallocate(blur_size.0, blur_size.1);
            for pass in background_blur_passes((width, height), blur_size, request.blur) {
                run_blur_pass(
                    &pass,
                    &self.frame,
                    &self.refined,
                    &mut self.blur_first,
                    &mut self.blur_second,
                )?;
            }
            (&self.blur_second, blur_size)
        } else {
            let size = match layer.pixels {
                BackgroundPixels::Color(_) => (width, height),
                BackgroundPixels::Image(image) => image.dimensions(),
            };
            let texture = self
                .background
                .texture()
                .ok_or_else(|| FilterError::Transform("background texture missing".into()))?;
            (texture, size)
        };

        // 5. blend
        let cover = CoverTransform::new(
            [background_size.0 as f32, background_size.1 as f32],
            [width as f32, height as f32],
        );
        let (source, refined) = (&self.frame, &self.refined);
        draw_canvas(surface.pixels_mut(), |uv| {
            let color = source.sample(uv);
            let bg = background.sample(cover.apply(uv));
            let person = refined.sample(uv);
            <[f32; 4]>::lerp(bg, color, person)
        });

        // 6. swap roles
        self.states.swap();
        self.frames_composited += 1;
        Ok(())
    }

    fn state_index(&self) -> usize {
        self.states.read_index()
    }

    fn frames_composited(&self) -> u64 {
        self.frames_composited
    }

    fn background_allocations(&self) -> u64 {
        self.background.allocations()
    }

    fn background_identifier(&self) -> Option<&str> {
        self.background.identifier()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.background.take();
        for state in self.states.iter_mut() {
            *state = MaskTexture::new(1, 1, Filter::Linear);
        }
        debug!(frames = self.frames_composited, "CPU compositor closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlurSettings;
    use crate::constants::compositor::DEFAULT_BACKGROUND_COLOR;
    use crate::media::Frame;
    use crate::renderers::texture::MaskImage;
    use crate::segmentation::SegmentationMasks;
    use image::{Luma, Rgba, RgbaImage};
    use std::sync::Arc;

    fn frame(width: u32, height: u32) -> Frame {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90, 255])
        });
        Frame::new(Arc::new(image), 0)
    }

    fn uniform_masks(width: u32, height: u32, person: f32, selfie: bool) -> SegmentationMasks {
        let probability = MaskImage::from_pixel(width, height, Luma([person]));
        SegmentationMasks::from_person_probability(&probability, selfie, 0)
    }

    fn request<'a>(frame: &'a Frame, masks: Option<&'a SegmentationMasks>) -> CompositeRequest<'a> {
        CompositeRequest {
            frame,
            masks,
            background: None,
            blur: BlurSettings::default(),
            selfie_mode: true,
        }
    }

    #[test]
    fn test_smoothstep() {
        assert_eq!(smoothstep(0.6, 0.9, 0.5), 0.0);
        assert_eq!(smoothstep(0.6, 0.9, 1.0), 1.0);
        assert!((smoothstep(0.6, 0.9, 0.75) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_without_masks_output_is_input() {
        let mut compositor = CpuCompositor::new();
        let mut surface = RenderSurface::new(1, 1);
        let input = frame(16, 9);

        compositor.render(&request(&input, None), &mut surface).unwrap();

        assert_eq!(surface.pixels(), input.picture().as_ref());
        assert_eq!(compositor.frames_composited(), 0);
        assert_eq!(compositor.background_allocations(), 0);
    }

    #[test]
    fn test_state_converges_towards_person() {
        let mut compositor = CpuCompositor::new();
        let mut surface = RenderSurface::new(1, 1);
        let input = frame(8, 8);
        let masks = uniform_masks(8, 8, 1.0, true);

        for _ in 0..10 {
            compositor.render(&request(&input, Some(&masks)), &mut surface).unwrap();
        }
        // alpha is 0.8 per frame for fully confident pixels
        let value = compositor.current_state().texel(4, 4);
        assert!(value > 0.99, "state {}", value);
    }

    #[test]
    fn test_person_everywhere_shows_frame() {
        let mut compositor = CpuCompositor::new();
        let mut surface = RenderSurface::new(1, 1);
        let input = frame(8, 8);
        let masks = uniform_masks(8, 8, 1.0, false);
        let mut req = request(&input, Some(&masks));
        req.selfie_mode = false;

        for _ in 0..20 {
            compositor.render(&req, &mut surface).unwrap();
        }
        for (actual, expected) in surface.pixels().pixels().zip(input.picture().pixels()) {
            for channel in 0..4 {
                assert!(actual.0[channel].abs_diff(expected.0[channel]) <= 1);
            }
        }
    }

    #[test]
    fn test_background_everywhere_shows_default_color() {
        let mut compositor = CpuCompositor::new();
        let mut surface = RenderSurface::new(1, 1);
        let input = frame(8, 8);
        let masks = uniform_masks(8, 8, 0.0, true);

        compositor.render(&request(&input, Some(&masks)), &mut surface).unwrap();

        assert_eq!(compositor.background_identifier(), Some("color(33,150,243,255)"));
        for pixel in surface.pixels().pixels() {
            assert_eq!(pixel.0, DEFAULT_BACKGROUND_COLOR);
        }
    }

    #[test]
    fn test_state_roles_alternate_with_frame_parity() {
        let mut compositor = CpuCompositor::new();
        let mut surface = RenderSurface::new(1, 1);
        let input = frame(4, 4);
        let masks = uniform_masks(4, 4, 1.0, true);

        for index in 1..=5u64 {
            compositor.render(&request(&input, Some(&masks)), &mut surface).unwrap();
            assert_eq!(compositor.state_index() as u64, index % 2);
        }
    }

    #[test]
    fn test_background_blur_keeps_solid_background() {
        let mut compositor = CpuCompositor::new();
        let mut surface = RenderSurface::new(1, 1);
        let solid = Frame::new(Arc::new(RgbaImage::from_pixel(16, 8, Rgba([40, 80, 120, 255]))), 0);
        let masks = uniform_masks(16, 8, 0.0, true);
        let mut req = request(&solid, Some(&masks));
        req.blur = BlurSettings {
            bg_blur: 15.0,
            bg_blur_radius: 5.0,
        };

        compositor.render(&req, &mut surface).unwrap();
        for pixel in surface.pixels().pixels() {
            for (actual, expected) in pixel.0.iter().zip([40u8, 80, 120, 255]) {
                assert!(actual.abs_diff(expected) <= 1, "{:?}", pixel);
            }
        }
        // The blurred frame is the background, so no background texture is allocated
        assert_eq!(compositor.background_allocations(), 0);
        assert_eq!(compositor.background_identifier(), None);
    }

    #[test]
    fn test_closed_compositor_rejects_frames() {
        let mut compositor = CpuCompositor::new();
        compositor.close();
        compositor.close();
        let input = frame(4, 4);
        let mut surface = RenderSurface::new(1, 1);
        assert!(matches!(
            compositor.render(&request(&input, None), &mut surface),
            Err(FilterError::InvalidState(_))
        ));
    }
}
