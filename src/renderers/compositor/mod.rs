// SPDX-License-Identifier: GPL-3.0-only

//! Background compositor shared types
//!
//! Per frame with masks available:
//!
//! 1. state update: blend the new masks into the next state texture
//! 2. refine: joint bilateral filter of that state, guided by the frame
//! 3. optional background blur: four masked passes at half resolution
//! 4. background selection: blurred frame, configured background or default color
//! 5. blend onto the canvas, then swap the state roles
//!
//! Without masks the frame is drawn unchanged.

mod cpu;
mod gpu;

pub use cpu::CpuCompositor;
pub use gpu::GpuCompositor;

use crate::config::BlurSettings;
use crate::constants::compositor::{
    BACKGROUND_BLUR_SCALE, BACKGROUND_KERNEL_RADIUS, BACKGROUND_SIGMA_SCALE,
    DEFAULT_BACKGROUND_COLOR, SIGMA_RANGE, SIGMA_SPATIAL, SMOOTHING_FACTOR, SMOOTHSTEP_MAX,
    SMOOTHSTEP_MIN,
};
use crate::errors::FilterResult;
use crate::media::{Frame, RenderSurface};
use crate::segmentation::SegmentationMasks;
use crate::shaders::{MaskedBlurParams, RefineParams, StateParams};
use image::RgbaImage;
use tracing::debug;

/// Pixels of the configured background
#[derive(Debug, Clone, Copy)]
pub enum BackgroundPixels<'a> {
    Color([u8; 4]),
    Image(&'a RgbaImage),
}

/// Background to composite against, as of this frame
#[derive(Debug, Clone, Copy)]
pub struct BackgroundLayer<'a> {
    /// Stable identity; the texture is recreated only when this changes
    pub identifier: &'a str,
    pub pixels: BackgroundPixels<'a>,
    /// Changes when the pixels of an animated background change
    pub revision: u64,
}

/// Drawn when masks are available but no background is configured
pub const DEFAULT_LAYER: BackgroundLayer<'static> = BackgroundLayer {
    identifier: "color(33,150,243,255)",
    pixels: BackgroundPixels::Color(DEFAULT_BACKGROUND_COLOR),
    revision: 0,
};

/// Everything the compositor needs for one frame
#[derive(Debug, Clone, Copy)]
pub struct CompositeRequest<'a> {
    pub frame: &'a Frame,
    /// Latest segmentation result, if any
    pub masks: Option<&'a SegmentationMasks>,
    /// Configured background; `None` selects the default color
    pub background: Option<BackgroundLayer<'a>>,
    pub blur: BlurSettings,
    pub selfie_mode: bool,
}

/// Multi-pass person/background compositor
pub trait CompositorRenderer: Send {
    fn backend_name(&self) -> &'static str;

    /// Draw one composited frame into `surface`, resized to the frame
    ///
    /// After [`close`](Self::close) this returns `InvalidState`.
    fn render(
        &mut self,
        request: &CompositeRequest<'_>,
        surface: &mut RenderSurface,
    ) -> FilterResult<()>;

    /// Index of the state texture holding the latest smoothed mask
    fn state_index(&self) -> usize;

    /// Frames that went through the full composite path
    fn frames_composited(&self) -> u64;

    /// Background textures created so far
    fn background_allocations(&self) -> u64;

    /// Identifier of the background texture currently held
    fn background_identifier(&self) -> Option<&str>;

    /// Release all resources; idempotent
    fn close(&mut self);
}

/// Two buffers whose read and write roles swap every frame
#[derive(Debug)]
pub struct PingPong<T> {
    buffers: [T; 2],
    read: usize,
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            buffers: [first, second],
            read: 0,
        }
    }

    /// Index of the buffer read this frame
    pub fn read_index(&self) -> usize {
        self.read
    }

    /// `(previous, next)` for this frame; never the same buffer
    pub fn split(&mut self) -> (&T, &mut T) {
        let (low, high) = self.buffers.split_at_mut(1);
        if self.read == 0 {
            (&low[0], &mut high[0])
        } else {
            (&high[0], &mut low[0])
        }
    }

    /// The buffer written this frame
    pub fn next_mut(&mut self) -> &mut T {
        &mut self.buffers[1 - self.read]
    }

    /// The buffer read this frame
    pub fn current(&self) -> &T {
        &self.buffers[self.read]
    }

    /// Make the buffer just written the one read next frame
    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.buffers.iter_mut()
    }
}

/// Background texture cached by identifier
#[derive(Debug)]
pub struct BackgroundSlot<T> {
    current: Option<(String, u64, T)>,
    allocations: u64,
}

impl<T> Default for BackgroundSlot<T> {
    fn default() -> Self {
        Self {
            current: None,
            allocations: 0,
        }
    }
}

impl<T> BackgroundSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the slot hold `layer`
    ///
    /// `create` runs only when the identifier changes. `refresh` runs when an
    /// animated layer's revision changes under the same identifier.
    pub fn update(
        &mut self,
        layer: &BackgroundLayer<'_>,
        create: impl FnOnce(&BackgroundLayer<'_>) -> FilterResult<T>,
        refresh: impl FnOnce(&mut T, &BackgroundLayer<'_>) -> FilterResult<()>,
    ) -> FilterResult<&T> {
        let same = matches!(&self.current, Some((id, _, _)) if id == layer.identifier);
        if !same {
            // Drop the old texture before creating the new one
            self.current = None;
            let texture = create(layer)?;
            self.allocations += 1;
            debug!(identifier = layer.identifier, "Background texture created");
            self.current = Some((layer.identifier.to_string(), layer.revision, texture));
        } else if let Some((_, revision, texture)) = &mut self.current
            && *revision != layer.revision
        {
            refresh(texture, layer)?;
            *revision = layer.revision;
        }

        match &self.current {
            Some((_, _, texture)) => Ok(texture),
            None => Err(crate::errors::FilterError::Transform(
                "background texture missing".into(),
            )),
        }
    }

    pub fn texture(&self) -> Option<&T> {
        self.current.as_ref().map(|(_, _, texture)| texture)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _, _)| id.as_str())
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn take(&mut self) -> Option<T> {
        self.current.take().map(|(_, _, texture)| texture)
    }
}

/// Scale and offset that center-crop a background to cover the canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverTransform {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl CoverTransform {
    pub fn new(background: [f32; 2], canvas: [f32; 2]) -> Self {
        let canvas_aspect = canvas[0] / canvas[1];
        let bg_aspect = background[0] / background[1];
        let mut scale = [1.0, 1.0];
        let mut offset = [0.0, 0.0];
        if canvas_aspect < bg_aspect {
            scale[0] = bg_aspect / canvas_aspect;
            offset[0] = (1.0 - scale[0]) / 2.0;
        } else {
            scale[1] = canvas_aspect / bg_aspect;
            offset[1] = (1.0 - scale[1]) / 2.0;
        }
        Self { scale, offset }
    }

    /// Background coordinate for a canvas coordinate
    pub fn apply(&self, uv: [f32; 2]) -> [f32; 2] {
        [
            (uv[0] - self.offset[0]) / self.scale[0],
            (uv[1] - self.offset[1]) / self.scale[1],
        ]
    }
}

/// Size of the background blur targets: half the frame, at least 1×1
pub fn background_blur_size(width: u32, height: u32) -> (u32, u32) {
    let scale = |value: u32| ((value as f32 * BACKGROUND_BLUR_SCALE).floor() as u32).max(1);
    (scale(width), scale(height))
}

/// Input of one background blur pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurStage {
    Frame,
    First,
    Second,
}

/// One masked blur pass: read `input`, write `output`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskedBlurPass {
    pub input: BlurStage,
    pub output: BlurStage,
    pub params: MaskedBlurParams,
}

/// The four background blur passes for a frame and blur settings
///
/// Horizontal then vertical, twice. The first pass reads the full-size frame
/// and steps in frame texels; later passes step in blur-target texels.
pub fn background_blur_passes(
    frame_size: (u32, u32),
    blur_size: (u32, u32),
    settings: BlurSettings,
) -> [MaskedBlurPass; 4] {
    let frame_texel = [1.0 / frame_size.0 as f32, 1.0 / frame_size.1 as f32];
    let blur_texel = [1.0 / blur_size.0 as f32, 1.0 / blur_size.1 as f32];
    let sigma = settings.bg_blur * BACKGROUND_SIGMA_SCALE;
    let radius_scale = settings.bg_blur_radius.max(0.0) / BACKGROUND_KERNEL_RADIUS as f32;

    let pass = |input, output, texel_size, direction| MaskedBlurPass {
        input,
        output,
        params: MaskedBlurParams {
            texel_size,
            direction,
            sigma,
            radius_scale,
            _pad: [0.0; 2],
        },
    };
    [
        pass(BlurStage::Frame, BlurStage::First, frame_texel, [1.0, 0.0]),
        pass(BlurStage::First, BlurStage::Second, blur_texel, [0.0, 1.0]),
        pass(BlurStage::Second, BlurStage::First, blur_texel, [1.0, 0.0]),
        pass(BlurStage::First, BlurStage::Second, blur_texel, [0.0, 1.0]),
    ]
}

pub fn state_params(selfie_mode: bool) -> StateParams {
    StateParams {
        smoothing_factor: SMOOTHING_FACTOR,
        smoothstep_min: SMOOTHSTEP_MIN,
        smoothstep_max: SMOOTHSTEP_MAX,
        selfie_mode: u32::from(selfie_mode),
    }
}

pub fn refine_params(width: u32, height: u32) -> RefineParams {
    RefineParams {
        texel_size: [1.0 / width as f32, 1.0 / height as f32],
        sigma_spatial: SIGMA_SPATIAL,
        sigma_range: SIGMA_RANGE,
    }
}
