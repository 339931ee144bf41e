// SPDX-License-Identifier: GPL-3.0-only

//! Software textures for the CPU renderers
//!
//! These mirror how the WGSL programs see their inputs: clamp-to-edge
//! addressing, texel-centre sampling with nearest or bilinear filtering, and
//! full-screen passes that write every texel of a target. Offscreen targets
//! use framebuffer orientation (the fragment's `v` runs bottom-up in memory);
//! the canvas uses top-down orientation.

use crate::errors::{FilterError, FilterResult};
use image::{ImageBuffer, Luma, RgbaImage};

/// Single-channel floating point mask as produced by segmentation
pub type MaskImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Texture sampling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Orientation of a full-screen pass target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Framebuffer texture: fragment `v = 1 - row / height`
    Offscreen,
    /// Presented surface: fragment `v = row / height`
    Canvas,
}

impl Target {
    fn fragment_v(self, row_centre: f32) -> f32 {
        match self {
            Target::Offscreen => 1.0 - row_centre,
            Target::Canvas => row_centre,
        }
    }
}

/// Value stored in one texel
pub trait Texel: Copy + Default + Send + Sync + 'static {
    fn lerp(a: Self, b: Self, t: f32) -> Self;
}

impl Texel for f32 {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }
}

impl Texel for [f32; 4] {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
    }
}

pub type ColorTexture = Texture<[f32; 4]>;
pub type MaskTexture = Texture<f32>;

/// A 2-D texture in linear memory, row 0 first
#[derive(Debug, Clone)]
pub struct Texture<T> {
    width: u32,
    height: u32,
    filter: Filter,
    texels: Vec<T>,
    allocations: u64,
}

impl<T: Texel> Texture<T> {
    /// Zero-filled texture; dimensions are at least 1×1
    pub fn new(width: u32, height: u32, filter: Filter) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            width,
            height,
            filter,
            texels: vec![T::default(); (width * height) as usize],
            allocations: 1,
        }
    }

    pub fn from_texels(width: u32, height: u32, filter: Filter, texels: Vec<T>) -> FilterResult<Self> {
        if width == 0 || height == 0 || texels.len() != (width * height) as usize {
            return Err(FilterError::Transform(format!(
                "{} texels do not fill a {}x{} texture",
                texels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            filter,
            texels,
            allocations: 1,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Times the storage has been (re)allocated
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Reallocate zeroed storage if the size differs; returns true if it did
    pub fn reallocate(&mut self, width: u32, height: u32) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if (self.width, self.height) == (width, height) {
            return false;
        }
        self.width = width;
        self.height = height;
        self.texels = vec![T::default(); (width * height) as usize];
        self.allocations += 1;
        true
    }

    pub fn texel(&self, x: u32, y: u32) -> T {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.texels[(y * self.width + x) as usize]
    }

    pub fn texels(&self) -> &[T] {
        &self.texels
    }

    fn fetch(&self, x: i64, y: i64) -> T {
        let x = x.clamp(0, i64::from(self.width) - 1) as usize;
        let y = y.clamp(0, i64::from(self.height) - 1) as usize;
        self.texels[y * self.width as usize + x]
    }

    /// Sample at normalized coordinates with this texture's filter
    pub fn sample(&self, uv: [f32; 2]) -> T {
        let (w, h) = (self.width as f32, self.height as f32);
        match self.filter {
            Filter::Nearest => {
                let x = (uv[0] * w).floor() as i64;
                let y = (uv[1] * h).floor() as i64;
                self.fetch(x, y)
            }
            Filter::Linear => {
                let fx = uv[0] * w - 0.5;
                let fy = uv[1] * h - 0.5;
                let (x0, y0) = (fx.floor(), fy.floor());
                let (tx, ty) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);

                let top = T::lerp(self.fetch(x0, y0), self.fetch(x0 + 1, y0), tx);
                let bottom = T::lerp(self.fetch(x0, y0 + 1), self.fetch(x0 + 1, y0 + 1), tx);
                T::lerp(top, bottom, ty)
            }
        }
    }

    /// Run a full-screen pass writing every texel of this texture
    pub fn draw(&mut self, target: Target, shader: impl Fn([f32; 2]) -> T) {
        let (w, h) = (self.width as f32, self.height as f32);
        for y in 0..self.height {
            let v = target.fragment_v((y as f32 + 0.5) / h);
            let row = (y * self.width) as usize;
            for x in 0..self.width {
                let u = (x as f32 + 0.5) / w;
                self.texels[row + x as usize] = shader([u, v]);
            }
        }
    }
}

impl ColorTexture {
    /// Texture holding the contents of an RGBA image
    pub fn from_rgba(image: &RgbaImage, filter: Filter) -> Self {
        let mut texture = Self::new(image.width(), image.height(), filter);
        texture.upload(image);
        texture
    }

    /// Single texel of an 8-bit color
    pub fn solid(color: [u8; 4]) -> Self {
        let mut texture = Self::new(1, 1, Filter::Nearest);
        texture.texels[0] = unorm4(color);
        texture
    }

    /// Replace contents with an RGBA image, reallocating if the size changed
    pub fn upload(&mut self, image: &RgbaImage) {
        self.reallocate(image.width(), image.height());
        for (texel, pixel) in self.texels.iter_mut().zip(image.pixels()) {
            *texel = unorm4(pixel.0);
        }
    }
}

impl MaskTexture {
    /// Replace contents with a segmentation mask
    pub fn upload_mask(&mut self, mask: &MaskImage) {
        self.reallocate(mask.width(), mask.height());
        for (texel, value) in self.texels.iter_mut().zip(mask.pixels()) {
            *texel = value.0[0].clamp(0.0, 1.0);
        }
    }
}

fn unorm4(color: [u8; 4]) -> [f32; 4] {
    color.map(|c| f32::from(c) / 255.0)
}

fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Run the final full-screen pass straight into an 8-bit canvas image
pub fn draw_canvas(canvas: &mut RgbaImage, shader: impl Fn([f32; 2]) -> [f32; 4]) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let u = (x as f32 + 0.5) / w;
        let v = Target::Canvas.fragment_v((y as f32 + 0.5) / h);
        pixel.0 = shader([u, v]).map(to_unorm8);
    }
}
