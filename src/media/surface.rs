// SPDX-License-Identifier: GPL-3.0-only

//! Off-screen drawing target sized to the current frame

use super::frame::Frame;
use crate::errors::{FilterError, FilterResult};
use image::RgbaImage;
use std::sync::Arc;
use tracing::debug;

/// Drawing surface owned by one pipeline
///
/// The surface is resized lazily: its storage is only reallocated when a
/// frame with different dimensions arrives.
#[derive(Debug)]
pub struct RenderSurface {
    pixels: RgbaImage,
    resizes: u64,
}

impl RenderSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
            resizes: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Number of times the surface storage was reallocated
    pub fn resize_count(&self) -> u64 {
        self.resizes
    }

    /// Match the surface to a frame size; returns true if it was reallocated
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        if self.pixels.width() == width && self.pixels.height() == height {
            return false;
        }

        debug!(
            from_width = self.pixels.width(),
            from_height = self.pixels.height(),
            width,
            height,
            "Resizing render surface"
        );
        self.pixels = RgbaImage::new(width, height);
        self.resizes += 1;
        true
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    /// Replace the surface contents with a rendered image of the same size
    pub fn present(&mut self, image: RgbaImage) -> FilterResult<()> {
        if image.dimensions() != self.pixels.dimensions() {
            return Err(FilterError::Transform(format!(
                "rendered image is {}x{} but surface is {}x{}",
                image.width(),
                image.height(),
                self.pixels.width(),
                self.pixels.height()
            )));
        }
        self.pixels = image;
        Ok(())
    }

    /// Capture the current contents as a new frame
    pub fn snapshot(&self, timestamp_us: u64) -> Frame {
        Frame::new(Arc::new(self.pixels.clone()), timestamp_us)
    }
}
