// SPDX-License-Identifier: GPL-3.0-only

//! Single-use video frames
//!
//! A [`Frame`] owns a reference to immutable RGBA pixel data. Frames are
//! move-only: consuming one with [`Frame::close`] (or dropping it) releases it,
//! so a frame cannot be released twice. Frames created with a [`FrameLedger`]
//! are counted while alive, which makes leaked frames observable.

use crate::errors::{FilterError, FilterResult};
use image::RgbaImage;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Shared, immutable pixel data of a frame
pub type Picture = Arc<RgbaImage>;

/// Counts frames that are alive and frames that have been released
#[derive(Debug, Clone, Default)]
pub struct FrameLedger {
    live: Arc<AtomicUsize>,
    released: Arc<AtomicU64>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames created through this ledger that have not been released yet
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Frames released so far
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One video image with its capture timestamp
pub struct Frame {
    picture: Picture,
    timestamp_us: u64,
    ledger: Option<FrameLedger>,
}

impl Frame {
    /// Wrap pixel data as an untracked frame
    pub fn new(picture: Picture, timestamp_us: u64) -> Self {
        Self {
            picture,
            timestamp_us,
            ledger: None,
        }
    }

    /// Wrap pixel data as a frame counted by `ledger` until released
    pub fn tracked(picture: Picture, timestamp_us: u64, ledger: &FrameLedger) -> Self {
        ledger.acquire();
        Self {
            picture,
            timestamp_us,
            ledger: Some(ledger.clone()),
        }
    }

    /// Build a frame from raw RGBA bytes
    pub fn from_rgba(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_us: u64,
    ) -> FilterResult<Self> {
        let image = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            FilterError::Other(format!(
                "RGBA buffer does not match {}x{} frame",
                width, height
            ))
        })?;
        Ok(Self::new(Arc::new(image), timestamp_us))
    }

    pub fn display_width(&self) -> u32 {
        self.picture.width()
    }

    pub fn display_height(&self) -> u32 {
        self.picture.height()
    }

    /// Capture time in microseconds
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Pixel data of this frame
    pub fn picture(&self) -> &Picture {
        &self.picture
    }

    /// Release the frame
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.release();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.display_width())
            .field("height", &self.display_height())
            .field("timestamp_us", &self.timestamp_us)
            .field("tracked", &self.ledger.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_ledger_counts_live_frames() {
        let ledger = FrameLedger::new();
        let picture = Arc::new(RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255])));

        let first = Frame::tracked(picture.clone(), 10, &ledger);
        let second = Frame::tracked(picture, 20, &ledger);
        assert_eq!(ledger.live(), 2);

        first.close();
        assert_eq!(ledger.live(), 1);
        drop(second);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.released(), 2);
    }

    #[test]
    fn test_from_rgba_rejects_short_buffer() {
        assert!(Frame::from_rgba(2, 2, vec![0; 15], 0).is_err());

        let frame = Frame::from_rgba(2, 2, vec![0; 16], 5).unwrap();
        assert_eq!(frame.display_width(), 2);
        assert_eq!(frame.timestamp_us(), 5);
    }
}
