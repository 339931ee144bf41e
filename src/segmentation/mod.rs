// SPDX-License-Identifier: GPL-3.0-only

//! Person segmentation adapter
//!
//! The segmentation model itself lives outside this crate. An engine takes a
//! picture and its timestamp and yields two masks of the same size:
//!
//! - `category`: hard label per pixel (0 or 1)
//! - `confidence`: soft score per pixel in `0.0..=1.0`
//!
//! Polarity follows the model family. Selfie models label the person as
//! category 0 and report the person score as confidence. Other models label
//! the person with a non-zero category and report the background score.

mod coordinator;
mod precomputed;

pub use coordinator::{SegmentationCoordinator, SegmentationStatus};
pub use precomputed::{PrecomputedMaskEngine, PrecomputedMaskLoader};

use crate::config::VirtualBackgroundConfig;
use crate::constants::SELFIE_MODEL_MARKER;
use crate::errors::{FilterError, FilterResult};
use crate::media::Picture;
use crate::renderers::texture::MaskImage;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Result of one segmentation pass
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMasks {
    pub category: MaskImage,
    pub confidence: MaskImage,
    /// Timestamp of the frame the masks were computed for
    pub timestamp_us: u64,
}

impl SegmentationMasks {
    pub fn new(category: MaskImage, confidence: MaskImage, timestamp_us: u64) -> FilterResult<Self> {
        if category.dimensions() != confidence.dimensions() {
            return Err(FilterError::Segmentation(format!(
                "category mask is {:?} but confidence mask is {:?}",
                category.dimensions(),
                confidence.dimensions()
            )));
        }
        Ok(Self {
            category,
            confidence,
            timestamp_us,
        })
    }

    /// Raw engine output for a per-pixel person probability
    ///
    /// Produces the polarity the given model family would report.
    pub fn from_person_probability(
        person: &MaskImage,
        selfie_mode: bool,
        timestamp_us: u64,
    ) -> Self {
        let (width, height) = person.dimensions();
        let mut category = MaskImage::new(width, height);
        let mut confidence = MaskImage::new(width, height);
        for (x, y, p) in person.enumerate_pixels() {
            let p = p.0[0].clamp(0.0, 1.0);
            let is_person = p > 0.5;
            let (label, score) = if selfie_mode {
                (if is_person { 0.0 } else { 1.0 }, p)
            } else {
                (if is_person { 1.0 } else { 0.0 }, 1.0 - p)
            };
            category.put_pixel(x, y, image::Luma([label]));
            confidence.put_pixel(x, y, image::Luma([score]));
        }
        Self {
            category,
            confidence,
            timestamp_us,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.category.dimensions()
    }
}

/// Options an engine is loaded with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterOptions {
    pub model_path: String,
    pub selfie_mode: bool,
}

impl SegmenterOptions {
    pub fn from_config(config: &VirtualBackgroundConfig) -> Self {
        Self {
            model_path: config.resolved_model_path(),
            selfie_mode: config.is_selfie_mode(),
        }
    }
}

/// Whether a model path names a selfie-family model
pub fn is_selfie_model(model_path: &str) -> bool {
    model_path.contains(SELFIE_MODEL_MARKER)
}

/// A loaded segmentation model running in video mode
pub trait SegmentationEngine: Send + Sync {
    /// Segment one picture; the returned future must not borrow `self`
    fn segment_for_video(
        &self,
        picture: Picture,
        timestamp_us: u64,
    ) -> BoxFuture<'static, FilterResult<SegmentationMasks>>;

    /// Release model resources
    fn close(&self) {}
}

/// Loads a [`SegmentationEngine`] from a model path
pub trait SegmentationEngineLoader: Send + Sync {
    fn load(
        &self,
        options: SegmenterOptions,
    ) -> BoxFuture<'static, FilterResult<Arc<dyn SegmentationEngine>>>;
}

/// Loader for hosts without a segmentation runtime; always fails
///
/// The virtual background then stays in pass-through mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableLoader;

impl SegmentationEngineLoader for UnavailableLoader {
    fn load(
        &self,
        options: SegmenterOptions,
    ) -> BoxFuture<'static, FilterResult<Arc<dyn SegmentationEngine>>> {
        Box::pin(async move {
            Err(FilterError::Segmentation(format!(
                "no segmentation runtime available for {}",
                options.model_path
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_person_probability_polarity() {
        let person = MaskImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0.9 } else { 0.2 }]));

        let selfie = SegmentationMasks::from_person_probability(&person, true, 7);
        assert_eq!(selfie.category.get_pixel(0, 0).0[0], 0.0);
        assert_eq!(selfie.category.get_pixel(1, 0).0[0], 1.0);
        assert_eq!(selfie.confidence.get_pixel(0, 0).0[0], 0.9);
        assert_eq!(selfie.timestamp_us, 7);

        let other = SegmentationMasks::from_person_probability(&person, false, 7);
        assert_eq!(other.category.get_pixel(0, 0).0[0], 1.0);
        assert!((other.confidence.get_pixel(1, 0).0[0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_masks_rejected() {
        let result = SegmentationMasks::new(MaskImage::new(2, 2), MaskImage::new(3, 2), 0);
        assert!(matches!(result, Err(FilterError::Segmentation(_))));
    }

    #[test]
    fn test_selfie_model_detection() {
        assert!(is_selfie_model("mediapipe/models/selfie_segmenter.tflite"));
        assert!(!is_selfie_model("models/deeplab_v3.tflite"));
    }

    #[tokio::test]
    async fn test_unavailable_loader_fails() {
        let options = SegmenterOptions {
            model_path: "model.tflite".into(),
            selfie_mode: false,
        };
        assert!(UnavailableLoader.load(options).await.is_err());
    }
}
