// SPDX-License-Identifier: GPL-3.0-only

//! Segmentation engine replaying masks stored as grayscale images
//!
//! Each image in the directory is one person-probability mask (white is the
//! person). Requests cycle through the images in lexical file-name order.

use super::{SegmentationEngine, SegmentationEngineLoader, SegmentationMasks, SegmenterOptions};
use crate::errors::{FilterError, FilterResult};
use crate::media::Picture;
use crate::renderers::texture::MaskImage;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

const MASK_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Person probability from an 8-bit luma mask
pub fn person_probability(image: &image::GrayImage) -> MaskImage {
    MaskImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([f32::from(image.get_pixel(x, y).0[0]) / 255.0])
    })
}

#[derive(Debug)]
pub struct PrecomputedMaskEngine {
    masks: Vec<MaskImage>,
    selfie_mode: bool,
    cursor: AtomicUsize,
}

impl PrecomputedMaskEngine {
    pub fn new(masks: Vec<MaskImage>, selfie_mode: bool) -> FilterResult<Self> {
        if masks.is_empty() {
            return Err(FilterError::Segmentation("no precomputed masks".into()));
        }
        Ok(Self {
            masks,
            selfie_mode,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

impl SegmentationEngine for PrecomputedMaskEngine {
    fn segment_for_video(
        &self,
        _picture: Picture,
        timestamp_us: u64,
    ) -> BoxFuture<'static, FilterResult<SegmentationMasks>> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.masks.len();
        let masks = SegmentationMasks::from_person_probability(
            &self.masks[index],
            self.selfie_mode,
            timestamp_us,
        );
        Box::pin(async move { Ok(masks) })
    }
}

/// Mask image files in `dir`, sorted by name
pub fn list_mask_files(dir: &Path) -> FilterResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| MASK_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Loads a [`PrecomputedMaskEngine`] from a directory; the model path is ignored
#[derive(Debug, Clone)]
pub struct PrecomputedMaskLoader {
    dir: PathBuf,
}

impl PrecomputedMaskLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SegmentationEngineLoader for PrecomputedMaskLoader {
    fn load(
        &self,
        options: SegmenterOptions,
    ) -> BoxFuture<'static, FilterResult<Arc<dyn SegmentationEngine>>> {
        let dir = self.dir.clone();
        Box::pin(async move {
            let masks = tokio::task::spawn_blocking(move || -> FilterResult<Vec<MaskImage>> {
                let files = list_mask_files(&dir)?;
                debug!(dir = %dir.display(), count = files.len(), "Decoding precomputed masks");
                files
                    .iter()
                    .map(|path| Ok(person_probability(&image::open(path)?.to_luma8())))
                    .collect()
            })
            .await
            .map_err(|e| FilterError::Segmentation(format!("mask loader task failed: {}", e)))??;

            let engine = PrecomputedMaskEngine::new(masks, options.selfie_mode)?;
            info!(
                masks = engine.len(),
                selfie_mode = options.selfie_mode,
                "Precomputed segmentation engine ready"
            );
            Ok(Arc::new(engine) as Arc<dyn SegmentationEngine>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbaImage};

    #[tokio::test]
    async fn test_engine_cycles_through_masks() {
        let masks = vec![
            MaskImage::from_pixel(1, 1, Luma([1.0])),
            MaskImage::from_pixel(1, 1, Luma([0.0])),
        ];
        let engine = PrecomputedMaskEngine::new(masks, false).unwrap();
        let picture = Arc::new(RgbaImage::new(1, 1));

        let first = engine.segment_for_video(picture.clone(), 1).await.unwrap();
        let second = engine.segment_for_video(picture.clone(), 2).await.unwrap();
        let third = engine.segment_for_video(picture, 3).await.unwrap();

        assert_eq!(first.category.get_pixel(0, 0).0[0], 1.0);
        assert_eq!(second.category.get_pixel(0, 0).0[0], 0.0);
        assert_eq!(third.category, first.category);
        assert_eq!(third.timestamp_us, 3);
    }

    #[test]
    fn test_empty_engine_rejected() {
        assert!(PrecomputedMaskEngine::new(Vec::new(), true).is_err());
    }

    #[test]
    fn test_person_probability_scales_luma() {
        let image = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 255 } else { 51 }]));
        let mask = person_probability(&image);
        assert_eq!(mask.get_pixel(0, 0).0[0], 1.0);
        assert!((mask.get_pixel(1, 0).0[0] - 0.2).abs() < 1e-6);
    }
}
