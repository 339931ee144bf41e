// SPDX-License-Identifier: GPL-3.0-only

//! The two video effects run by the pipeline harness

mod fullscreen_blur;
mod virtual_background;

pub use fullscreen_blur::FullScreenBlur;
pub use virtual_background::{VirtualBackground, VirtualBackgroundHandle};

use crate::config::EffectConfig;
use crate::pipeline::VideoEffect;
use crate::segmentation::SegmentationEngineLoader;
use std::sync::Arc;

/// Build the effect described by `config`
///
/// `segmenter` is only used by the virtual background; without one the
/// effect passes frames through unchanged.
pub fn create_effect(
    config: &EffectConfig,
    segmenter: Option<Arc<dyn SegmentationEngineLoader>>,
) -> Box<dyn VideoEffect> {
    match config {
        EffectConfig::FullScreenBlur(blur) => Box::new(FullScreenBlur::new(blur.clone())),
        EffectConfig::VirtualBackground(background) => {
            let effect = VirtualBackground::new(background.clone());
            match segmenter {
                Some(loader) => Box::new(effect.with_segmenter(loader)),
                None => Box::new(effect),
            }
        }
    }
}
