// SPDX-License-Identifier: GPL-3.0-only

//! WGSL programs for the GPU renderers
//!
//! Each fragment program is compiled together with the shared full-screen
//! vertex stage from `fullscreen.wgsl`.

mod params;

pub use params::{BlendParams, BlurParams, MaskedBlurParams, RefineParams, StateParams};

/// Full-screen triangle vertex stage with offscreen and canvas entry points
pub const FULLSCREEN_VERTEX: &str = include_str!("fullscreen.wgsl");

pub const PASSTHROUGH_FRAGMENT: &str = include_str!("passthrough.wgsl");
pub const BLUR_FRAGMENT: &str = include_str!("blur.wgsl");
pub const STATE_UPDATE_FRAGMENT: &str = include_str!("state_update.wgsl");
pub const MASK_REFINE_FRAGMENT: &str = include_str!("mask_refine.wgsl");
pub const MASKED_BLUR_FRAGMENT: &str = include_str!("masked_blur.wgsl");
pub const BLEND_FRAGMENT: &str = include_str!("blend.wgsl");

/// Every fragment program, by name
pub const FRAGMENTS: [(&str, &str); 6] = [
    ("passthrough", PASSTHROUGH_FRAGMENT),
    ("blur", BLUR_FRAGMENT),
    ("state_update", STATE_UPDATE_FRAGMENT),
    ("mask_refine", MASK_REFINE_FRAGMENT),
    ("masked_blur", MASKED_BLUR_FRAGMENT),
    ("blend", BLEND_FRAGMENT),
];

/// Complete module source for a fragment program
pub fn module_source(fragment: &str) -> String {
    format!("{}\n{}", FULLSCREEN_VERTEX, fragment)
}
