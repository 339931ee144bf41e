// SPDX-License-Identifier: GPL-3.0-only

//! Uniform blocks shared between the WGSL programs and the renderers
//!
//! Layouts follow WGSL uniform rules: every struct is a multiple of 16 bytes
//! and `vec4` arrays start on a 16-byte boundary.

use crate::renderers::kernel::GaussianKernel;

/// Separable blur pass (`blur.wgsl`)
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurParams {
    pub texel_size: [f32; 2],
    pub direction: [f32; 2],
    /// 25 kernel weights packed four per vector, last three unused
    pub weights: [[f32; 4]; 7],
}

impl BlurParams {
    pub fn new(texel_size: [f32; 2], direction: [f32; 2], kernel: &GaussianKernel) -> Self {
        let mut weights = [[0.0; 4]; 7];
        for (index, weight) in kernel.iter().enumerate() {
            weights[index / 4][index % 4] = *weight;
        }
        Self {
            texel_size,
            direction,
            weights,
        }
    }
}

/// Temporal mask smoothing (`state_update.wgsl`)
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StateParams {
    pub smoothing_factor: f32,
    pub smoothstep_min: f32,
    pub smoothstep_max: f32,
    /// 1 when the segmenter labels the person as category 0
    pub selfie_mode: u32,
}

/// Bilateral mask refinement (`mask_refine.wgsl`)
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RefineParams {
    pub texel_size: [f32; 2],
    pub sigma_spatial: f32,
    pub sigma_range: f32,
}

/// Background-only blur pass (`masked_blur.wgsl`)
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaskedBlurParams {
    pub texel_size: [f32; 2],
    pub direction: [f32; 2],
    pub sigma: f32,
    pub radius_scale: f32,
    pub _pad: [f32; 2],
}

/// Final composite (`blend.wgsl`)
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlendParams {
    pub bg_dimensions: [f32; 2],
    pub canvas_dimensions: [f32; 2],
}
