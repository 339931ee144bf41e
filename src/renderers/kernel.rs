// SPDX-License-Identifier: GPL-3.0-only

//! Separable Gaussian kernels for the full-screen blur

use crate::constants::blur::{KERNEL_TAPS, MAX_RADIUS, SIGMA_PER_RADIUS};
use std::collections::HashMap;

/// Weights for taps `-12..=12`, normalised to sum to one
pub type GaussianKernel = [f32; KERNEL_TAPS];

/// Truncate a configured radius and clamp it to `0..=12`
pub fn clamp_radius(radius: f64) -> u32 {
    if !radius.is_finite() {
        return 0;
    }
    (radius.trunc().max(0.0) as u32).min(MAX_RADIUS)
}

/// Build the kernel for an integer radius
///
/// `sigma = 0.6 * radius`; taps beyond the radius are zero. Radius 0 is a
/// unit impulse at the centre tap.
pub fn gaussian_kernel(radius: u32) -> GaussianKernel {
    let radius = radius.min(MAX_RADIUS) as i32;
    let centre = MAX_RADIUS as i32;
    let mut weights = [0.0f32; KERNEL_TAPS];

    if radius == 0 {
        weights[centre as usize] = 1.0;
        return weights;
    }

    let sigma = radius as f32 * SIGMA_PER_RADIUS;
    let mut sum = 0.0f32;
    for offset in -radius..=radius {
        let x = offset as f32;
        let weight = (-(x * x) / (2.0 * sigma * sigma)).exp();
        weights[(offset + centre) as usize] = weight;
        sum += weight;
    }
    for weight in weights.iter_mut() {
        *weight /= sum;
    }
    weights
}

/// Kernels computed so far, keyed by clamped radius
#[derive(Debug, Default)]
pub struct KernelCache {
    kernels: HashMap<u32, GaussianKernel>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel for a configured radius, computing it on first use
    pub fn get(&mut self, radius: f64) -> &GaussianKernel {
        let radius = clamp_radius(radius);
        self.kernels
            .entry(radius)
            .or_insert_with(|| gaussian_kernel(radius))
    }

    /// Number of distinct kernels computed
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
