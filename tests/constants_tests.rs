// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants and the blur kernel built from them

use video_filters::constants::{self, BlurPreset, blur, compositor};
use video_filters::renderers::kernel::{KernelCache, clamp_radius, gaussian_kernel};

#[test]
fn test_blur_preset_values() {
    // Test that all presets exist (Low, Medium, High)
    assert_eq!(BlurPreset::ALL.len(), 3);
}

#[test]
fn test_blur_preset_ordering() {
    // Presets are ordered from weakest to strongest
    let mut previous = (0.0, 0.0);
    for preset in BlurPreset::ALL {
        let values = preset.blur_values();
        assert!(values.0 > previous.0 && values.1 > previous.1);
        previous = values;
    }
}

#[test]
fn test_blur_preset_display_names() {
    for preset in BlurPreset::ALL {
        assert!(
            !preset.display_name().is_empty(),
            "Preset {:?} has empty display name",
            preset
        );
    }
}

#[test]
fn test_kernel_taps_cover_max_radius() {
    assert_eq!(blur::KERNEL_TAPS, 2 * blur::MAX_RADIUS as usize + 1);
    assert_eq!(constants::SEGMENTATION_WARMUP.as_millis(), 2500);
    assert_eq!(compositor::DEFAULT_BACKGROUND_COLOR, [33, 150, 243, 255]);
}

#[test]
fn test_kernel_sums_to_one_for_every_radius() {
    for radius in 0..=blur::MAX_RADIUS {
        let sum: f32 = gaussian_kernel(radius).iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "radius {} sums to {}", radius, sum);
    }
}

#[test]
fn test_radius_zero_is_impulse() {
    let kernel = gaussian_kernel(0);
    for (index, weight) in kernel.iter().enumerate() {
        let expected = if index == blur::MAX_RADIUS as usize { 1.0 } else { 0.0 };
        assert_eq!(*weight, expected);
    }
}

#[test]
fn test_kernel_is_symmetric_and_bounded_by_radius() {
    let kernel = gaussian_kernel(4);
    let centre = blur::MAX_RADIUS as usize;
    for offset in 1..=centre {
        assert_eq!(kernel[centre - offset], kernel[centre + offset]);
        if offset > 4 {
            assert_eq!(kernel[centre + offset], 0.0);
        }
    }
    assert!(kernel[centre] > kernel[centre + 1]);
}

#[test]
fn test_radius_is_truncated_and_clamped() {
    assert_eq!(clamp_radius(6.9), 6);
    assert_eq!(clamp_radius(-3.0), 0);
    assert_eq!(clamp_radius(40.0), 12);
    assert_eq!(clamp_radius(f64::NAN), 0);
}

#[test]
fn test_kernel_cache_reuses_radius() {
    let mut cache = KernelCache::new();
    cache.get(6.0);
    cache.get(6.4);
    cache.get(3.0);
    assert_eq!(cache.len(), 2);
}
