// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named background blur strengths
///
/// Each preset maps to a blur amount and a tap spacing for the
/// background-only blur of the virtual background compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurPreset {
    /// Subtle blur
    Low,
    /// Balanced blur
    Medium,
    /// Strong blur
    High,
}

impl BlurPreset {
    /// All presets, weakest first
    pub const ALL: [BlurPreset; 3] = [BlurPreset::Low, BlurPreset::Medium, BlurPreset::High];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            BlurPreset::Low => "Low",
            BlurPreset::Medium => "Medium",
            BlurPreset::High => "High",
        }
    }

    /// `(bg_blur, bg_blur_radius)` for this preset
    pub fn blur_values(&self) -> (f32, f32) {
        match self {
            BlurPreset::Low => (15.0, 5.0),
            BlurPreset::Medium => (20.0, 7.0),
            BlurPreset::High => (25.0, 10.0),
        }
    }
}

/// Frame rate assumed when a track does not report one
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Track size assumed when a track does not report one
pub const DEFAULT_TRACK_WIDTH: u32 = 1280;
pub const DEFAULT_TRACK_HEIGHT: u32 = 720;

/// Frames buffered between a track writer and its consumer
pub const FRAME_QUEUE_DEPTH: usize = 1;

/// Wall-clock length of one statistics window
pub const STATS_WINDOW: Duration = Duration::from_millis(1000);

/// Delay after the segmentation engine loads before its masks are used
pub const SEGMENTATION_WARMUP: Duration = Duration::from_millis(2500);

/// Environment variable that forces the polyfill frame source and sink
pub const FORCE_POLYFILL_ENV: &str = "VIDEO_FILTERS_FORCE_POLYFILL";

/// Upper bound on downloading one background asset over HTTP
pub const BACKGROUND_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default location of segmentation model assets
pub const DEFAULT_ASSET_BASE_PATH: &str = "mediapipe";

/// Default segmentation model, relative to the asset base path
pub const DEFAULT_MODEL_FILE: &str = "models/selfie_segmenter.tflite";

/// Model name fragment that identifies a selfie (front camera) model
pub const SELFIE_MODEL_MARKER: &str = "selfie_segmenter";

/// Full-screen blur constants
pub mod blur {
    /// Default blur radius in kernel taps
    pub const DEFAULT_RADIUS: f64 = 6.0;

    /// Largest supported radius
    pub const MAX_RADIUS: u32 = 12;

    /// Taps in the Gaussian kernel (`2 * MAX_RADIUS + 1`)
    pub const KERNEL_TAPS: usize = 25;

    /// Sigma per unit of radius
    pub const SIGMA_PER_RADIUS: f32 = 0.6;

    /// Working resolution relative to the frame
    pub const WORKING_SCALE: f32 = 0.15;
}

/// Virtual background compositor constants
pub mod compositor {
    /// Weight of the newest mask in the temporal blend
    pub const SMOOTHING_FACTOR: f32 = 0.8;

    /// Confidence range mapped onto the blend weight
    pub const SMOOTHSTEP_MIN: f32 = 0.6;
    pub const SMOOTHSTEP_MAX: f32 = 0.9;

    /// Bilateral refinement spatial sigma (texture coordinate units)
    pub const SIGMA_SPATIAL: f32 = 2.0;

    /// Bilateral refinement range sigma
    pub const SIGMA_RANGE: f32 = 0.1;

    /// Lower bound for normalisation denominators
    pub const MIN_WEIGHT: f32 = 1e-6;

    /// Background blur working resolution relative to the frame
    pub const BACKGROUND_BLUR_SCALE: f32 = 0.5;

    /// Taps on each side of the background blur kernel
    pub const BACKGROUND_KERNEL_RADIUS: u32 = 10;

    /// Background blur sigma per unit of blur amount
    pub const BACKGROUND_SIGMA_SCALE: f32 = 0.7;

    /// Background used when nothing else is configured
    pub const DEFAULT_BACKGROUND_COLOR: [u8; 4] = [33, 150, 243, 255];

    /// Numeric blur level used when none is configured
    pub const DEFAULT_BLUR_LEVEL: f64 = 5.0;

    /// Largest blur amount a numeric level can map to
    pub const MAX_BG_BLUR: f64 = 30.0;

    /// Largest tap spacing a numeric level can map to
    pub const MAX_BG_BLUR_RADIUS: f64 = 10.0;
}

/// Performance monitor constants
pub mod performance {
    /// EMA smoothing weight of the newest fps sample
    pub const EMA_ALPHA: f64 = 0.2;

    /// Fps the monitor starts from and resets to
    pub const DEFAULT_FPS: f64 = 30.0;

    /// Below this EMA the pipeline is reported as degraded
    pub const FPS_WARNING_LOWER: f64 = 23.0;

    /// Above this EMA a degraded pipeline recovers
    pub const FPS_WARNING_UPPER: f64 = 25.0;

    /// Relative drop below the EMA that marks a sample as an outlier
    pub const DEVIATION_LIMIT: f64 = 0.5;

    /// Consecutive outliers needed before they are trusted
    pub const OUTLIER_PERSISTENCE: u32 = 5;
}
