// SPDX-License-Identifier: GPL-3.0-only

//! Effect configuration
//!
//! Field names serialize in camelCase so JSON configuration files use the same
//! option names as the effect APIs (`blurRadius`, `backgroundFilter`, ...).

use crate::constants::{self, BlurPreset};
use crate::errors::FilterResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which renderer implementation an effect uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// wgpu when an adapter is available, software otherwise
    #[default]
    Auto,
    /// wgpu only; a missing adapter is a construction error
    Gpu,
    /// Software renderer
    Cpu,
}

impl RenderBackend {
    /// Get all backends for CLI help and iteration
    pub const ALL: [RenderBackend; 3] = [RenderBackend::Auto, RenderBackend::Gpu, RenderBackend::Cpu];

    /// Get display name for the backend
    pub fn display_name(&self) -> &'static str {
        match self {
            RenderBackend::Auto => "auto",
            RenderBackend::Gpu => "gpu",
            RenderBackend::Cpu => "cpu",
        }
    }

    /// Parse a backend name as accepted on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.display_name().eq_ignore_ascii_case(name))
    }
}

/// Full-screen blur settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FullScreenBlurConfig {
    /// Blur radius in kernel taps, truncated and clamped to 0..=12
    pub blur_radius: f64,
    /// Renderer implementation
    pub backend: RenderBackend,
}

impl Default for FullScreenBlurConfig {
    fn default() -> Self {
        Self {
            blur_radius: constants::blur::DEFAULT_RADIUS,
            backend: RenderBackend::default(),
        }
    }
}

/// What replaces the background behind the person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundFilter {
    /// Blur the camera's own background
    #[default]
    Blur,
    /// Static image
    Image,
    /// Looping animated background
    Video,
}

/// Background blur strength, either a named preset or a numeric level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackgroundBlurLevel {
    Preset(BlurPreset),
    Numeric(f64),
}

impl Default for BackgroundBlurLevel {
    fn default() -> Self {
        BackgroundBlurLevel::Numeric(constants::compositor::DEFAULT_BLUR_LEVEL)
    }
}

impl BackgroundBlurLevel {
    /// Compositor blur parameters for this level
    pub fn blur_settings(&self) -> BlurSettings {
        use constants::compositor::{MAX_BG_BLUR, MAX_BG_BLUR_RADIUS};

        match self {
            BackgroundBlurLevel::Preset(preset) => {
                let (bg_blur, bg_blur_radius) = preset.blur_values();
                BlurSettings {
                    bg_blur,
                    bg_blur_radius,
                }
            }
            BackgroundBlurLevel::Numeric(level) => {
                let level = if level.is_finite() { level.max(0.0) } else { 0.0 };
                BlurSettings {
                    bg_blur: (level * 3.0).min(MAX_BG_BLUR) as f32,
                    bg_blur_radius: level.min(MAX_BG_BLUR_RADIUS) as f32,
                }
            }
        }
    }
}

/// Background blur parameters consumed by the compositor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlurSettings {
    /// Blur amount; the Gaussian sigma is `bg_blur * 0.7`
    pub bg_blur: f32,
    /// Tap spacing multiplier times ten
    pub bg_blur_radius: f32,
}

impl BlurSettings {
    /// Both parameters must be positive for the background blur to run
    pub fn is_active(&self) -> bool {
        self.bg_blur > 0.0 && self.bg_blur_radius > 0.0
    }
}

/// Virtual background settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualBackgroundConfig {
    /// Segmentation model path; selfie mode is derived from it
    pub model_path: Option<String>,
    /// Where segmentation assets are loaded from
    pub asset_base_path: String,
    /// Background replacement mode
    pub background_filter: BackgroundFilter,
    /// Blur strength when `background_filter` is `blur`
    pub background_blur_level: Option<BackgroundBlurLevel>,
    /// Image URL or path when `background_filter` is `image`
    pub background_image: Option<String>,
    /// Animated background URL or path when `background_filter` is `video`
    pub background_video: Option<String>,
    /// Milliseconds after the segmentation engine loads before masks are trusted
    pub segmentation_warmup_ms: u64,
    /// Renderer implementation
    pub backend: RenderBackend,
}

impl Default for VirtualBackgroundConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            asset_base_path: constants::DEFAULT_ASSET_BASE_PATH.to_string(),
            background_filter: BackgroundFilter::default(),
            background_blur_level: None,
            background_image: None,
            background_video: None,
            segmentation_warmup_ms: constants::SEGMENTATION_WARMUP.as_millis() as u64,
            backend: RenderBackend::default(),
        }
    }
}

impl VirtualBackgroundConfig {
    /// Effective blur level, defaulting to numeric level 5
    pub fn blur_level(&self) -> BackgroundBlurLevel {
        self.background_blur_level.unwrap_or_default()
    }

    /// Blur parameters for the compositor; zero unless the filter is `blur`
    pub fn blur_settings(&self) -> BlurSettings {
        match self.background_filter {
            BackgroundFilter::Blur => self.blur_level().blur_settings(),
            BackgroundFilter::Image | BackgroundFilter::Video => BlurSettings::default(),
        }
    }

    /// Model to load, falling back to the default selfie model under the asset base path
    pub fn resolved_model_path(&self) -> String {
        match &self.model_path {
            Some(path) => path.clone(),
            None => format!(
                "{}/{}",
                self.asset_base_path.trim_end_matches('/'),
                constants::DEFAULT_MODEL_FILE
            ),
        }
    }

    /// Selfie models report the person as background; masks are complemented
    pub fn is_selfie_mode(&self) -> bool {
        self.model_path
            .as_deref()
            .is_none_or(|path| path.contains(constants::SELFIE_MODEL_MARKER))
    }

    pub fn segmentation_warmup(&self) -> Duration {
        Duration::from_millis(self.segmentation_warmup_ms)
    }

    /// Option key the background filter needs but is missing; the effect then falls back to the default color
    pub fn missing_background_key(&self) -> Option<&'static str> {
        match self.background_filter {
            BackgroundFilter::Image if self.background_image.is_none() => Some("backgroundImage"),
            BackgroundFilter::Video if self.background_video.is_none() => Some("backgroundVideo"),
            _ => None,
        }
    }
}

/// Configuration of either effect, as stored in a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "camelCase")]
pub enum EffectConfig {
    FullScreenBlur(FullScreenBlurConfig),
    VirtualBackground(VirtualBackgroundConfig),
}

/// Load an effect configuration from a JSON file
pub fn load_effect_config(path: &Path) -> FilterResult<EffectConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: EffectConfig = serde_json::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selfie_mode_from_model_path() {
        let mut config = VirtualBackgroundConfig::default();
        assert!(config.is_selfie_mode());

        config.model_path = Some("models/selfie_segmenter_landscape.tflite".into());
        assert!(config.is_selfie_mode());

        config.model_path = Some("models/deeplab_v3.tflite".into());
        assert!(!config.is_selfie_mode());
    }

    #[test]
    fn test_resolved_model_path() {
        let config = VirtualBackgroundConfig {
            asset_base_path: "/opt/assets/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_model_path(),
            "/opt/assets/models/selfie_segmenter.tflite"
        );
    }

    #[test]
    fn test_backend_from_name() {
        assert_eq!(RenderBackend::from_name("CPU"), Some(RenderBackend::Cpu));
        assert_eq!(RenderBackend::from_name("vulkan"), None);
    }
}
