// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the video filter pipeline
//!
//! Errors fall into three groups that the pipeline treats differently:
//!
//! - construction errors ([`FilterError::UnsupportedContext`], [`FilterError::ShaderBuild`],
//!   [`FilterError::Config`]) escape from `start()` and are never recovered
//! - shutdown errors ([`FilterError::Aborted`], [`FilterError::InvalidState`]) are swallowed
//! - everything else is reported through the `on_error` hook and processing continues

use std::fmt;

/// Result type alias using FilterError
pub type FilterResult<T> = Result<T, FilterError>;

/// Main error type for effects, renderers and the pipeline harness
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// No usable rendering context (no GPU adapter, device request failed, no runtime)
    UnsupportedContext(String),
    /// Shader module or render pipeline failed to build
    ShaderBuild(String),
    /// Invalid configuration value
    Config(String),
    /// Rendering a single frame failed
    Transform(String),
    /// Stream was aborted while shutting down
    Aborted,
    /// Operation not valid in the current lifecycle state
    InvalidState(String),
    /// Segmentation engine failed to load or to segment a frame
    Segmentation(String),
    /// Background asset could not be fetched or decoded
    BackgroundLoad(String),
    /// Filesystem errors
    Io(String),
    /// Generic error with message
    Other(String),
}

impl FilterError {
    /// Construction errors are fatal and only ever raised during initialization
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FilterError::UnsupportedContext(_) | FilterError::ShaderBuild(_) | FilterError::Config(_)
        )
    }

    /// Errors expected while a stream is being torn down
    pub fn is_expected_shutdown(&self) -> bool {
        matches!(self, FilterError::Aborted | FilterError::InvalidState(_))
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::UnsupportedContext(msg) => {
                write!(f, "Unsupported rendering context: {}", msg)
            }
            FilterError::ShaderBuild(msg) => write!(f, "Shader build failed: {}", msg),
            FilterError::Config(msg) => write!(f, "Configuration error: {}", msg),
            FilterError::Transform(msg) => write!(f, "Frame transform failed: {}", msg),
            FilterError::Aborted => write!(f, "Stream aborted"),
            FilterError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            FilterError::Segmentation(msg) => write!(f, "Segmentation error: {}", msg),
            FilterError::BackgroundLoad(msg) => write!(f, "Background load failed: {}", msg),
            FilterError::Io(msg) => write!(f, "I/O error: {}", msg),
            FilterError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for FilterError {}

impl From<std::io::Error> for FilterError {
    fn from(err: std::io::Error) -> Self {
        FilterError::Io(err.to_string())
    }
}

impl From<image::ImageError> for FilterError {
    fn from(err: image::ImageError) -> Self {
        FilterError::Other(format!("Image error: {}", err))
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(err: serde_json::Error) -> Self {
        FilterError::Config(err.to_string())
    }
}

impl From<String> for FilterError {
    fn from(msg: String) -> Self {
        FilterError::Other(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(FilterError::ShaderBuild("bad".into()).is_fatal());
        assert!(FilterError::UnsupportedContext("no gpu".into()).is_fatal());
        assert!(!FilterError::Transform("oops".into()).is_fatal());

        assert!(FilterError::Aborted.is_expected_shutdown());
        assert!(FilterError::InvalidState("closed".into()).is_expected_shutdown());
        assert!(!FilterError::Segmentation("model".into()).is_expected_shutdown());
    }

    #[test]
    fn test_error_display() {
        let err = FilterError::BackgroundLoad("404".into());
        assert_eq!(err.to_string(), "Background load failed: 404");
        assert_eq!(FilterError::Aborted.to_string(), "Stream aborted");
    }
}
