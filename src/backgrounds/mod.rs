// SPDX-License-Identifier: GPL-3.0-only

//! Background descriptors and loaded background assets
//!
//! A background is identified by a stable string: the URL for images and
//! animations, `color(r,g,b,a)` for solid colors. The compositor caches its
//! background texture by that identifier.

mod fetch;
mod video;

pub use fetch::{AssetFetcher, FileFetcher, HttpFetcher, UrlFetcher};
pub use video::VideoBackground;

use crate::config::{BackgroundFilter, VirtualBackgroundConfig};
use crate::constants::compositor::DEFAULT_BACKGROUND_COLOR;
use crate::errors::{FilterError, FilterResult};
use crate::media::Picture;
use crate::renderers::{BackgroundLayer, BackgroundPixels};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// What to show behind the person
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackgroundSource {
    Color([u8; 4]),
    Image { url: String },
    /// Animated image, played in a loop
    Video { url: String },
}

impl Default for BackgroundSource {
    fn default() -> Self {
        BackgroundSource::Color(DEFAULT_BACKGROUND_COLOR)
    }
}

impl BackgroundSource {
    pub fn identifier(&self) -> String {
        match self {
            BackgroundSource::Color([r, g, b, a]) => format!("color({},{},{},{})", r, g, b, a),
            BackgroundSource::Image { url } | BackgroundSource::Video { url } => url.clone(),
        }
    }

    /// Background selected by a configuration; `None` when blurring the frame
    pub fn from_config(config: &VirtualBackgroundConfig) -> Option<Self> {
        match config.background_filter {
            BackgroundFilter::Blur => None,
            BackgroundFilter::Image => config
                .background_image
                .clone()
                .map(|url| BackgroundSource::Image { url }),
            BackgroundFilter::Video => config
                .background_video
                .clone()
                .map(|url| BackgroundSource::Video { url }),
        }
    }
}

#[derive(Debug, Clone)]
enum BackgroundContent {
    Color([u8; 4]),
    Image(Picture),
    Video(VideoBackground),
}

/// A decoded background ready to be drawn
#[derive(Debug, Clone)]
pub struct BackgroundAsset {
    identifier: String,
    content: BackgroundContent,
    loaded_at: Instant,
}

impl BackgroundAsset {
    pub fn color(color: [u8; 4]) -> Self {
        Self {
            identifier: BackgroundSource::Color(color).identifier(),
            content: BackgroundContent::Color(color),
            loaded_at: Instant::now(),
        }
    }

    pub fn image(url: impl Into<String>, picture: Picture) -> Self {
        Self {
            identifier: url.into(),
            content: BackgroundContent::Image(picture),
            loaded_at: Instant::now(),
        }
    }

    pub fn video(url: impl Into<String>, video: VideoBackground) -> Self {
        Self {
            identifier: url.into(),
            content: BackgroundContent::Video(video),
            loaded_at: Instant::now(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_animated(&self) -> bool {
        matches!(self.content, BackgroundContent::Video(_))
    }

    /// What the compositor draws at `now`
    pub fn layer_at(&self, now: Instant) -> BackgroundLayer<'_> {
        let (pixels, revision) = match &self.content {
            BackgroundContent::Color(color) => (BackgroundPixels::Color(*color), 0),
            BackgroundContent::Image(picture) => (BackgroundPixels::Image(picture), 0),
            BackgroundContent::Video(video) => {
                let (index, picture) = video.frame_at(now.saturating_duration_since(self.loaded_at));
                (BackgroundPixels::Image(picture), index as u64)
            }
        };
        BackgroundLayer {
            identifier: &self.identifier,
            pixels,
            revision,
        }
    }
}

/// Fetches and decodes background assets
#[derive(Clone)]
pub struct BackgroundLoader {
    fetcher: Arc<dyn AssetFetcher>,
}

impl std::fmt::Debug for BackgroundLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundLoader").finish_non_exhaustive()
    }
}

impl Default for BackgroundLoader {
    fn default() -> Self {
        Self::new(Arc::new(UrlFetcher::new()))
    }
}

impl BackgroundLoader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { fetcher }
    }

    /// Load a background; every failure is reported as `BackgroundLoad`
    pub async fn load(&self, source: &BackgroundSource) -> FilterResult<BackgroundAsset> {
        let (url, animated) = match source {
            BackgroundSource::Color(color) => return Ok(BackgroundAsset::color(*color)),
            BackgroundSource::Image { url } => (url.clone(), false),
            BackgroundSource::Video { url } => (url.clone(), true),
        };

        let bytes = self.fetcher.fetch(&url).await.map_err(as_load_error)?;
        debug!(url = %url, bytes = bytes.len(), "Fetched background asset");

        let decode_url = url.clone();
        let asset = tokio::task::spawn_blocking(move || -> FilterResult<BackgroundAsset> {
            if animated {
                let video = VideoBackground::decode(&bytes)?;
                Ok(BackgroundAsset::video(decode_url, video))
            } else {
                let picture = image::load_from_memory(&bytes)?.to_rgba8();
                Ok(BackgroundAsset::image(decode_url, Arc::new(picture)))
            }
        })
        .await
        .map_err(|e| FilterError::BackgroundLoad(format!("decode task failed: {}", e)))?
        .map_err(as_load_error)?;

        info!(url = %url, animated, "Background loaded");
        Ok(asset)
    }
}

fn as_load_error(err: FilterError) -> FilterError {
    match err {
        FilterError::BackgroundLoad(_) => err,
        other => FilterError::BackgroundLoad(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    struct MemoryFetcher(Vec<u8>);

    impl AssetFetcher for MemoryFetcher {
        fn fetch(&self, _url: &str) -> BoxFuture<'static, FilterResult<Vec<u8>>> {
            let bytes = self.0.clone();
            Box::pin(async move { Ok(bytes) })
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255]))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(BackgroundSource::default().identifier(), "color(33,150,243,255)");
        let image = BackgroundSource::Image {
            url: "https://example.com/a.png".into(),
        };
        assert_eq!(image.identifier(), "https://example.com/a.png");
    }

    #[test]
    fn test_source_from_config() {
        let mut config = VirtualBackgroundConfig::default();
        assert_eq!(BackgroundSource::from_config(&config), None);

        config.background_filter = BackgroundFilter::Image;
        config.background_image = Some("bg.png".into());
        assert_eq!(
            BackgroundSource::from_config(&config),
            Some(BackgroundSource::Image { url: "bg.png".into() })
        );
    }

    #[tokio::test]
    async fn test_load_image() {
        let loader = BackgroundLoader::new(Arc::new(MemoryFetcher(png_bytes(8, 4))));
        let asset = loader
            .load(&BackgroundSource::Image { url: "mem://bg".into() })
            .await
            .unwrap();
        assert_eq!(asset.identifier(), "mem://bg");
        assert!(!asset.is_animated());
        match asset.layer_at(Instant::now()).pixels {
            BackgroundPixels::Image(picture) => assert_eq!(picture.dimensions(), (8, 4)),
            BackgroundPixels::Color(_) => panic!("expected image pixels"),
        }
    }

    #[tokio::test]
    async fn test_decode_failure_is_background_load_error() {
        let loader = BackgroundLoader::new(Arc::new(MemoryFetcher(b"junk".to_vec())));
        let result = loader
            .load(&BackgroundSource::Image { url: "mem://bad".into() })
            .await;
        assert!(matches!(result, Err(FilterError::BackgroundLoad(_))));
    }

    #[tokio::test]
    async fn test_color_needs_no_fetch() {
        let loader = BackgroundLoader::new(Arc::new(MemoryFetcher(Vec::new())));
        let asset = loader.load(&BackgroundSource::Color([1, 2, 3, 4])).await.unwrap();
        assert_eq!(asset.identifier(), "color(1,2,3,4)");
    }
}
