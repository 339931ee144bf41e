// SPDX-License-Identifier: GPL-3.0-only

//! Fetching background asset bytes

use crate::constants::BACKGROUND_FETCH_TIMEOUT;
use crate::errors::{FilterError, FilterResult};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Retrieves the raw bytes behind a background URL
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'static, FilterResult<Vec<u8>>>;
}

/// Reads local paths and `file://` URLs, optionally relative to a base directory
///
/// Network URLs are left to [`HttpFetcher`].
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    base_dir: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    /// Local path for `url`, or an error for schemes this fetcher cannot read
    pub fn resolve(&self, url: &str) -> FilterResult<PathBuf> {
        if is_network_url(url) {
            return Err(FilterError::BackgroundLoad(format!(
                "{} is not a local file",
                url
            )));
        }
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        })
    }
}

impl AssetFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, FilterResult<Vec<u8>>> {
        let resolved = self.resolve(url);
        let url = url.to_string();
        Box::pin(async move {
            let path = resolved?;
            debug!(url = %url, path = %path.display(), "Reading background asset");
            tokio::fs::read(&path).await.map_err(|e| {
                FilterError::BackgroundLoad(format!("failed to read {}: {}", path.display(), e))
            })
        })
    }
}

fn is_network_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Downloads `http://` and `https://` URLs
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> FilterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(BACKGROUND_FETCH_TIMEOUT)
            .build()
            .map_err(|e| FilterError::BackgroundLoad(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, FilterResult<Vec<u8>>> {
        let client = self.client.clone();
        let url = url.to_string();
        Box::pin(async move {
            debug!(url = %url, "Downloading background asset");
            let response = client
                .get(&url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| FilterError::BackgroundLoad(format!("failed to fetch {}: {}", url, e)))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| FilterError::BackgroundLoad(format!("failed to read {}: {}", url, e)))?;
            Ok(bytes.to_vec())
        })
    }
}

/// Sends network URLs to [`HttpFetcher`] and everything else to [`FileFetcher`]
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    file: FileFetcher,
    http: Option<HttpFetcher>,
}

impl UrlFetcher {
    pub fn new() -> Self {
        let http = HttpFetcher::new()
            .inspect_err(|e| warn!(error = %e, "HTTP backgrounds unavailable"))
            .ok();
        Self {
            file: FileFetcher::new(),
            http,
        }
    }

    pub fn with_http(http: HttpFetcher) -> Self {
        Self {
            file: FileFetcher::new(),
            http: Some(http),
        }
    }

    pub fn with_file(mut self, file: FileFetcher) -> Self {
        self.file = file;
        self
    }

    pub fn handles_network(&self) -> bool {
        self.http.is_some()
    }
}

impl Default for UrlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetFetcher for UrlFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, FilterResult<Vec<u8>>> {
        match &self.http {
            Some(http) if is_network_url(url) => http.fetch(url),
            _ => self.file.fetch(url),
        }
    }
}
