//! Best-effort portrait lookup for selected entities.
//!
//! Lookup order is local cache, then a single HTTP GET, then a fixed default
//! image. Retrieval never fails from the caller's point of view.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://cdn.dota2.com/apps/dota2/images/heroes";
pub const DEFAULT_SUFFIX: &str = "_vert.jpg";
pub const DEFAULT_IMAGE_FILE: &str = "default_vert.jpg";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("display reference `{0}` is not a usable file name")]
    InvalidReference(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("content too large: more than {max} bytes")]
    ContentTooLarge { max: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the returned bytes came from.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    Cache,
    Remote,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ImageBytes {
    pub origin: ImageOrigin,
    /// File the bytes were read from or written to, when there is one.
    pub path: Option<PathBuf>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Resolve a display reference to image bytes, falling back to a default.
pub trait ImageProvider {
    fn fetch(&self, display_reference: &str) -> ImageBytes;
}

/// The network half of the provider, separated so tests can stub it.
pub trait RemoteSource {
    /// # Errors
    /// Returns an [`ImageError`] when the resource cannot be retrieved.
    fn get(&self, url: &str) -> Result<Vec<u8>, ImageError>;
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_content_size: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 10, max_content_size: 5 * 1024 * 1024 }
    }
}

/// Blocking HTTP source backed by `ureq`.
#[derive(Debug, Clone)]
pub struct UreqSource {
    agent: ureq::Agent,
    max_content_size: u64,
}

impl UreqSource {
    #[must_use]
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { agent, max_content_size: config.max_content_size }
    }
}

impl Default for UreqSource {
    fn default() -> Self {
        Self::new(&HttpConfig::default())
    }
}

impl RemoteSource for UreqSource {
    fn get(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(status, _) => ImageError::Status { status, url: url.to_string() },
            ureq::Error::Transport(transport) => ImageError::RequestFailed(transport.to_string()),
        })?;
        let mut bytes = Vec::new();
        response.into_reader().take(self.max_content_size + 1).read_to_end(&mut bytes)?;
        if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > self.max_content_size {
            return Err(ImageError::ContentTooLarge { max: self.max_content_size });
        }
        Ok(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub base_url: String,
    pub suffix: String,
    /// Defaults to `default_vert.jpg` inside `cache_dir`.
    pub default_image: Option<PathBuf>,
}

impl CacheConfig {
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            suffix: DEFAULT_SUFFIX.to_string(),
            default_image: None,
        }
    }

    fn default_image_path(&self) -> PathBuf {
        self.default_image.clone().unwrap_or_else(|| self.cache_dir.join(DEFAULT_IMAGE_FILE))
    }
}

/// Disk cache in front of a [`RemoteSource`].
#[derive(Debug, Clone)]
pub struct CachedImageProvider<S = UreqSource> {
    config: CacheConfig,
    source: S,
}

impl CachedImageProvider<UreqSource> {
    #[must_use]
    pub fn with_http(config: CacheConfig, http: &HttpConfig) -> Self {
        Self::new(config, UreqSource::new(http))
    }
}

impl<S: RemoteSource> CachedImageProvider<S> {
    #[must_use]
    pub fn new(config: CacheConfig, source: S) -> Self {
        Self { config, source }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// File name for a display reference, or `None` if it could escape the cache directory.
    #[must_use]
    pub fn file_name(&self, display_reference: &str) -> Option<String> {
        let unsafe_reference = display_reference.is_empty()
            || display_reference.contains(['/', '\\'])
            || display_reference.contains("..");
        (!unsafe_reference).then(|| format!("{display_reference}{}", self.config.suffix))
    }

    fn try_fetch(&self, display_reference: &str) -> Result<ImageBytes, ImageError> {
        let file_name = self
            .file_name(display_reference)
            .ok_or_else(|| ImageError::InvalidReference(display_reference.to_string()))?;
        let cached = self.config.cache_dir.join(&file_name);
        if cached.is_file() {
            let bytes = fs::read(&cached)?;
            tracing::debug!(path = %cached.display(), "image served from cache");
            return Ok(ImageBytes { origin: ImageOrigin::Cache, path: Some(cached), bytes });
        }

        let url = format!("{}/{file_name}", self.config.base_url.trim_end_matches('/'));
        let bytes = self.source.get(&url)?;
        let path = match store(&self.config.cache_dir, &cached, &bytes) {
            Ok(()) => Some(cached),
            Err(err) => {
                tracing::warn!(path = %cached.display(), error = %err, "failed to cache image");
                None
            }
        };
        tracing::debug!(url = %url, "image downloaded");
        Ok(ImageBytes { origin: ImageOrigin::Remote, path, bytes })
    }

    fn fallback(&self) -> ImageBytes {
        let path = self.config.default_image_path();
        match fs::read(&path) {
            Ok(bytes) => ImageBytes { origin: ImageOrigin::Fallback, path: Some(path), bytes },
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "default image unavailable");
                ImageBytes { origin: ImageOrigin::Fallback, path: None, bytes: Vec::new() }
            }
        }
    }
}

impl<S: RemoteSource> ImageProvider for CachedImageProvider<S> {
    fn fetch(&self, display_reference: &str) -> ImageBytes {
        self.try_fetch(display_reference).unwrap_or_else(|err| {
            tracing::warn!(reference = %display_reference, error = %err, "using default image");
            self.fallback()
        })
    }
}

fn store(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
    fs::create_dir_all(dir)?;
    fs::write(path, bytes)?;
    Ok(())
}
