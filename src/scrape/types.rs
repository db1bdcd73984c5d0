//! Request and response types for scrape operations.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key carrying the engine that produced a result.
pub const META_ENGINE: &str = "engine";
/// Metadata key carrying the UTC scrape timestamp (RFC3339).
pub const META_SCRAPED_AT: &str = "scraped_at";
/// Metadata key set to `"true"` when the result was served from cache.
pub const META_CACHED: &str = "cached";

/// Engine tag for results produced by the static fetcher.
pub const ENGINE_STATIC: &str = "static";
/// Engine tag for results produced by the dynamic (browser) fetcher.
pub const ENGINE_DYNAMIC: &str = "dynamic";

/// How a URL is scraped.
///
/// `smart` tries the static fetcher first and falls back to the browser only
/// when the HTML looks like an unrendered client-side shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMode {
    Static,
    Dynamic,
    #[default]
    Smart,
}

impl fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
            Self::Smart => write!(f, "smart"),
        }
    }
}

/// Transport used for extracted images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Absolute URLs only.
    #[default]
    Url,
    /// Inline base64 payloads, subject to the per-image size cap.
    Blob,
}

/// Body of `POST /v1/scrape`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    /// Explicit mode wins over the legacy `render` flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ScrapeMode>,
    /// Legacy shorthand: `render=true` means `mode=dynamic`. Honored only
    /// when `mode` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<bool>,
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default)]
    pub images: bool,
    #[serde(default)]
    pub image_format: ImageFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_images: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_image_size_kb: Option<usize>,
}

impl ScrapeRequest {
    /// Effective mode after applying the `render` alias rule.
    pub fn resolved_mode(&self) -> ScrapeMode {
        match self.mode {
            Some(mode) => mode,
            None if self.render == Some(true) => ScrapeMode::Dynamic,
            None => ScrapeMode::Smart,
        }
    }

    /// Fetcher-facing options derived from the request flags.
    pub fn options(&self) -> ScrapeOptions {
        ScrapeOptions {
            screenshot: self.screenshot,
            images: self.images,
            image_format: self.image_format,
            max_images: self.max_images,
            max_image_size_kb: self.max_image_size_kb,
        }
    }
}

/// Options threaded through fetchers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeOptions {
    pub screenshot: bool,
    pub images: bool,
    pub image_format: ImageFormat,
    pub max_images: Option<usize>,
    pub max_image_size_kb: Option<usize>,
}

/// Full-page screenshot attached to a dynamic result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    /// Always `png`.
    pub format: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// One extracted image reference, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    /// Absolute source URL.
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Base64 payload when blob transport was requested and the image fit
    /// under the size cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Canonical scrape output. `markdown` is always present on success; it is
/// empty only when the page itself was empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub url: String,
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Screenshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageRef>>,
}

impl ScrapeResult {
    /// Build a result stamped with `engine` and the current UTC time.
    pub fn new(url: impl Into<String>, markdown: String, engine: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_ENGINE.to_string(), engine.to_string());
        metadata.insert(
            META_SCRAPED_AT.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        Self {
            url: url.into(),
            markdown,
            html: None,
            metadata,
            screenshot: None,
            images: None,
        }
    }

    /// Flag a cache hit. `scraped_at` keeps the original scrape time so
    /// callers can observe staleness.
    pub fn mark_cached(&mut self) {
        self.metadata
            .insert(META_CACHED.to_string(), "true".to_string());
    }

    pub fn engine(&self) -> Option<&str> {
        self.metadata.get(META_ENGINE).map(String::as_str)
    }
}
