//! Dynamic fetcher: render a page in a shared-browser tab and read the DOM.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::page::Page;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::browser::BrowserPool;
use crate::error::ScrapeError;
use crate::markdown::MarkdownConverter;
use crate::utils::constants::DYNAMIC_FETCH_CEILING;
use crate::utils::{with_deadline, Deadline};

use super::types::{
    ImageFormat, ImageRef, ScrapeOptions, ScrapeResult, Screenshot, ENGINE_DYNAMIC,
};
use super::Fetcher;

/// How long to poll for a visible `<body>` after navigation settles.
const BODY_VISIBLE_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Image extraction cap when the request does not set one.
const DEFAULT_MAX_IMAGES: usize = 20;

/// Collects `<img>` references in document order.
const IMAGES_SCRIPT: &str = r#"
    (() => Array.from(document.images)
        .filter(img => img.src)
        .map(img => ({ src: img.src, alt: img.alt || null })))()
"#;

/// True once the body element exists and occupies layout space.
const BODY_VISIBLE_SCRIPT: &str =
    "(() => !!document.body && document.body.getBoundingClientRect().height > 0)()";

#[derive(Debug, Deserialize)]
struct RawImage {
    src: String,
    alt: Option<String>,
}

/// Renders pages in tabs obtained from the shared [`BrowserPool`].
pub struct DynamicFetcher {
    pool: Arc<BrowserPool>,
    converter: Arc<MarkdownConverter>,
    /// Used to download image bytes for blob transport.
    client: reqwest::Client,
}

impl DynamicFetcher {
    pub fn new(
        pool: Arc<BrowserPool>,
        converter: Arc<MarkdownConverter>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            pool,
            converter,
            client,
        }
    }

    async fn render(
        &self,
        url: &str,
        opts: &ScrapeOptions,
        deadline: Deadline,
    ) -> Result<ScrapeResult, ScrapeError> {
        // The guard closes the tab on every exit path out of this function,
        // including cancellation of the surrounding timeout.
        let tab = self.pool.open_tab(deadline).await?;
        let page = tab.page();

        debug!(url, "Dynamic fetch: navigating");
        page.goto(url)
            .await
            .map_err(|e| ScrapeError::ScrapeFailed(anyhow!("navigate to {url}: {e}")))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| ScrapeError::ScrapeFailed(anyhow!("load {url}: {e}")))?;

        wait_for_visible_body(page).await?;

        let html = page
            .content()
            .await
            .map_err(|e| ScrapeError::ScrapeFailed(anyhow!("extract DOM of {url}: {e}")))?;

        let markdown = self.converter.convert(&html)?;

        let mut result = ScrapeResult::new(url, markdown, ENGINE_DYNAMIC);

        if opts.images {
            match self.extract_images(page, opts).await {
                Ok(images) if !images.is_empty() => result.images = Some(images),
                Ok(_) => {}
                Err(e) => warn!(url, "Image extraction failed: {e}"),
            }
        }

        // Captured last so the page reflects any lazy-loaded media, but
        // still inside the tab's lifetime.
        if opts.screenshot {
            result.screenshot = Some(capture_screenshot(page).await?);
        }

        result.html = Some(html);
        Ok(result)
    }

    async fn extract_images(
        &self,
        page: &Page,
        opts: &ScrapeOptions,
    ) -> Result<Vec<ImageRef>, ScrapeError> {
        let raw: Vec<RawImage> = page
            .evaluate(IMAGES_SCRIPT)
            .await
            .map_err(|e| ScrapeError::ScrapeFailed(anyhow!("image script: {e}")))?
            .into_value()
            .map_err(|e| ScrapeError::ScrapeFailed(anyhow!("image script result: {e}")))?;

        let cap = opts.max_images.unwrap_or(DEFAULT_MAX_IMAGES);
        let mut images = Vec::with_capacity(raw.len().min(cap));

        for img in raw.into_iter().take(cap) {
            let mut image = ImageRef {
                src: img.src,
                alt: img.alt,
                data: None,
                content_type: None,
            };
            if opts.image_format == ImageFormat::Blob {
                match self.download_blob(&image.src, opts.max_image_size_kb).await {
                    Ok(Some((data, content_type))) => {
                        image.data = Some(data);
                        image.content_type = content_type;
                    }
                    Ok(None) => {} // over the size cap, keep URL-only
                    Err(e) => warn!(src = %image.src, "Image download failed: {e}"),
                }
            }
            images.push(image);
        }

        Ok(images)
    }

    /// Fetch image bytes for blob transport. Returns `None` when the image
    /// exceeds the size cap.
    async fn download_blob(
        &self,
        src: &str,
        max_size_kb: Option<usize>,
    ) -> anyhow::Result<Option<(String, Option<String>)>> {
        let response = self
            .client
            .get(src)
            .send()
            .await
            .with_context(|| format!("GET {src}"))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.context("read image body")?;
        if let Some(cap_kb) = max_size_kb {
            if bytes.len() > cap_kb * 1024 {
                return Ok(None);
            }
        }

        Ok(Some((BASE64.encode(&bytes), content_type)))
    }
}

#[async_trait]
impl Fetcher for DynamicFetcher {
    async fn scrape(
        &self,
        url: &str,
        opts: &ScrapeOptions,
        deadline: Deadline,
    ) -> Result<ScrapeResult, ScrapeError> {
        with_deadline(
            deadline,
            DYNAMIC_FETCH_CEILING,
            "dynamic fetch",
            self.render(url, opts, deadline),
        )
        .await
    }
}

/// Poll until the document body exists and has layout height.
///
/// Client-rendered pages attach the body asynchronously; `wait_for_navigation`
/// alone returns before the frame has painted anything.
async fn wait_for_visible_body(page: &Page) -> Result<(), ScrapeError> {
    let started = Instant::now();
    loop {
        let visible = page
            .evaluate(BODY_VISIBLE_SCRIPT)
            .await
            .ok()
            .and_then(|v| v.into_value::<bool>().ok())
            .unwrap_or(false);
        if visible {
            return Ok(());
        }
        if started.elapsed() >= BODY_VISIBLE_TIMEOUT {
            return Err(ScrapeError::Timeout("body visibility wait".into()));
        }
        tokio::time::sleep(BODY_POLL_INTERVAL).await;
    }
}

/// Full-page PNG screenshot, base64-encoded.
async fn capture_screenshot(page: &Page) -> Result<Screenshot, ScrapeError> {
    let params = CaptureScreenshotParams {
        format: Some(CaptureScreenshotFormat::Png),
        capture_beyond_viewport: Some(true),
        ..Default::default()
    };

    let bytes = page
        .screenshot(params)
        .await
        .map_err(|e| ScrapeError::ScrapeFailed(anyhow!("capture screenshot: {e}")))?;

    Ok(Screenshot {
        format: "png".to_string(),
        data: BASE64.encode(&bytes),
    })
}
