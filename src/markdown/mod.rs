//! HTML to Markdown conversion.
//!
//! Wraps the htmd converter and adds a post-processing pass so the output
//! is clean enough to hand straight to an LLM: no script/style residue,
//! normalized heading and list spacing, no runs of blank lines.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use htmd::HtmlToMarkdown;
use regex::Regex;

// Compile regex patterns once at first use.
// These are syntactically valid hardcoded patterns - if they fail, it's a compile-time bug.
static EMPTY_LINES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n{3,}").expect("SAFETY: hardcoded regex r\"\\n{3,}\" is statically valid")
});

static HEADING_SPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(#+)([^ #])")
        .expect("SAFETY: hardcoded regex r\"(?m)^(#+)([^ #])\" is statically valid")
});

static LIST_MARKER_SPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\s*[-*+])\s+")
        .expect("SAFETY: hardcoded regex r\"(?m)^(\\s*[-*+])\\s+\" is statically valid")
});

/// Elements that never contribute to readable Markdown.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "svg", "head"];

/// Reusable HTML to Markdown converter.
///
/// Construction builds the underlying htmd pipeline once; `convert` is then
/// cheap and safe to call from concurrent requests.
pub struct MarkdownConverter {
    inner: HtmlToMarkdown,
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownConverter {
    #[must_use]
    pub fn new() -> Self {
        let inner = HtmlToMarkdown::builder()
            .skip_tags(SKIPPED_TAGS.to_vec())
            .build();
        Self { inner }
    }

    /// Convert an HTML document to Markdown.
    ///
    /// An empty document converts to an empty string rather than an error;
    /// the caller decides whether empty output is meaningful.
    pub fn convert(&self, html: &str) -> Result<String> {
        if html.trim().is_empty() {
            return Ok(String::new());
        }

        let raw = self
            .inner
            .convert(html)
            .context("HTML to Markdown conversion failed")?;

        Ok(postprocess(&raw))
    }
}

/// Normalize converter output: collapse blank-line runs, force a space after
/// heading markers, and single-space list markers.
fn postprocess(markdown: &str) -> String {
    let collapsed = EMPTY_LINES.replace_all(markdown, "\n\n");
    let headings = HEADING_SPACE.replace_all(&collapsed, "$1 $2");
    let lists = LIST_MARKER_SPACE.replace_all(&headings, "$1 ");
    lists.trim().to_string()
}
