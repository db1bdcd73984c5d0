//! Smart-mode fallback heuristic.
//!
//! Decides, from static HTML alone, whether a page needs a real browser to
//! render. Pure function of its input: no I/O, no clock, no configuration.
//! The byte thresholds and marker list are contractual; changing them
//! changes which pages fall back to the browser.

/// Phrases inside `<noscript>` blocks that mark a JS-required page.
const NOSCRIPT_PHRASES: &[&str] = &["enable javascript", "need javascript", "requires javascript"];

/// Markers left behind by common SPA shells (React, Next.js, Angular, Vue).
const SPA_MARKERS: &[&str] = &[
    "id=\"root\"",
    "id=\"app\"",
    "id=\"__next\"",
    "data-reactroot",
    "__NEXT_DATA__",
    "ng-version",
    "<app-root>",
];

/// A page whose HTML is shorter than this and carries an SPA marker is
/// assumed to be an unrendered shell.
const SPA_SHELL_MAX_LEN: usize = 5000;

/// A page shorter than this that still loads scripts is assumed to render
/// client-side.
const TINY_PAGE_MAX_LEN: usize = 2000;

/// True when the static HTML is insufficient and a dynamic fetch is needed.
///
/// Lengths are byte lengths of the decoded UTF-8 string.
pub fn needs_dynamic(html: &str) -> bool {
    let len = html.len();

    if html.contains("<noscript") {
        let lowered = html.to_lowercase();
        if NOSCRIPT_PHRASES.iter().any(|p| lowered.contains(p)) {
            return true;
        }
    }

    if len < SPA_SHELL_MAX_LEN && SPA_MARKERS.iter().any(|m| html.contains(m)) {
        return true;
    }

    len < TINY_PAGE_MAX_LEN && html.contains("<script")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noscript_javascript_notice_triggers() {
        let html = format!(
            "<html><noscript>Please enable JavaScript to view this site.</noscript>{}</html>",
            "x".repeat(10_000)
        );
        assert!(needs_dynamic(&html));
    }

    #[test]
    fn noscript_phrase_match_is_case_insensitive() {
        assert!(needs_dynamic(
            "<noscript>This page REQUIRES JAVASCRIPT.</noscript>"
        ));
    }

    #[test]
    fn noscript_without_phrase_does_not_trigger() {
        let html = format!(
            "<html><noscript><img src=\"/pixel.gif\"></noscript>{}</html>",
            "x".repeat(10_000)
        );
        assert!(!needs_dynamic(&html));
    }

    #[test]
    fn small_spa_shell_triggers() {
        let html = r#"<!doctype html><html><head></head><body><div id="root"></div><script src="/app.js"></script></body></html>"#;
        assert!(html.len() < SPA_SHELL_MAX_LEN);
        assert!(needs_dynamic(html));
    }

    #[test]
    fn large_article_mentioning_root_does_not_trigger() {
        // 50 KB article that happens to contain the marker text.
        let html = format!(
            "<html><body><article>{} id=\"root\" {}</article></body></html>",
            "word ".repeat(5_000),
            "word ".repeat(5_000)
        );
        assert!(html.len() > SPA_SHELL_MAX_LEN);
        assert!(!needs_dynamic(&html));
    }

    #[test]
    fn each_spa_marker_triggers_on_small_pages() {
        for marker in SPA_MARKERS {
            let html = format!("<html><body>{marker}</body></html>");
            assert!(needs_dynamic(&html), "marker {marker:?} should trigger");
        }
    }

    #[test]
    fn tiny_page_with_script_triggers() {
        assert!(needs_dynamic(
            "<html><body><script>boot()</script></body></html>"
        ));
    }

    #[test]
    fn tiny_page_without_script_does_not_trigger() {
        assert!(!needs_dynamic("<html><body><h1>Hi</h1></body></html>"));
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        // Exactly 2000 bytes with a script tag: rule 3 requires strictly less.
        let pad = "x".repeat(TINY_PAGE_MAX_LEN - "<script".len());
        let html = format!("<script{pad}");
        let html = &html[..TINY_PAGE_MAX_LEN];
        assert_eq!(html.len(), TINY_PAGE_MAX_LEN);
        assert!(!needs_dynamic(html));
    }

    #[test]
    fn deterministic_over_repeated_calls() {
        let html = r#"<div id="app"></div>"#;
        let first = needs_dynamic(html);
        for _ in 0..10 {
            assert_eq!(needs_dynamic(html), first);
        }
    }
}
