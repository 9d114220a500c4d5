//! HTML extraction: outbound links, page title, canonical URL, and the
//! meta-robots noindex gate.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::url_utils;

/// Extract all outbound links from a page, resolved against the base URL
/// (or a `<base href>` when present), normalized and deduplicated. The
/// page's canonical URL, when declared, is included.
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    let base_selector = Selector::parse("base[href]").unwrap();
    let effective_base = document
        .select(&base_selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| url_utils::resolve(base_url, href))
        .unwrap_or_else(|| base_url.to_string());

    let mut unique: BTreeSet<String> = BTreeSet::new();

    let anchor_selector = Selector::parse("a[href]").unwrap();
    for element in document.select(&anchor_selector) {
        let href = match element.value().attr("href") {
            Some(href) => href.trim(),
            None => continue,
        };
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        if let Some(resolved) = url_utils::resolve(&effective_base, href) {
            unique.insert(resolved);
        }
    }

    if let Some(canonical) = extract_canonical(&document, &effective_base) {
        unique.insert(canonical);
    }

    unique.into_iter().collect()
}

fn extract_canonical(document: &Html, base_url: &str) -> Option<String> {
    let selector = Selector::parse("link[rel]").unwrap();
    for element in document.select(&selector) {
        let rel = element.value().attr("rel")?;
        if rel.eq_ignore_ascii_case("canonical") {
            let href = element.value().attr("href")?;
            return url_utils::resolve(base_url, href);
        }
    }
    None
}

/// Page title text, or "No title".
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").unwrap();
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "No title".to_string())
}

fn noindex_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)meta\s+name=["']robots["']\s+content=["']([^"']*)["']"#)
            .expect("noindex regex is valid")
    })
}

/// Whether the page carries a `<meta name="robots">` directive containing
/// `noindex`. A single scan over the raw HTML, case-insensitive.
pub fn has_noindex(html: &str) -> bool {
    noindex_regex()
        .captures(html)
        .map(|captures| captures[1].to_ascii_lowercase().contains("noindex"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_resolves_and_normalizes() {
        let html = r#"<html><body>
            <a href="/public">Public</a>
            <a href="relative">Rel</a>
            <a href="https://other.test/page#frag">Other</a>
        </body></html>"#;

        let links = extract_links(html, "https://a.test/dir/page");
        assert!(links.contains(&"https://a.test/public".to_string()));
        assert!(links.contains(&"https://a.test/dir/relative".to_string()));
        assert!(links.contains(&"https://other.test/page".to_string()));
    }

    #[test]
    fn test_extract_links_skips_non_navigable() {
        let html = r##"<a href="#top">Top</a>
            <a href="javascript:void(0)">JS</a>
            <a href="mailto:x@a.test">Mail</a>
            <a href="tel:+1555">Call</a>
            <a href="/keep">Keep</a>"##;

        let links = extract_links(html, "https://a.test/");
        assert_eq!(links, vec!["https://a.test/keep".to_string()]);
    }

    #[test]
    fn test_extract_links_deduplicates() {
        let html = r#"<a href="/x">1</a><a href="/x">2</a><a href="/x#frag">3</a>"#;
        let links = extract_links(html, "https://a.test/");
        assert_eq!(links, vec!["https://a.test/x".to_string()]);
    }

    #[test]
    fn test_base_href_overrides_document_url() {
        let html = r#"<head><base href="https://cdn.test/assets/"></head>
            <body><a href="page">P</a></body>"#;
        let links = extract_links(html, "https://a.test/dir/");
        assert_eq!(links, vec!["https://cdn.test/assets/page".to_string()]);
    }

    #[test]
    fn test_canonical_link_included() {
        let html = r#"<head><link rel="canonical" href="/canonical-form"></head>
            <body><a href="/x">X</a></body>"#;
        let links = extract_links(html, "https://a.test/page?utm=1");
        assert!(links.contains(&"https://a.test/canonical-form".to_string()));
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><head><title>  Hello  </title></head></html>"),
            "Hello"
        );
        assert_eq!(extract_title("<html><body>No head</body></html>"), "No title");
        assert_eq!(extract_title("<title></title>"), "No title");
    }

    #[test]
    fn test_noindex_detected() {
        assert!(has_noindex(r#"<meta name="robots" content="noindex, nofollow">"#));
        assert!(has_noindex(r#"<META NAME="ROBOTS" CONTENT="NOINDEX">"#));
        assert!(has_noindex(r#"<meta name='robots' content='noindex'>"#));
    }

    #[test]
    fn test_noindex_absent() {
        assert!(!has_noindex(r#"<meta name="robots" content="index, follow">"#));
        assert!(!has_noindex(r#"<meta name="viewport" content="width=device-width">"#));
        assert!(!has_noindex("<html><body>noindex as plain text</body></html>"));
    }
}
