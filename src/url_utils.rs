//! URL canonicalization helpers used throughout the crawler.
//!
//! Two URLs are considered the same page iff their normalized forms are
//! byte-equal; the visited set and the frontier store only normalized forms.

use url::Url;

/// Parse an absolute `http(s)` URL. Rejects other schemes and empty hosts.
pub fn parse(raw: &str) -> Option<Url> {
    let parsed = Url::parse(raw).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str()?;
    Some(parsed)
}

/// Check whether a string is an absolute http(s) URL.
pub fn is_http(raw: &str) -> bool {
    parse(raw).is_some()
}

/// Normalize a URL to its canonical byte form:
/// scheme/host lowercased, fragment removed, trailing slashes trimmed on
/// non-root paths. The query string is preserved verbatim.
pub fn normalize(raw: &str) -> Option<String> {
    let mut parsed = parse(raw)?;
    parsed.set_fragment(None);

    let path = parsed.path();
    if path != "/" && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            parsed.set_path("/");
        } else {
            parsed.set_path(&trimmed);
        }
    }

    Some(parsed.to_string())
}

/// Resolve a reference (absolute, protocol-relative, absolute-path, or
/// relative) against a base URL and normalize the result. `.` and `..`
/// segments are collapsed during resolution.
pub fn resolve(base: &str, reference: &str) -> Option<String> {
    if reference.is_empty() {
        return None;
    }

    let base = parse(base)?;
    let joined = base.join(reference).ok()?;
    normalize(joined.as_str())
}

/// Extract the host portion of a URL.
pub fn extract_host(raw: &str) -> Option<String> {
    parse(raw).and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Path plus query, as sent on the request line and matched against robots
/// rules.
pub fn path_and_query(raw: &str) -> String {
    match parse(raw) {
        Some(u) => match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        },
        None => "/".to_string(),
    }
}

/// Build the robots.txt URL for the host of the given URL.
pub fn robots_url(raw: &str) -> Option<String> {
    let parsed = parse(raw)?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{}:{}/robots.txt", parsed.scheme(), host, port)),
        None => Some(format!("{}://{}/robots.txt", parsed.scheme(), host)),
    }
}
