//! Data types shared across the crawl pipeline and the sinks.

use serde::Serialize;

/// One crawled page, as handed to the dataset sink.
///
/// A record is only emitted when the page was allowed, not skipped, and not
/// a near-duplicate; blocked pages still produce a synthetic record with
/// `allowed = false` so the dataset accounts for them.
#[derive(Debug, Clone, Serialize)]
pub struct DataRecord {
    pub url: String,
    pub title: String,
    pub content: String,
    pub fetched_at: String,
    pub status: u16,
    pub allowed: bool,
    pub length: usize,
    pub skipped: bool,
}

impl DataRecord {
    /// Synthetic record for a robots.txt denial.
    pub fn blocked(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: "BLOCKED".to_string(),
            content: String::new(),
            fetched_at: timestamp_now(),
            status: 403,
            allowed: false,
            length: 0,
            skipped: false,
        }
    }
}

/// A discovered hyperlink from one fetched page to another URL.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEdge {
    pub from_url: String,
    pub to_url: String,
    pub discovered_at: String,
}

/// Per-request metric row, shaped for a `JSONEachRow` insert.
#[derive(Debug, Clone, Serialize)]
pub struct FetchMetric {
    pub url: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub bytes: u64,
    pub content_type: String,
    pub timestamp: String,
    pub success: bool,
    pub error_message: String,
}

/// Local wall-clock timestamp in the dataset's `%Y-%m-%d %H:%M:%S` format.
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_record_shape() {
        let record = DataRecord::blocked("https://a.test/private");
        assert_eq!(record.status, 403);
        assert!(!record.allowed);
        assert!(!record.skipped);
        assert_eq!(record.title, "BLOCKED");
        assert_eq!(record.length, 0);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp_now();
        // 2026-01-02 15:04:05
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }

    #[test]
    fn test_metric_serializes_to_jsoneachrow_shape() {
        let metric = FetchMetric {
            url: "https://a.test/".to_string(),
            status_code: 200,
            duration_ms: 42,
            bytes: 1024,
            content_type: "text/html".to_string(),
            timestamp: "2026-01-01 00:00:00".to_string(),
            success: true,
            error_message: String::new(),
        };
        let json = serde_json::to_string(&metric).unwrap();
        assert!(json.contains("\"status_code\":200"));
        assert!(json.contains("\"duration_ms\":42"));
        assert!(json.contains("\"success\":true"));
    }
}
