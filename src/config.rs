//! Configuration loading for the crawler.
//!
//! Configuration lives in a JSON file (`config.json` by default) with
//! sections for the crawler, politeness controller, deduplication, output,
//! seed URLs, custom headers, the admission API, and the metrics sink.
//! Missing fields fall back to their defaults, so a minimal config is just
//! `{"urls": ["https://example.com/"]}`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlerSection {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub user_agent: String,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub respect_robots_txt: bool,
    pub respect_meta_tags: bool,
    pub max_file_size_mb: u64,
    pub verify_certificates: bool,
    pub enable_periodic_stats: bool,
}

impl Default for CrawlerSection {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 2,
            retry_backoff_ms: 200,
            user_agent: "DatasetCrawler/1.0".to_string(),
            follow_redirects: true,
            max_redirects: 5,
            respect_robots_txt: true,
            respect_meta_tags: true,
            max_file_size_mb: 100,
            verify_certificates: false,
            enable_periodic_stats: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolitenessSection {
    pub enable_adaptive_delay: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub base_delay_ms: u64,
    pub latency_ema_alpha: f64,
    pub failure_backoff_ms: u64,
    pub jitter_pct: u64,
}

impl Default for PolitenessSection {
    fn default() -> Self {
        Self {
            enable_adaptive_delay: true,
            min_delay_ms: 50,
            max_delay_ms: 2000,
            base_delay_ms: 150,
            latency_ema_alpha: 0.2,
            failure_backoff_ms: 250,
            jitter_pct: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupSection {
    pub enable_deduplication: bool,
    pub simhash_threshold: u32,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enable_deduplication: true,
            simhash_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub format: String,
    pub output_dir: String,
    pub batch_size: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            output_dir: "./output".to_string(),
            batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSection {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClickHouseSection {
    pub enabled: bool,
    pub endpoint: String,
    pub database: String,
    pub metrics_table: String,
    pub link_graph_table: String,
    pub user: String,
    pub password: String,
    pub timeout_seconds: u64,
}

impl Default for ClickHouseSection {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8123".to_string(),
            database: "crawler".to_string(),
            metrics_table: "request_metrics".to_string(),
            link_graph_table: "link_graph".to_string(),
            user: String::new(),
            password: String::new(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlerConfig {
    pub crawler: CrawlerSection,
    pub politeness: PolitenessSection,
    pub dedup: DedupSection,
    pub output: OutputSection,
    pub urls: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub api: ApiSection,
    pub clickhouse: ClickHouseSection,
    pub data_dir: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());

        Self {
            crawler: CrawlerSection::default(),
            politeness: PolitenessSection::default(),
            dedup: DedupSection::default(),
            output: OutputSection::default(),
            urls: Vec::new(),
            headers,
            api: ApiSection::default(),
            clickhouse: ClickHouseSection::default(),
            data_dir: "./data".to_string(),
        }
    }
}

impl CrawlerConfig {
    /// Load and validate a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: CrawlerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.output.format.as_str() {
            "json" | "csv" | "both" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "output.format must be one of json, csv, both (got {:?})",
                    other
                )))
            }
        }

        if self.politeness.min_delay_ms > self.politeness.max_delay_ms {
            return Err(ConfigError::Invalid(
                "politeness.min_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.politeness.latency_ema_alpha) {
            return Err(ConfigError::Invalid(
                "politeness.latency_ema_alpha must be within [0, 1]".to_string(),
            ));
        }

        if self.urls.is_empty() && !self.api.enabled {
            return Err(ConfigError::Invalid(
                "no seed URLs configured and the admission API is disabled".to_string(),
            ));
        }

        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.crawler.max_file_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrawlerConfig::default();
        assert_eq!(config.crawler.timeout_seconds, 30);
        assert_eq!(config.crawler.max_retries, 2);
        assert_eq!(config.crawler.retry_backoff_ms, 200);
        assert_eq!(config.crawler.user_agent, "DatasetCrawler/1.0");
        assert!(config.crawler.respect_robots_txt);
        assert!(!config.crawler.verify_certificates);
        assert_eq!(config.politeness.min_delay_ms, 50);
        assert_eq!(config.politeness.max_delay_ms, 2000);
        assert_eq!(config.dedup.simhash_threshold, 3);
        assert_eq!(config.output.format, "json");
        assert_eq!(config.max_file_size_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn test_minimal_config_parses() {
        let config: CrawlerConfig =
            serde_json::from_str(r#"{"urls": ["https://example.com/"]}"#).unwrap();
        config.validate().unwrap();
        assert_eq!(config.urls.len(), 1);
        assert_eq!(config.crawler.max_redirects, 5);
    }

    #[test]
    fn test_sections_override() {
        let raw = r#"{
            "crawler": {"timeout_seconds": 5, "user_agent": "TestBot/2.0"},
            "politeness": {"min_delay_ms": 10, "max_delay_ms": 100},
            "output": {"format": "both", "batch_size": 50},
            "urls": ["https://a.test/"],
            "headers": {"X-Custom": "1"}
        }"#;
        let config: CrawlerConfig = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.crawler.timeout_seconds, 5);
        assert_eq!(config.crawler.user_agent, "TestBot/2.0");
        assert_eq!(config.politeness.min_delay_ms, 10);
        assert_eq!(config.output.format, "both");
        assert_eq!(config.headers.get("X-Custom").unwrap(), "1");
    }

    #[test]
    fn test_invalid_format_rejected() {
        let config: CrawlerConfig = serde_json::from_str(
            r#"{"urls": ["https://a.test/"], "output": {"format": "parquet"}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_seeds_requires_api() {
        let config: CrawlerConfig = serde_json::from_str(r#"{}"#).unwrap();
        assert!(config.validate().is_err());

        let config: CrawlerConfig =
            serde_json::from_str(r#"{"api": {"enabled": true}}"#).unwrap();
        config.validate().unwrap();
    }
}
