//! Crawl engine: the per-URL pipeline tying together the frontier, robots
//! policy, fetcher, deduplicator, politeness controller, and sinks.
//!
//! Single-threaded and cooperative: the loop dequeues one URL at a time,
//! runs it through the gates, and sleeps the politeness delay before the
//! next. The admission thread only ever touches the frontier, and the
//! stats reporter only reads the atomic counters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dedup::{self, Deduper};
use crate::extractor;
use crate::fetcher::{Fetcher, HttpVersion, Response};
use crate::frontier::Frontier;
use crate::metrics::{Counters, CrawlerStats};
use crate::models::{timestamp_now, DataRecord, FetchMetric, LinkEdge};
use crate::politeness::Politeness;
use crate::robots::RobotsCache;
use crate::sink::SinkHandle;
use crate::url_utils;

pub const SEED_PRIORITY: u16 = 0;
pub const DISCOVERED_PRIORITY: u16 = 1;

/// Bodies shorter than this are never deduplicated and trigger the
/// thin-page warning on a 200.
const MIN_RECORD_BODY_BYTES: usize = 100;

/// Idle sleep while the frontier is empty but the admission endpoint may
/// still deliver URLs.
const ADMISSION_IDLE_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub respect_robots_txt: bool,
    pub respect_meta_tags: bool,
    pub enable_deduplication: bool,
    pub max_file_size_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            respect_robots_txt: true,
            respect_meta_tags: true,
            enable_deduplication: true,
            max_file_size_bytes: 100 * 1024 * 1024,
        }
    }
}

pub struct CrawlEngine {
    config: EngineConfig,
    frontier: Arc<Frontier>,
    fetcher: Fetcher,
    robots: RobotsCache,
    deduper: Deduper,
    politeness: Politeness,
    sink: SinkHandle,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
}

impl CrawlEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        frontier: Arc<Frontier>,
        fetcher: Fetcher,
        robots: RobotsCache,
        deduper: Deduper,
        politeness: Politeness,
        sink: SinkHandle,
        counters: Arc<Counters>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            frontier,
            fetcher,
            robots,
            deduper,
            politeness,
            sink,
            counters,
            stop,
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Canonicalize and enqueue a URL at seed priority. Returns false for
    /// malformed URLs.
    pub fn enqueue(&self, url: &str) -> bool {
        match url_utils::normalize(url) {
            Some(normalized) => self
                .frontier
                .enqueue(&normalized, SEED_PRIORITY)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Run the crawl until the frontier drains (and, when the admission
    /// endpoint is open, until the stop flag is raised).
    pub async fn run(&mut self, seeds: &[String], admission_open: bool) -> CrawlerStats {
        let mut seeded = 0usize;
        for seed in seeds {
            match url_utils::normalize(seed) {
                Some(url) => match self.frontier.enqueue(&url, SEED_PRIORITY) {
                    Ok(true) => seeded += 1,
                    Ok(false) => tracing::warn!("Failed to parse URL: {}", seed),
                    Err(error) => tracing::error!("Failed to enqueue {}: {}", seed, error),
                },
                None => tracing::warn!("Failed to parse URL: {}", seed),
            }
        }
        tracing::info!("Crawling will be started using {} start URLs", seeded);

        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("Stop requested, finishing crawl");
                break;
            }

            if self.frontier.is_empty() {
                if admission_open {
                    tokio::time::sleep(ADMISSION_IDLE_WAIT).await;
                    continue;
                }
                break;
            }

            let url = match self.frontier.dequeue() {
                Ok(Some(url)) => url,
                Ok(None) => continue,
                Err(error) => {
                    tracing::error!("Frontier dequeue failed: {}", error);
                    break;
                }
            };

            let url = match url_utils::normalize(&url) {
                Some(url) => url,
                None => {
                    tracing::warn!("Failed to parse URL: {}", url);
                    continue;
                }
            };

            match self.frontier.is_visited(&url) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!("Visited lookup failed for {}: {}", url, error);
                    continue;
                }
            }
            if let Err(error) = self.frontier.mark_visited(&url) {
                // The URL is effectively lost for this run; carry on.
                tracing::error!("Failed to mark {} visited: {}", url, error);
            }

            self.process_url(&url).await;
        }

        if let Err(error) = self.frontier.flush() {
            tracing::error!("Frontier flush failed: {}", error);
        }

        let stats = self.counters.snapshot();
        tracing::info!(
            "Crawling completed. Fetched: {} records, Blocked by robots.txt: {}, \
             Blocked by noindex: {}, Skipped by size: {}, Duplicates: {}",
            stats.records_emitted,
            stats.blocked_by_robots,
            stats.blocked_by_noindex,
            stats.skipped_by_size,
            stats.duplicates_detected,
        );
        stats
    }

    async fn process_url(&mut self, url: &str) {
        // Robots gate. The robots.txt fetch itself bypasses this check.
        let mut crawl_delay = None;
        if self.config.respect_robots_txt {
            let (rules, newly_loaded) = self.robots.host_rules(url, &self.fetcher).await;
            if newly_loaded && !rules.sitemaps.is_empty() {
                Counters::add(&self.counters.sitemaps_found, rules.sitemaps.len() as u64);
                tracing::info!(
                    "Found {} sitemap(s) in robots.txt for {}",
                    rules.sitemaps.len(),
                    url_utils::extract_host(url).unwrap_or_default()
                );
            }
            crawl_delay = rules.crawl_delay(self.robots.user_agent());

            if !self.robots.allowed(&rules, url) {
                Counters::inc(&self.counters.blocked_by_robots);
                tracing::warn!("{} [blocked]", url);
                self.sink.record(DataRecord::blocked(url));
                self.apply_politeness(403, Duration::ZERO, crawl_delay).await;
                return;
            }
        }

        let (result, duration) = self.fetcher.fetch(url).await;
        Counters::inc(&self.counters.total_requests);
        Counters::add(&self.counters.total_duration_ms, duration.as_millis() as u64);

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                Counters::inc(&self.counters.failed_requests);
                tracing::error!("{} - {}", url, error);
                self.sink.metric(FetchMetric {
                    url: url.to_string(),
                    status_code: 0,
                    duration_ms: duration.as_millis() as u64,
                    bytes: 0,
                    content_type: String::new(),
                    timestamp: timestamp_now(),
                    success: false,
                    error_message: error.to_string(),
                });
                self.apply_politeness(0, duration, crawl_delay).await;
                return;
            }
        };

        match response.http_version {
            HttpVersion::Http10 => Counters::inc(&self.counters.http10_requests),
            HttpVersion::Http11 => Counters::inc(&self.counters.http11_requests),
            HttpVersion::Http2 => Counters::inc(&self.counters.http2_requests),
            HttpVersion::Unknown => {}
        }

        let status = response.status;
        let body_len = response.body.len();
        Counters::add(&self.counters.total_bytes_downloaded, body_len as u64);
        if response.is_success() {
            Counters::inc(&self.counters.successful_requests);
        } else {
            Counters::inc(&self.counters.failed_requests);
        }

        self.sink.metric(FetchMetric {
            url: url.to_string(),
            status_code: status,
            duration_ms: duration.as_millis() as u64,
            bytes: body_len as u64,
            content_type: response.content_type.clone().unwrap_or_default(),
            timestamp: timestamp_now(),
            success: status > 0,
            error_message: String::new(),
        });

        // Size gate.
        if body_len as u64 > self.config.max_file_size_bytes {
            Counters::inc(&self.counters.skipped_by_size);
            tracing::warn!("{} [skipped - size limit exceeded]", url);
            self.apply_politeness(status, duration, crawl_delay).await;
            return;
        }

        let body = response.body_string();
        if status == 200 && body_len < MIN_RECORD_BODY_BYTES {
            tracing::warn!("No text parsed from {}", url);
        }

        // Meta-robots gate.
        if self.config.respect_meta_tags && status == 200 && extractor::has_noindex(&body) {
            Counters::inc(&self.counters.blocked_by_noindex);
            tracing::warn!("{} [blocked by noindex]", url);
            self.apply_politeness(status, duration, crawl_delay).await;
            return;
        }

        // Duplicate gate.
        if self.config.enable_deduplication
            && status == 200
            && body_len >= MIN_RECORD_BODY_BYTES
        {
            let hash = dedup::simhash(&body);
            if self.deduper.is_duplicate(hash) {
                Counters::inc(&self.counters.duplicates_detected);
                tracing::warn!("Duplicate content detected for {}", url);
                self.apply_politeness(status, duration, crawl_delay).await;
                return;
            }
        }

        self.emit_record(url, &response, &body);

        if status == 200 {
            self.discover_links(url, &response, &body);
        }

        self.apply_politeness(status, duration, crawl_delay).await;
    }

    fn emit_record(&self, url: &str, response: &Response, body: &str) {
        let status = response.status;
        let final_url = if response.final_url.is_empty() {
            url.to_string()
        } else {
            response.final_url.clone()
        };

        if status == 200 {
            tracing::info!("{} [{}]", url, status);
        } else {
            tracing::warn!("{} [{}]", url, status);
        }

        let record = DataRecord {
            url: final_url,
            title: extractor::extract_title(body),
            content: body.to_string(),
            fetched_at: timestamp_now(),
            status,
            allowed: true,
            length: body.len(),
            skipped: false,
        };
        self.sink.record(record);
        Counters::inc(&self.counters.records_emitted);
    }

    /// Extract links from the final body, record edges, and enqueue the
    /// not-yet-visited ones at discovered priority.
    fn discover_links(&self, url: &str, response: &Response, body: &str) {
        let base = if response.final_url.is_empty() {
            url
        } else {
            &response.final_url
        };

        let links = extractor::extract_links(body, base);
        let mut enqueued = 0u64;

        for link in &links {
            if let Err(error) = self.frontier.add_edge(url, link) {
                tracing::error!("Failed to record edge {} -> {}: {}", url, link, error);
            }
            self.sink.edge(LinkEdge {
                from_url: url.to_string(),
                to_url: link.clone(),
                discovered_at: timestamp_now(),
            });

            let already_visited = self.frontier.is_visited(link).unwrap_or(false);
            if !already_visited {
                match self.frontier.enqueue(link, DISCOVERED_PRIORITY) {
                    Ok(true) => enqueued += 1,
                    Ok(false) => {}
                    Err(error) => {
                        tracing::error!("Failed to enqueue {}: {}", link, error);
                    }
                }
            }
        }

        if enqueued > 0 {
            Counters::add(&self.counters.links_enqueued, enqueued);
            tracing::info!("Enqueued {} new links on {}", enqueued, url);
        }
    }

    async fn apply_politeness(
        &mut self,
        status: u16,
        duration: Duration,
        crawl_delay: Option<Duration>,
    ) {
        self.politeness.set_crawl_delay_floor(crawl_delay);
        self.politeness
            .apply(status, duration, self.frontier.size())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns_cache::DnsCache;
    use crate::fetcher::FetcherConfig;
    use crate::politeness::PolitenessConfig;
    use crate::sink::{spawn_sink, OutputFormat, SinkConfig};
    use tempfile::TempDir;

    fn test_engine(dir: &TempDir) -> (CrawlEngine, Arc<Frontier>) {
        let frontier = Arc::new(Frontier::open(dir.path().join("frontier")).unwrap());
        let fetcher = Fetcher::new(FetcherConfig::default(), Arc::new(DnsCache::new()));
        let robots = RobotsCache::new("DatasetCrawler/1.0".to_string());
        let politeness = Politeness::new(PolitenessConfig {
            enabled: false,
            ..Default::default()
        });
        let (sink, _task) = spawn_sink(SinkConfig {
            format: OutputFormat::Json,
            output_dir: dir.path().join("out"),
            batch_size: 10,
            clickhouse: None,
        })
        .unwrap();

        let engine = CrawlEngine::new(
            EngineConfig::default(),
            Arc::clone(&frontier),
            fetcher,
            robots,
            Deduper::default(),
            politeness,
            sink,
            Arc::new(Counters::new()),
            Arc::new(AtomicBool::new(false)),
        );
        (engine, frontier)
    }

    #[tokio::test]
    async fn test_enqueue_canonicalizes() {
        let dir = TempDir::new().unwrap();
        let (engine, frontier) = test_engine(&dir);

        assert!(engine.enqueue("https://A.test/page/#frag"));
        assert!(!engine.enqueue("not a url"));
        assert_eq!(frontier.dequeue().unwrap().unwrap(), "https://a.test/page");
    }

    #[tokio::test]
    async fn test_run_with_no_work_returns_stats() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _frontier) = test_engine(&dir);

        let stats = engine.run(&[], false).await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.records_emitted, 0);
    }

    #[tokio::test]
    async fn test_malformed_seeds_are_dropped() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _frontier) = test_engine(&dir);

        let stats = engine
            .run(&["nonsense".to_string(), "ftp://a.test/x".to_string()], false)
            .await;
        assert_eq!(stats.total_requests, 0);
    }
}
