//! Crawl statistics: atomic counters plus an optional periodic reporter.
//!
//! Counters are plain atomics so the reporter thread can read them without
//! touching any engine state; the engine is the only writer.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared counters updated by the engine and read by the stats reporter.
#[derive(Debug, Default)]
pub struct Counters {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub records_emitted: AtomicU64,
    pub blocked_by_robots: AtomicU64,
    pub blocked_by_noindex: AtomicU64,
    pub skipped_by_size: AtomicU64,
    pub duplicates_detected: AtomicU64,
    pub sitemaps_found: AtomicU64,
    pub links_enqueued: AtomicU64,
    pub http10_requests: AtomicU64,
    pub http11_requests: AtomicU64,
    pub http2_requests: AtomicU64,
    pub total_bytes_downloaded: AtomicU64,
    pub total_duration_ms: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, delta: u64) {
        counter.fetch_add(delta, Ordering::Relaxed);
    }

    /// Point-in-time snapshot with derived averages.
    pub fn snapshot(&self) -> CrawlerStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);

        let avg_request_duration_ms = if total_requests > 0 {
            total_duration_ms as f64 / total_requests as f64
        } else {
            0.0
        };
        let requests_per_minute = if total_duration_ms > 0 {
            total_requests as f64 * 60_000.0 / total_duration_ms as f64
        } else {
            0.0
        };

        CrawlerStats {
            total_requests,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            blocked_by_robots: self.blocked_by_robots.load(Ordering::Relaxed),
            blocked_by_noindex: self.blocked_by_noindex.load(Ordering::Relaxed),
            skipped_by_size: self.skipped_by_size.load(Ordering::Relaxed),
            duplicates_detected: self.duplicates_detected.load(Ordering::Relaxed),
            sitemaps_found: self.sitemaps_found.load(Ordering::Relaxed),
            links_enqueued: self.links_enqueued.load(Ordering::Relaxed),
            http10_requests: self.http10_requests.load(Ordering::Relaxed),
            http11_requests: self.http11_requests.load(Ordering::Relaxed),
            http2_requests: self.http2_requests.load(Ordering::Relaxed),
            total_bytes_downloaded: self.total_bytes_downloaded.load(Ordering::Relaxed),
            total_duration_ms,
            avg_request_duration_ms,
            requests_per_minute,
        }
    }
}

/// Aggregate crawl statistics returned by the engine and logged by the
/// periodic reporter.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlerStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub records_emitted: u64,
    pub blocked_by_robots: u64,
    pub blocked_by_noindex: u64,
    pub skipped_by_size: u64,
    pub duplicates_detected: u64,
    pub sitemaps_found: u64,
    pub links_enqueued: u64,
    pub http10_requests: u64,
    pub http11_requests: u64,
    pub http2_requests: u64,
    pub total_bytes_downloaded: u64,
    pub total_duration_ms: u64,
    pub avg_request_duration_ms: f64,
    pub requests_per_minute: f64,
}

impl std::fmt::Display for CrawlerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Requests: {} | Success: {} | Failed: {} | Records: {} | \
             Blocked (robots): {} | Blocked (noindex): {} | Skipped (size): {} | \
             Duplicates: {} | HTTP/1.1: {} | HTTP/1.0: {} | Data: {} MB | \
             Avg: {:.0} ms/req | Rate: {:.1} req/min",
            self.total_requests,
            self.successful_requests,
            self.failed_requests,
            self.records_emitted,
            self.blocked_by_robots,
            self.blocked_by_noindex,
            self.skipped_by_size,
            self.duplicates_detected,
            self.http11_requests,
            self.http10_requests,
            self.total_bytes_downloaded / (1024 * 1024),
            self.avg_request_duration_ms,
            self.requests_per_minute,
        )
    }
}

const REPORT_INTERVAL: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Background thread that logs a stats summary once a minute.
///
/// The thread only reads the atomic counters; nothing mutable is shared
/// with the crawl loop.
pub struct StatsReporter {
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl StatsReporter {
    pub fn spawn(counters: Arc<Counters>) -> Self {
        Self::spawn_with_interval(counters, REPORT_INTERVAL)
    }

    pub fn spawn_with_interval(counters: Arc<Counters>, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("stats-reporter".to_string())
            .spawn(move || {
                let mut since_report = Duration::ZERO;
                while thread_running.load(Ordering::Relaxed) {
                    std::thread::sleep(POLL_INTERVAL);
                    since_report += POLL_INTERVAL;
                    if since_report >= interval {
                        since_report = Duration::ZERO;
                        tracing::info!("[STATS REPORT] {}", counters.snapshot());
                    }
                }
            })
            .expect("failed to spawn stats reporter thread");

        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
