//! Adaptive politeness controller.
//!
//! Tracks a latency EMA and success/failure streaks, scales the
//! inter-request delay with frontier pressure, smooths against the previous
//! delay, and applies symmetric jitter. A per-host robots `Crawl-delay`
//! raises the delay floor.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PolitenessConfig {
    pub enabled: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub base_delay_ms: u64,
    pub latency_ema_alpha: f64,
    pub failure_backoff_ms: u64,
    pub jitter_pct: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_ms: 50,
            max_delay_ms: 2000,
            base_delay_ms: 150,
            latency_ema_alpha: 0.2,
            failure_backoff_ms: 250,
            jitter_pct: 10,
        }
    }
}

#[derive(Debug)]
pub struct Politeness {
    config: PolitenessConfig,
    latency_ema_ms: f64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_delay_ms: u64,
    crawl_delay_floor: Option<Duration>,
}

impl Politeness {
    pub fn new(config: PolitenessConfig) -> Self {
        Self {
            config,
            latency_ema_ms: 0.0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_delay_ms: 0,
            crawl_delay_floor: None,
        }
    }

    /// Per-host robots `Crawl-delay`, set before each request completes.
    pub fn set_crawl_delay_floor(&mut self, floor: Option<Duration>) {
        self.crawl_delay_floor = floor;
    }

    pub fn latency_ema_ms(&self) -> f64 {
        self.latency_ema_ms
    }

    /// Compute the delay to apply after a request with the given status and
    /// duration, given the current frontier size. Always lands within
    /// `[min_delay, max_delay]` (floor raised by any host crawl-delay).
    pub fn next_delay(&mut self, status: u16, duration: Duration, frontier_size: u64) -> Duration {
        let success = (200..400).contains(&status);
        if success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }

        let sample_ms = if duration.as_millis() > 0 {
            duration.as_millis() as f64
        } else {
            self.config.base_delay_ms as f64
        };
        if self.latency_ema_ms == 0.0 {
            self.latency_ema_ms = sample_ms;
        } else {
            self.latency_ema_ms = self.config.latency_ema_alpha * sample_ms
                + (1.0 - self.config.latency_ema_alpha) * self.latency_ema_ms;
        }

        let queue_pressure = (frontier_size as f64 / 1000.0).min(1.0);
        let queue_adjust = 1.0 - 0.3 * queue_pressure;

        let latency_based = self.latency_ema_ms * 0.6;
        let base = (self.config.base_delay_ms as f64).max(latency_based);
        let mut delay_ms = base * queue_adjust;

        if !success {
            delay_ms += (self.config.failure_backoff_ms * self.consecutive_failures as u64) as f64;
        } else if self.consecutive_successes > 3 {
            delay_ms *= 0.8;
        }

        if self.last_delay_ms > 0 {
            delay_ms = 0.7 * self.last_delay_ms as f64 + 0.3 * delay_ms;
        }

        let floor_ms = self
            .crawl_delay_floor
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .max(self.config.min_delay_ms);
        let ceiling_ms = self.config.max_delay_ms.max(floor_ms);

        let mut delay_ms = (delay_ms as u64).clamp(floor_ms, ceiling_ms);

        let jitter_range = delay_ms * self.config.jitter_pct / 100;
        if jitter_range > 0 {
            let jitter =
                rand::thread_rng().gen_range(-(jitter_range as i64)..=jitter_range as i64);
            delay_ms = (delay_ms as i64 + jitter)
                .clamp(floor_ms as i64, ceiling_ms as i64) as u64;
        }

        self.last_delay_ms = delay_ms;
        Duration::from_millis(delay_ms)
    }

    /// Compute and sleep. No-op when adaptive delay is disabled.
    pub async fn apply(&mut self, status: u16, duration: Duration, frontier_size: u64) {
        if !self.config.enabled {
            return;
        }
        let delay = self.next_delay(status, duration, frontier_size);
        tokio::time::sleep(delay).await;
    }
}
