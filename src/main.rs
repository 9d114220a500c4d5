use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dataset_crawler::cli::Cli;
use dataset_crawler::config::CrawlerConfig;
use dataset_crawler::engine::{CrawlEngine, EngineConfig};
use dataset_crawler::fetcher::{Fetcher, FetcherConfig};
use dataset_crawler::metrics::{Counters, StatsReporter};
use dataset_crawler::politeness::{Politeness, PolitenessConfig};
use dataset_crawler::robots::RobotsCache;
use dataset_crawler::sink::{spawn_sink, OutputFormat, SinkConfig};
use dataset_crawler::{logging, AdmissionServer, Deduper, DnsCache, Frontier};

// One engine, one thread: the crawl loop, fetch tasks, and sinks all
// cooperate on a current-thread runtime. Only the admission endpoint and
// the stats reporter get threads of their own.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse_args();
    logging::init_logging();

    let mut config = if Path::new(&cli.config).exists() {
        match CrawlerConfig::load(&cli.config) {
            Ok(config) => {
                tracing::info!(
                    "Loaded configuration from {} with {} URLs",
                    cli.config,
                    config.urls.len()
                );
                config
            }
            Err(error) => {
                tracing::error!("Failed to load configuration: {}", error);
                return 1;
            }
        }
    } else {
        CrawlerConfig::default()
    };
    cli.apply_overrides(&mut config);

    if let Err(error) = config.validate() {
        tracing::error!("Fatal error: {}", error);
        return 1;
    }

    tracing::info!("=== Dataset Crawler ===");
    tracing::info!(
        "Configuration: {} URLs, timeout: {}s, robots.txt: {}, meta-tags: {}, dedup: {}",
        config.urls.len(),
        config.crawler.timeout_seconds,
        if config.crawler.respect_robots_txt { "YES" } else { "NO" },
        if config.crawler.respect_meta_tags { "YES" } else { "NO" },
        if config.dedup.enable_deduplication { "YES" } else { "NO" },
    );

    let frontier = match Frontier::open(&config.data_dir) {
        Ok(frontier) => Arc::new(frontier),
        Err(error) => {
            tracing::error!("Fatal error: failed to open frontier: {}", error);
            return 1;
        }
    };

    // Validated, so the unwrap_or is never taken.
    let format = OutputFormat::from_name(&config.output.format).unwrap_or(OutputFormat::Json);
    let (sink, sink_task) = match spawn_sink(SinkConfig {
        format,
        output_dir: config.output.output_dir.clone().into(),
        batch_size: config.output.batch_size,
        clickhouse: Some(config.clickhouse.clone()),
    }) {
        Ok(parts) => parts,
        Err(error) => {
            tracing::error!("Fatal error: output directory unusable: {}", error);
            return 1;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(Arc::clone(&stop));

    let admission = if config.api.enabled {
        match AdmissionServer::spawn(
            &config.api.bind_address,
            config.api.port,
            Arc::clone(&frontier),
            Arc::clone(&stop),
        ) {
            Ok(server) => Some(server),
            Err(error) => {
                tracing::error!("Fatal error: failed to bind admission endpoint: {}", error);
                return 1;
            }
        }
    } else {
        None
    };

    let counters = Arc::new(Counters::new());
    let reporter = if config.crawler.enable_periodic_stats {
        Some(StatsReporter::spawn(Arc::clone(&counters)))
    } else {
        None
    };

    let fetcher = Fetcher::new(
        FetcherConfig {
            user_agent: config.crawler.user_agent.clone(),
            timeout: Duration::from_secs(config.crawler.timeout_seconds),
            max_retries: config.crawler.max_retries,
            retry_backoff: Duration::from_millis(config.crawler.retry_backoff_ms),
            follow_redirects: config.crawler.follow_redirects,
            max_redirects: config.crawler.max_redirects,
            verify_certificates: config.crawler.verify_certificates,
            headers: config.headers.clone(),
        },
        Arc::new(DnsCache::new()),
    );
    let robots = RobotsCache::new(config.crawler.user_agent.clone());
    let deduper = Deduper::new(config.dedup.simhash_threshold);
    let politeness = Politeness::new(PolitenessConfig {
        enabled: config.politeness.enable_adaptive_delay,
        min_delay_ms: config.politeness.min_delay_ms,
        max_delay_ms: config.politeness.max_delay_ms,
        base_delay_ms: config.politeness.base_delay_ms,
        latency_ema_alpha: config.politeness.latency_ema_alpha,
        failure_backoff_ms: config.politeness.failure_backoff_ms,
        jitter_pct: config.politeness.jitter_pct,
    });

    let mut engine = CrawlEngine::new(
        EngineConfig {
            respect_robots_txt: config.crawler.respect_robots_txt,
            respect_meta_tags: config.crawler.respect_meta_tags,
            enable_deduplication: config.dedup.enable_deduplication,
            max_file_size_bytes: config.max_file_size_bytes(),
        },
        Arc::clone(&frontier),
        fetcher,
        robots,
        deduper,
        politeness,
        sink,
        Arc::clone(&counters),
        Arc::clone(&stop),
    );

    // With the admission endpoint enabled, seeds come in dynamically.
    let seeds = if config.api.enabled {
        Vec::new()
    } else {
        config.urls.clone()
    };

    let stats = engine.run(&seeds, config.api.enabled).await;

    stop.store(true, Ordering::Relaxed);
    if let Some(server) = admission {
        server.shutdown();
    }
    if let Some(reporter) = reporter {
        reporter.stop();
    }

    // Dropping the engine closes the sink channel; awaiting the task
    // guarantees the final batch is on disk.
    drop(engine);
    let _ = sink_task.await;

    tracing::info!("Crawling complete. {}", stats);
    0
}

fn spawn_signal_listener(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping after current URL");
        stop.store(true, Ordering::Relaxed);
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
