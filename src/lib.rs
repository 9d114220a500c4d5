pub mod admission;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod dns_cache;
pub mod engine;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod politeness;
pub mod robots;
pub mod sink;
pub mod url_utils;

// Re-export main types for library usage
pub use admission::AdmissionServer;
pub use config::CrawlerConfig;
pub use dedup::Deduper;
pub use dns_cache::DnsCache;
pub use engine::{CrawlEngine, EngineConfig};
pub use fetcher::{FetchError, Fetcher, FetcherConfig, HttpVersion, Response};
pub use frontier::{Frontier, FrontierError};
pub use metrics::{Counters, CrawlerStats, StatsReporter};
pub use models::{DataRecord, FetchMetric, LinkEdge};
pub use politeness::{Politeness, PolitenessConfig};
pub use robots::{HostRules, RobotsCache};
pub use sink::{spawn_sink, OutputFormat, SinkConfig, SinkHandle};
