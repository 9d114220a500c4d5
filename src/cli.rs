use clap::Parser;

use crate::config::CrawlerConfig;

/// Polite, persistent dataset crawler.
#[derive(Parser, Debug)]
#[command(name = "dataset-crawler")]
#[command(about = "Crawl seed URLs into a deduplicated dataset with metrics and a link graph")]
#[command(version)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: String,

    /// Seed URL(s); overrides the config seed list (repeatable)
    #[arg(short, long)]
    pub url: Vec<String>,

    /// Request timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// User agent string for requests
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Directory for dataset output files
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Directory for the persistent frontier
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Disable robots.txt compliance
    #[arg(long)]
    pub ignore_robots: bool,

    /// Enable the /enqueue admission endpoint (seed list is ignored)
    #[arg(long)]
    pub api_enabled: bool,

    /// Bind address for the admission endpoint
    #[arg(long)]
    pub api_bind: Option<String>,

    /// Port for the admission endpoint
    #[arg(long)]
    pub api_port: Option<u16>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Fold command-line overrides into a loaded configuration.
    pub fn apply_overrides(&self, config: &mut CrawlerConfig) {
        if !self.url.is_empty() {
            config.urls = self.url.clone();
        }
        if let Some(timeout) = self.timeout {
            config.crawler.timeout_seconds = timeout;
        }
        if let Some(ref user_agent) = self.user_agent {
            config.crawler.user_agent = user_agent.clone();
        }
        if let Some(ref output_dir) = self.output_dir {
            config.output.output_dir = output_dir.clone();
        }
        if let Some(ref data_dir) = self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if self.ignore_robots {
            config.crawler.respect_robots_txt = false;
        }
        if self.api_enabled {
            config.api.enabled = true;
        }
        if let Some(ref bind) = self.api_bind {
            config.api.bind_address = bind.clone();
        }
        if let Some(port) = self.api_port {
            config.api.port = port;
        }
    }
}
