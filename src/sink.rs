//! Output sinks: batched dataset files plus an optional ClickHouse-style
//! metrics endpoint.
//!
//! The engine never writes files itself; it sends events through a channel
//! to a sink task that owns the dataset writer and the metrics client. Sink
//! failures are logged and never abort the crawl.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ClickHouseSection;
use crate::models::{DataRecord, FetchMetric, LinkEdge};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("metrics endpoint error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
    Both,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    fn wants_json(self) -> bool {
        matches!(self, Self::Json | Self::Both)
    }

    fn wants_csv(self) -> bool {
        matches!(self, Self::Csv | Self::Both)
    }
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub format: OutputFormat,
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub clickhouse: Option<ClickHouseSection>,
}

#[derive(Debug)]
pub enum SinkEvent {
    Record(DataRecord),
    Edge(LinkEdge),
    Metric(FetchMetric),
}

/// Cloneable handle the engine (and tests) write through.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkHandle {
    pub fn record(&self, record: DataRecord) {
        let _ = self.tx.send(SinkEvent::Record(record));
    }

    pub fn edge(&self, edge: LinkEdge) {
        let _ = self.tx.send(SinkEvent::Edge(edge));
    }

    pub fn metric(&self, metric: FetchMetric) {
        let _ = self.tx.send(SinkEvent::Metric(metric));
    }
}

/// Start the sink task. Dropping every `SinkHandle` closes the channel;
/// awaiting the returned join handle then guarantees all batches are on
/// disk.
pub fn spawn_sink(
    config: SinkConfig,
) -> Result<(SinkHandle, tokio::task::JoinHandle<()>), SinkError> {
    std::fs::create_dir_all(&config.output_dir)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_sink(config, rx));
    Ok((SinkHandle { tx }, task))
}

async fn run_sink(config: SinkConfig, mut rx: mpsc::UnboundedReceiver<SinkEvent>) {
    let mut writer = DatasetWriter::new(config.format, config.output_dir.clone(), config.batch_size);
    let clickhouse = config
        .clickhouse
        .filter(|section| section.enabled)
        .and_then(|section| match ClickHouseClient::new(section) {
            Ok(client) => Some(client),
            Err(error) => {
                tracing::warn!("ClickHouse client unavailable: {}", error);
                None
            }
        });

    while let Some(event) = rx.recv().await {
        match event {
            SinkEvent::Record(record) => {
                if let Err(error) = writer.push(record) {
                    tracing::error!("Failed to write dataset batch: {}", error);
                }
            }
            SinkEvent::Edge(edge) => {
                if let Some(client) = &clickhouse {
                    if let Err(error) = client.insert_link_edge(&edge).await {
                        tracing::warn!("ClickHouse: link edge insert failed: {}", error);
                    }
                }
            }
            SinkEvent::Metric(metric) => {
                if let Some(client) = &clickhouse {
                    if let Err(error) = client.insert_request_metric(&metric).await {
                        tracing::warn!("ClickHouse: metric insert failed: {}", error);
                    }
                }
            }
        }
    }

    if let Err(error) = writer.flush() {
        tracing::error!("Failed to flush final dataset batch: {}", error);
    }
}

/// Batched JSON/CSV dataset files: `dataset_0001.json`, `dataset_0001.csv`,
/// and so on, one pair per batch.
struct DatasetWriter {
    format: OutputFormat,
    output_dir: PathBuf,
    batch_size: usize,
    pending: Vec<DataRecord>,
    batch_index: u32,
    records_written: u64,
}

impl DatasetWriter {
    fn new(format: OutputFormat, output_dir: PathBuf, batch_size: usize) -> Self {
        Self {
            format,
            output_dir,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            batch_index: 0,
            records_written: 0,
        }
    }

    fn push(&mut self, record: DataRecord) -> Result<(), SinkError> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.write_batch()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if !self.pending.is_empty() {
            self.write_batch()?;
        }
        Ok(())
    }

    fn write_batch(&mut self) -> Result<(), SinkError> {
        self.batch_index += 1;
        let records = std::mem::take(&mut self.pending);

        if self.format.wants_json() {
            let path = self
                .output_dir
                .join(format!("dataset_{:04}.json", self.batch_index));
            self.write_json(&path, &records)?;
            tracing::info!("Wrote {} records to {}", records.len(), path.display());
        }
        if self.format.wants_csv() {
            let path = self
                .output_dir
                .join(format!("dataset_{:04}.csv", self.batch_index));
            self.write_csv(&path, &records)?;
            tracing::info!("Wrote {} records to {}", records.len(), path.display());
        }

        self.records_written += records.len() as u64;
        Ok(())
    }

    fn write_json(&self, path: &std::path::Path, records: &[DataRecord]) -> Result<(), SinkError> {
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                json!({
                    "url": record.url,
                    "title": record.title,
                    "content_length": record.length,
                    "timestamp": record.fetched_at,
                    "status_code": record.status,
                })
            })
            .collect();

        let mut file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(&mut file, &rows)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    fn write_csv(&self, path: &std::path::Path, records: &[DataRecord]) -> Result<(), SinkError> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "url,title,content_length,timestamp,status_code")?;
        for record in records {
            writeln!(
                file,
                "{},{},{},{},{}",
                csv_escape(&record.url),
                csv_escape(&record.title),
                record.length,
                csv_escape(&record.fetched_at),
                record.status,
            )?;
        }
        Ok(())
    }
}

fn csv_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\"\""),
            '\n' | '\r' => escaped.push(' '),
            other => escaped.push(other),
        }
    }
    escaped.push('"');
    escaped
}

/// Thin client for a ClickHouse-compatible HTTP interface: one POST per
/// row with the INSERT query in the URL query string.
struct ClickHouseClient {
    http: reqwest::Client,
    section: ClickHouseSection,
}

impl ClickHouseClient {
    fn new(section: ClickHouseSection) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(section.timeout_seconds))
            .build()?;
        Ok(Self { http, section })
    }

    async fn insert_request_metric(&self, metric: &FetchMetric) -> Result<(), SinkError> {
        let query = format!(
            "INSERT INTO {}.{} FORMAT JSONEachRow",
            self.section.database, self.section.metrics_table
        );
        let payload = serde_json::to_string(metric)?;
        self.perform_insert(&query, payload).await
    }

    async fn insert_link_edge(&self, edge: &LinkEdge) -> Result<(), SinkError> {
        let query = format!(
            "INSERT INTO {}.{} FORMAT JSONEachRow",
            self.section.database, self.section.link_graph_table
        );
        let payload = serde_json::to_string(edge)?;
        self.perform_insert(&query, payload).await
    }

    async fn perform_insert(&self, query: &str, mut payload: String) -> Result<(), SinkError> {
        payload.push('\n');

        let endpoint = self.section.endpoint.trim_end_matches('/');
        let url = format!(
            "{}/?query={}",
            endpoint,
            utf8_percent_encode(query, NON_ALPHANUMERIC)
        );

        let mut request = self.http.post(url).body(payload);
        if !self.section.user.is_empty() {
            request = request.basic_auth(&self.section.user, Some(&self.section.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            tracing::warn!("ClickHouse: insert returned {}", response.status());
        }
        Ok(())
    }
}
