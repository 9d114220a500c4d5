//! Persistent frontier: priority FIFO queue, visited set, and link graph.
//!
//! All three live in one sled tree under distinct key namespaces. Every
//! mutation is flushed before the call returns, so a crash leaves the
//! frontier consistent: a dequeued URL has either been marked visited or is
//! still in the queue. One writer at a time; reads are lock-free.

use parking_lot::Mutex;
use sled::Db;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontierError {
    #[error("frontier database error: {0}")]
    Database(#[from] sled::Error),
    #[error("frontier key corrupt: {0}")]
    Corrupt(String),
}

const QUEUE_ITEM_PREFIX: &str = "queue:item:";
const QUEUE_SIZE_KEY: &str = "queue:size";
const VISITED_PREFIX: &str = "visited:";
const GRAPH_PREFIX: &str = "graph:";

/// Queue item key. Priority is zero-padded to 4 digits and sequence to 12
/// so that byte-ordered key iteration equals (priority ASC, seq ASC); the
/// dequeue scan depends on this.
fn queue_item_key(priority: u16, seq: u64) -> String {
    format!("{}{:04}:{:012}", QUEUE_ITEM_PREFIX, priority, seq)
}

fn queue_tail_key(priority: u16) -> String {
    format!("queue:tail:{:04}", priority)
}

fn visited_key(url: &str) -> String {
    format!("{}{}", VISITED_PREFIX, url)
}

fn graph_key(from: &str, to: &str) -> String {
    format!("{}{}->{}", GRAPH_PREFIX, from, to)
}

/// Persistent crawl frontier backed by sled.
pub struct Frontier {
    db: Db,
    write_lock: Mutex<()>,
}

impl Frontier {
    /// Open (or create) the frontier at the given directory. Reopening a
    /// directory from a previous run resumes with its remaining queue.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, FrontierError> {
        let db = sled::open(data_dir)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn read_counter(&self, key: &str) -> Result<u64, FrontierError> {
        match self.db.get(key.as_bytes())? {
            Some(raw) => {
                let text = std::str::from_utf8(&raw)
                    .map_err(|_| FrontierError::Corrupt(key.to_string()))?;
                text.parse::<u64>()
                    .map_err(|_| FrontierError::Corrupt(key.to_string()))
            }
            None => Ok(0),
        }
    }

    fn write_counter(&self, key: &str, value: u64) -> Result<(), FrontierError> {
        self.db.insert(key.as_bytes(), value.to_string().as_bytes())?;
        Ok(())
    }

    /// Append a URL to the queue at the given priority. Returns `false`
    /// (without storing anything) when the URL is not an absolute http(s)
    /// URL.
    pub fn enqueue(&self, url: &str, priority: u16) -> Result<bool, FrontierError> {
        if !crate::url_utils::is_http(url) {
            return Ok(false);
        }

        let _guard = self.write_lock.lock();

        let tail_key = queue_tail_key(priority);
        let seq = self.read_counter(&tail_key)?;

        self.db
            .insert(queue_item_key(priority, seq).as_bytes(), url.as_bytes())?;
        self.write_counter(&tail_key, seq + 1)?;

        let size = self.read_counter(QUEUE_SIZE_KEY)?;
        self.write_counter(QUEUE_SIZE_KEY, size + 1)?;

        self.db.flush()?;
        Ok(true)
    }

    /// Remove and return the frontmost URL: lowest priority number first,
    /// FIFO within a priority.
    pub fn dequeue(&self) -> Result<Option<String>, FrontierError> {
        let _guard = self.write_lock.lock();

        let first = match self.db.scan_prefix(QUEUE_ITEM_PREFIX.as_bytes()).next() {
            Some(entry) => entry?,
            None => return Ok(None),
        };
        let (key, value) = first;

        let url = String::from_utf8(value.to_vec())
            .map_err(|_| FrontierError::Corrupt("queue item value".to_string()))?;

        self.db.remove(&key)?;

        let size = self.read_counter(QUEUE_SIZE_KEY)?;
        self.write_counter(QUEUE_SIZE_KEY, size.saturating_sub(1))?;

        self.db.flush()?;
        Ok(Some(url))
    }

    /// Number of queued URLs.
    pub fn size(&self) -> u64 {
        self.read_counter(QUEUE_SIZE_KEY).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Record a URL as visited. Membership is monotonic for the lifetime of
    /// the stored directory.
    pub fn mark_visited(&self, url: &str) -> Result<(), FrontierError> {
        let _guard = self.write_lock.lock();
        self.db.insert(visited_key(url).as_bytes(), b"1")?;
        self.db.flush()?;
        Ok(())
    }

    pub fn is_visited(&self, url: &str) -> Result<bool, FrontierError> {
        Ok(self.db.contains_key(visited_key(url).as_bytes())?)
    }

    /// Record a discovered link edge.
    pub fn add_edge(&self, from: &str, to: &str) -> Result<(), FrontierError> {
        let _guard = self.write_lock.lock();
        self.db.insert(graph_key(from, to).as_bytes(), b"1")?;
        self.db.flush()?;
        Ok(())
    }

    pub fn visited_count(&self) -> u64 {
        self.db.scan_prefix(VISITED_PREFIX.as_bytes()).count() as u64
    }

    pub fn edge_count(&self) -> u64 {
        self.db.scan_prefix(GRAPH_PREFIX.as_bytes()).count() as u64
    }

    pub fn flush(&self) -> Result<(), FrontierError> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for Frontier {
    fn drop(&mut self) {
        let _ = self.db.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Frontier) {
        let dir = TempDir::new().unwrap();
        let frontier = Frontier::open(dir.path()).unwrap();
        (dir, frontier)
    }

    #[test]
    fn test_enqueue_dequeue_fifo() {
        let (_dir, frontier) = open_temp();

        assert!(frontier.enqueue("https://a.test/1", 1).unwrap());
        assert!(frontier.enqueue("https://a.test/2", 1).unwrap());
        assert!(frontier.enqueue("https://a.test/3", 1).unwrap());
        assert_eq!(frontier.size(), 3);

        assert_eq!(frontier.dequeue().unwrap().unwrap(), "https://a.test/1");
        assert_eq!(frontier.dequeue().unwrap().unwrap(), "https://a.test/2");
        assert_eq!(frontier.dequeue().unwrap().unwrap(), "https://a.test/3");
        assert_eq!(frontier.dequeue().unwrap(), None);
        assert_eq!(frontier.size(), 0);
    }

    #[test]
    fn test_lower_priority_number_dequeues_first() {
        let (_dir, frontier) = open_temp();

        frontier.enqueue("https://a.test/discovered", 1).unwrap();
        frontier.enqueue("https://a.test/seed", 0).unwrap();
        frontier.enqueue("https://a.test/discovered2", 1).unwrap();

        assert_eq!(frontier.dequeue().unwrap().unwrap(), "https://a.test/seed");
        assert_eq!(
            frontier.dequeue().unwrap().unwrap(),
            "https://a.test/discovered"
        );
        assert_eq!(
            frontier.dequeue().unwrap().unwrap(),
            "https://a.test/discovered2"
        );
    }

    #[test]
    fn test_malformed_url_rejected() {
        let (_dir, frontier) = open_temp();
        assert!(!frontier.enqueue("not a url", 0).unwrap());
        assert!(!frontier.enqueue("ftp://a.test/x", 0).unwrap());
        assert_eq!(frontier.size(), 0);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let frontier = Frontier::open(dir.path()).unwrap();
            frontier.enqueue("https://a.test/u1", 0).unwrap();
            frontier.enqueue("https://a.test/u2", 0).unwrap();
        }

        let frontier = Frontier::open(dir.path()).unwrap();
        assert_eq!(frontier.size(), 2);
        assert_eq!(frontier.dequeue().unwrap().unwrap(), "https://a.test/u1");
        assert_eq!(frontier.dequeue().unwrap().unwrap(), "https://a.test/u2");
    }

    #[test]
    fn test_visited_set_monotonic() {
        let (_dir, frontier) = open_temp();

        assert!(!frontier.is_visited("https://a.test/").unwrap());
        frontier.mark_visited("https://a.test/").unwrap();
        assert!(frontier.is_visited("https://a.test/").unwrap());
        // Re-marking stays visited
        frontier.mark_visited("https://a.test/").unwrap();
        assert!(frontier.is_visited("https://a.test/").unwrap());
        assert_eq!(frontier.visited_count(), 1);
    }

    #[test]
    fn test_visited_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let frontier = Frontier::open(dir.path()).unwrap();
            frontier.mark_visited("https://a.test/page").unwrap();
        }
        let frontier = Frontier::open(dir.path()).unwrap();
        assert!(frontier.is_visited("https://a.test/page").unwrap());
    }

    #[test]
    fn test_link_graph_edges() {
        let (_dir, frontier) = open_temp();

        frontier.add_edge("https://a.test/", "https://a.test/x").unwrap();
        frontier.add_edge("https://a.test/", "https://a.test/y").unwrap();
        // Duplicate edge overwrites, not duplicates
        frontier.add_edge("https://a.test/", "https://a.test/x").unwrap();
        assert_eq!(frontier.edge_count(), 2);
    }

    #[test]
    fn test_sequence_padding_keeps_order_past_ten() {
        let (_dir, frontier) = open_temp();

        for i in 0..12 {
            frontier
                .enqueue(&format!("https://a.test/{}", i), 1)
                .unwrap();
        }
        for i in 0..12 {
            assert_eq!(
                frontier.dequeue().unwrap().unwrap(),
                format!("https://a.test/{}", i)
            );
        }
    }
}
