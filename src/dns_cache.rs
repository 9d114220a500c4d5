//! TTL'd DNS resolution cache.
//!
//! Resolution happens with the blocking system resolver on a miss; entries
//! expire lazily at lookup time.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct CachedAddr {
    addr: SocketAddr,
    resolved_at: Instant,
}

/// Thread-safe host:port -> socket address cache.
#[derive(Debug)]
pub struct DnsCache {
    entries: Mutex<HashMap<String, CachedAddr>>,
    ttl: Duration,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve a host and port, consulting the cache first. The first
    /// address returned by the resolver is stored.
    pub fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        let key = format!("{}:{}", host, port);

        if let Some(cached) = self.entries.lock().get(&key) {
            if cached.resolved_at.elapsed() < self.ttl {
                return Ok(cached.addr);
            }
        }

        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", key),
                )
            })?;

        self.entries.lock().insert(
            key,
            CachedAddr {
                addr,
                resolved_at: Instant::now(),
            },
        );

        Ok(addr)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}
