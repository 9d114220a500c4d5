//! Raw HTTP/1.1 fetcher over non-blocking sockets.
//!
//! Each fetch is a cooperative task that resolves the host through the DNS
//! cache, connects, writes a minimal HTTP/1.1 request, and reads the
//! response, suspending at every connect/write/read (and TLS I/O) point.
//! Body framing follows chunked transfer encoding, then Content-Length,
//! then read-to-close. Transport failures are retried with linear backoff;
//! HTTP status codes are returned as successful fetches, whatever they are.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::dns_cache::DnsCache;
use crate::url_utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Http2,
    Unknown,
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Http2 => "HTTP/2",
            HttpVersion::Unknown => "HTTP/?.?",
        };
        write!(f, "{}", text)
    }
}

fn parse_http_version(status_line: &str) -> HttpVersion {
    if status_line.starts_with("HTTP/1.0") {
        HttpVersion::Http10
    } else if status_line.starts_with("HTTP/1.1") {
        HttpVersion::Http11
    } else if status_line.starts_with("HTTP/2") {
        HttpVersion::Http2
    } else {
        HttpVersion::Unknown
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("invalid HTTP response")]
    InvalidResponse,
    #[error("raw socket fetch timeout")]
    Timeout,
    #[error("redirect limit exceeded after {0} redirects")]
    TooManyRedirects(u32),
}

/// A completed HTTP exchange. Non-2xx statuses are still successful
/// fetches; only transport failures surface as `FetchError`.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub http_version: HttpVersion,
    pub final_url: String,
    pub redirects: u32,
    pub location: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verify_certificates: bool,
    pub headers: BTreeMap<String, String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "DatasetCrawler/1.0".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
            follow_redirects: true,
            max_redirects: 5,
            verify_certificates: false,
            headers: BTreeMap::new(),
        }
    }
}

pub struct Fetcher {
    config: FetcherConfig,
    dns: Arc<DnsCache>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig, dns: Arc<DnsCache>) -> Self {
        Self { config, dns }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch a URL, following redirects and retrying transport failures.
    /// The measured duration covers the whole attempt chain and is what
    /// politeness and metrics consume.
    pub async fn fetch(&self, url: &str) -> (Result<Response, FetchError>, Duration) {
        let start = Instant::now();
        let result = self.fetch_with_retries(url).await;
        (result, start.elapsed())
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<Response, FetchError> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = FetchError::Timeout;

        for attempt in 0..attempts {
            if attempt > 0 {
                // Linear backoff: base, 2*base, 3*base, ...
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }

            // The timeout bounds the whole attempt, redirect hops included.
            match tokio::time::timeout(self.config.timeout, self.fetch_chain(url)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(error)) => last_error = error,
                Err(_) => last_error = FetchError::Timeout,
            }
        }

        Err(last_error)
    }

    /// Follow a redirect chain. Redirect hops share the caller's retry
    /// budget rather than getting their own.
    async fn fetch_chain(&self, url: &str) -> Result<Response, FetchError> {
        let mut current = url.to_string();
        let mut redirects: u32 = 0;

        loop {
            let mut response = self.fetch_inner(&current).await?;
            response.final_url = current.clone();
            response.redirects = redirects;

            let is_redirect = matches!(response.status, 301 | 302 | 303 | 307 | 308);
            if self.config.follow_redirects && is_redirect {
                if let Some(location) = response.location.clone() {
                    if redirects >= self.config.max_redirects {
                        return Err(FetchError::TooManyRedirects(redirects));
                    }
                    let next = url_utils::resolve(&current, &location)
                        .ok_or_else(|| FetchError::UnsupportedUrl(location.clone()))?;
                    tracing::warn!("\"{}\" has been redirected to \"{}\"", current, next);
                    current = next;
                    redirects += 1;
                    continue;
                }
            }

            return Ok(response);
        }
    }

    /// One request/response exchange against one origin.
    async fn fetch_inner(&self, url: &str) -> Result<Response, FetchError> {
        let parsed =
            url_utils::parse(url).ok_or_else(|| FetchError::UnsupportedUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::UnsupportedUrl(url.to_string()))?
            .to_string();
        let tls = parsed.scheme() == "https";
        let port = parsed.port().unwrap_or(if tls { 443 } else { 80 });

        let addr = self
            .dns
            .resolve(&host, port)
            .map_err(|e| FetchError::Dns(e.to_string()))?;

        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| FetchError::Connect(e.to_string()))?;

        let host_header = match parsed.port() {
            Some(explicit) => format!("{}:{}", host, explicit),
            None => host.clone(),
        };
        let request = self.build_request(&host_header, &url_utils::path_and_query(url));

        if tls {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(!self.config.verify_certificates)
                .danger_accept_invalid_hostnames(!self.config.verify_certificates)
                .build()
                .map_err(|e| FetchError::Tls(e.to_string()))?;
            let connector = tokio_native_tls::TlsConnector::from(connector);
            let mut tls_stream = connector
                .connect(&host, stream)
                .await
                .map_err(|e| FetchError::Tls(e.to_string()))?;
            self.exchange(&mut tls_stream, &request).await
        } else {
            self.exchange(&mut stream, &request).await
        }
    }

    fn build_request(&self, host_header: &str, path: &str) -> Vec<u8> {
        let mut request = String::new();
        request.push_str(&format!("GET {} HTTP/1.1\r\n", path));
        request.push_str(&format!("Host: {}\r\n", host_header));
        request.push_str("Connection: keep-alive\r\n");
        request.push_str(&format!("User-Agent: {}\r\n", self.config.user_agent));
        for (key, value) in &self.config.headers {
            request.push_str(&format!("{}: {}\r\n", key, value));
        }
        request.push_str("\r\n");
        request.into_bytes()
    }

    /// Send the request and read the response off any byte stream
    /// (plaintext TCP or a TLS session).
    async fn exchange<S>(&self, stream: &mut S, request: &[u8]) -> Result<Response, FetchError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream
            .write_all(request)
            .await
            .map_err(|e| FetchError::Socket(e.to_string()))?;

        // Accumulate until the header terminator shows up.
        let mut buffer: Vec<u8> = Vec::with_capacity(8192);
        let header_end = loop {
            if let Some(pos) = find_subsequence(&buffer, b"\r\n\r\n") {
                break pos;
            }
            let mut chunk = [0u8; 4096];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| FetchError::Socket(e.to_string()))?;
            if n == 0 {
                return Err(FetchError::InvalidResponse);
            }
            buffer.extend_from_slice(&chunk[..n]);
        };

        let header_block = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
        let mut lines = header_block.lines();
        let status_line = lines.next().ok_or(FetchError::InvalidResponse)?;

        let http_version = parse_http_version(status_line);
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or(FetchError::InvalidResponse)?;

        let mut content_type = None;
        let mut content_length: Option<usize> = None;
        let mut chunked = false;
        let mut location = None;

        for line in lines {
            let (key, value) = match line.split_once(':') {
                Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
                None => continue,
            };
            match key.as_str() {
                "content-type" => content_type = Some(value.to_string()),
                "content-length" => content_length = value.parse().ok(),
                "transfer-encoding" => {
                    chunked = value.to_ascii_lowercase().contains("chunked");
                }
                "location" => location = Some(value.to_string()),
                _ => {}
            }
        }

        let pending = buffer[header_end + 4..].to_vec();
        let body = if chunked {
            self.read_chunked(stream, pending).await?
        } else if let Some(length) = content_length {
            self.read_exact_length(stream, pending, length).await?
        } else {
            self.read_to_close(stream, pending).await?
        };

        Ok(Response {
            status,
            body,
            content_type,
            http_version,
            final_url: String::new(),
            redirects: 0,
            location,
        })
    }

    /// Decode hex-length chunks until the zero-length terminator. Trailer
    /// headers after the last chunk are ignored.
    async fn read_chunked<S>(
        &self,
        stream: &mut S,
        mut pending: Vec<u8>,
    ) -> Result<Vec<u8>, FetchError>
    where
        S: AsyncRead + Unpin,
    {
        let mut decoded = Vec::new();

        loop {
            let size_line = read_line(stream, &mut pending).await?;
            let size_text = size_line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_text, 16)
                .map_err(|_| FetchError::InvalidResponse)?;
            if size == 0 {
                break;
            }

            while pending.len() < size + 2 {
                let mut chunk = [0u8; 4096];
                let n = stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| FetchError::Socket(e.to_string()))?;
                if n == 0 {
                    return Err(FetchError::InvalidResponse);
                }
                pending.extend_from_slice(&chunk[..n]);
            }

            decoded.extend_from_slice(&pending[..size]);
            // Drop the chunk data plus its trailing CRLF.
            pending.drain(..size + 2);
        }

        Ok(decoded)
    }

    async fn read_exact_length<S>(
        &self,
        stream: &mut S,
        mut body: Vec<u8>,
        length: usize,
    ) -> Result<Vec<u8>, FetchError>
    where
        S: AsyncRead + Unpin,
    {
        while body.len() < length {
            let mut chunk = [0u8; 4096];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| FetchError::Socket(e.to_string()))?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(length);
        Ok(body)
    }

    async fn read_to_close<S>(
        &self,
        stream: &mut S,
        mut body: Vec<u8>,
    ) -> Result<Vec<u8>, FetchError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            let mut chunk = [0u8; 4096];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| FetchError::Socket(e.to_string()))?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

async fn read_line<S>(stream: &mut S, pending: &mut Vec<u8>) -> Result<String, FetchError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = find_subsequence(pending, b"\r\n") {
            let line = String::from_utf8_lossy(&pending[..pos]).into_owned();
            pending.drain(..pos + 2);
            return Ok(line);
        }
        let mut chunk = [0u8; 4096];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| FetchError::Socket(e.to_string()))?;
        if n == 0 {
            return Err(FetchError::InvalidResponse);
        }
        pending.extend_from_slice(&chunk[..n]);
    }
}
