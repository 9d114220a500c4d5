//! Admission endpoint: a minimal HTTP listener that feeds URLs into the
//! frontier while the engine runs.
//!
//! Runs on its own thread and talks to the engine solely through
//! `Frontier::enqueue`, which serializes writers internally. The accept
//! loop polls the process stop flag.

use percent_encoding::percent_decode_str;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::frontier::Frontier;
use crate::url_utils;

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Running admission listener; joins its thread on `shutdown`.
pub struct AdmissionServer {
    local_addr: std::net::SocketAddr,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl AdmissionServer {
    /// Bind and start serving. URLs are canonicalized and enqueued at seed
    /// priority.
    pub fn spawn(
        bind_address: &str,
        port: u16,
        frontier: Arc<Frontier>,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((bind_address, port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let handle = std::thread::Builder::new()
            .name("admission".to_string())
            .spawn(move || accept_loop(listener, frontier, stop))?;

        tracing::info!("Admission endpoint listening on {}", local_addr);
        Ok(Self {
            local_addr,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Wait for the accept loop to observe the stop flag and exit.
    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, frontier: Arc<Frontier>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((mut connection, _peer)) => {
                let _ = connection.set_nonblocking(false);
                let _ = connection.set_read_timeout(Some(Duration::from_millis(500)));
                handle_connection(&mut connection, &frontier);
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(error) => {
                tracing::warn!("Admission accept error: {}", error);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn handle_connection(connection: &mut TcpStream, frontier: &Frontier) {
    let request = match read_request(connection) {
        Some(request) => request,
        None => {
            respond(connection, 400, "missing url\n");
            return;
        }
    };

    let admitted = parse_enqueue_url(&request.method, &request.target, &request.body)
        .and_then(|raw| url_utils::normalize(&raw));

    match admitted {
        Some(url) => match frontier.enqueue(&url, 0) {
            Ok(true) => {
                tracing::info!("Admitted {}", url);
                respond(connection, 200, "queued\n");
            }
            Ok(false) => respond(connection, 400, "missing url\n"),
            Err(error) => {
                tracing::error!("Failed to enqueue admitted URL {}: {}", url, error);
                respond(connection, 400, "missing url\n");
            }
        },
        None => respond(connection, 400, "missing url\n"),
    }
}

struct RawRequest {
    method: String,
    target: String,
    body: String,
}

fn read_request(connection: &mut TcpStream) -> Option<RawRequest> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
        {
            break pos;
        }
        if buffer.len() > MAX_REQUEST_BYTES {
            return None;
        }
        match connection.read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(_) => return None,
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let content_length = content_length.min(MAX_REQUEST_BYTES);

    let mut body_bytes = buffer[header_end + 4..].to_vec();
    while body_bytes.len() < content_length {
        match connection.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => body_bytes.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    body_bytes.truncate(content_length);

    Some(RawRequest {
        method,
        target,
        body: String::from_utf8_lossy(&body_bytes).into_owned(),
    })
}

/// Pull the URL out of an `/enqueue` request: the `url` query parameter on
/// GET, or a form field, JSON object, or bare URL body on POST.
pub fn parse_enqueue_url(method: &str, target: &str, body: &str) -> Option<String> {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    if path != "/enqueue" {
        return None;
    }

    match method {
        "GET" => query.and_then(find_url_param),
        "POST" => {
            let body = body.trim();
            if body.starts_with('{') {
                let value: serde_json::Value = serde_json::from_str(body).ok()?;
                value.get("url")?.as_str().map(|s| s.to_string())
            } else if body.starts_with("http") {
                Some(body.to_string())
            } else {
                find_url_param(body)
            }
        }
        _ => None,
    }
}

fn find_url_param(query: &str) -> Option<String> {
    for pair in query.split('&') {
        if let Some(encoded) = pair.strip_prefix("url=") {
            let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
            if !decoded.is_empty() {
                return Some(decoded.into_owned());
            }
        }
    }
    None
}

fn respond(connection: &mut TcpStream, status: u16, body: &str) {
    let reason = if status == 200 { "OK" } else { "Bad Request" };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = connection.write_all(response.as_bytes());
}
