//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use organ_gateway::config::{FallbackOptionConfig, GatewayConfig, OrganConfig};
use organ_gateway::http::HttpServer;
use organ_gateway::lifecycle::{build_services, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A mock organ's answer to one request.
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Handle to a running mock organ.
pub struct MockOrgan {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockOrgan {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests answered so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        401 => "401 Unauthorized",
        403 => "403 Forbidden",
        404 => "404 Not Found",
        408 => "408 Request Timeout",
        422 => "422 Unprocessable Entity",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Read one HTTP/1.1 request and return its method and path.
async fn read_request(socket: &mut TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buf.len() - header_end;
    while body_read < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    Some((method, path))
}

/// Start a mock organ on an ephemeral port that answers by path.
pub async fn start_mock_organ<F>(handler: F) -> MockOrgan
where
    F: Fn(&str, &str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let handler = handler.clone();
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        let Some((method, path)) = read_request(&mut socket).await else {
                            return;
                        };
                        counter.fetch_add(1, Ordering::SeqCst);
                        let reply = handler(&method, &path);
                        if !reply.delay.is_zero() {
                            tokio::time::sleep(reply.delay).await;
                        }
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(reply.status),
                            reply.body.len(),
                            reply.body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockOrgan { addr, hits }
}

/// Start a mock organ that always answers the same way.
pub async fn start_fixed_organ(status: u16, body: &'static str) -> MockOrgan {
    start_mock_organ(move |_, _| Reply::json(status, body)).await
}

pub fn organ(name: &str, mock: &MockOrgan) -> OrganConfig {
    OrganConfig {
        name: name.to_string(),
        base_url: mock.base_url(),
        health_path: "/health".to_string(),
    }
}

/// Config with no default plans, no health loop and no metrics exporter.
pub fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.fallback_plans.clear();
    config.health_check.enabled = false;
    config.observability.metrics_enabled = false;
    config.timeouts.dispatch_secs = 1;
    config.timeouts.probe_secs = 1;
    config
}

pub fn secondary(target: &str) -> FallbackOptionConfig {
    FallbackOptionConfig::Secondary {
        target: target.to_string(),
        description: format!("{} fallback", target),
    }
}

pub fn cached() -> FallbackOptionConfig {
    FallbackOptionConfig::Cached {
        description: "Use cached results".to_string(),
    }
}

/// Serve `config` on an ephemeral port. The server stops when the returned
/// [`Shutdown`] fires or is dropped.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let services = build_services(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(services.app_state());
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    (addr, shutdown)
}
