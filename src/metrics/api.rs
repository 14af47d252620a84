//! HTTP API for pool monitoring
//!
//! Provides JSON endpoints for viewing bucket state and counters.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::counters::CounterSnapshot;
use crate::allocator::PoolRegistry;

/// API response for /stats endpoint
#[derive(Serialize)]
struct StatsResponse {
    enabled: bool,
    worker_running: bool,
    pools: usize,
    cached_blocks: usize,
    cached_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    totals: Option<CounterSnapshot>,
}

/// Start the pool API server
///
/// This runs a simple HTTP server that responds to:
/// - GET /pools - Every bucket with watermarks, count and counters (JSON)
/// - GET /pools.txt - Same data as plain text
/// - GET /stats - Aggregate figures
pub fn start_api_server(addr: SocketAddr, registry: Arc<PoolRegistry>) {
    thread::spawn(move || {
        if let Err(e) = run_api_server(addr, registry) {
            error!(error = %e, "API server error");
        }
    });
    info!(%addr, "Pool API server started");
}

fn run_api_server(addr: SocketAddr, registry: Arc<PoolRegistry>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let registry = registry.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_request(stream, &registry) {
                        debug!(error = %e, "Request handling error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }

    Ok(())
}

fn stats(registry: &PoolRegistry) -> StatsResponse {
    let dump = registry.dump();
    let cached_blocks = dump.buckets.iter().map(|b| b.stats.count).sum();
    let cached_bytes = dump
        .buckets
        .iter()
        .map(|b| b.stats.count * b.block_size)
        .sum();
    let totals = dump
        .buckets
        .iter()
        .filter_map(|b| b.counters)
        .reduce(|mut acc, c| {
            acc.merge(&c);
            acc
        });

    StatsResponse {
        enabled: dump.enabled,
        worker_running: dump.worker_running,
        pools: registry.pools().len(),
        cached_blocks,
        cached_bytes,
        totals,
    }
}

/// Route a request path to a status line, content type and body
fn route(path: &str, registry: &PoolRegistry) -> (&'static str, &'static str, String) {
    const JSON: &str = "application/json";

    match path {
        "/pools" => (
            "200 OK",
            JSON,
            serde_json::to_string_pretty(&registry.dump()).unwrap_or_default(),
        ),
        "/pools.txt" => ("200 OK", "text/plain", registry.dump().to_string()),
        "/stats" => (
            "200 OK",
            JSON,
            serde_json::to_string_pretty(&stats(registry)).unwrap_or_default(),
        ),
        "/" => {
            let help = r#"{
  "endpoints": {
    "/pools": "Bucket watermarks, counts and counters",
    "/pools.txt": "Bucket dump as plain text",
    "/stats": "Aggregate reserve statistics"
  }
}"#;
            ("200 OK", JSON, help.to_string())
        }
        _ => ("404 Not Found", JSON, r#"{"error": "Not found"}"#.to_string()),
    }
}

fn handle_request(mut stream: TcpStream, registry: &PoolRegistry) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer)?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let first_line = request.lines().next().unwrap_or("");

    // Parse request path
    let path = first_line.split_whitespace().nth(1).unwrap_or("/");

    let (status, content_type, body) = route(path, registry);

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        content_type,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(())
}
