//! Shared helpers for integration tests.
//!
//! [`StubServer`] is a tiny HTTP/1.1 responder on a local TCP port. It answers
//! each request with the next scripted status (repeating the last one) and
//! records what it received.

#![allow(dead_code)]

use outreach_core::config::IntegrationConfig;
use outreach_core::resilience::{
    BackoffConfig, CircuitBreakerConfig, CircuitBreakerManager, GuardedHttpClient, RetryPolicy,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Debug)]
struct Script {
    statuses: Vec<u16>,
    body: String,
    served: usize,
}

pub struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl StubServer {
    /// Respond with `statuses` in order, then keep repeating the last one
    pub async fn start(statuses: Vec<u16>) -> Self {
        Self::start_with_body(statuses, "").await
    }

    pub async fn start_with_body(statuses: Vec<u16>, body: &str) -> Self {
        assert!(!statuses.is_empty());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(Script {
            statuses,
            body: body.to_string(),
            served: 0,
        }));

        let recorded = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    let _ = serve_one(stream, recorded, script).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(
    mut stream: TcpStream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<Script>>,
) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = find_header_end(&buffer) {
            break position;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    let (status, response_body) = {
        let mut script = script.lock();
        let index = script.served.min(script.statuses.len() - 1);
        script.served += 1;
        (script.statuses[index], script.body.clone())
    };
    recorded.lock().push(RecordedRequest {
        method,
        path,
        headers,
        body,
    });

    let response = format!(
        "HTTP/1.1 {status} Stub\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{response_body}",
        response_body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Guarded client with a fast, jitter-free retry curve
pub fn fast_client(failure_threshold: u32) -> GuardedHttpClient {
    let breakers = CircuitBreakerManager::new(CircuitBreakerConfig {
        failure_threshold,
        open_duration: Duration::from_secs(60),
    });
    let backoff =
        BackoffConfig::without_jitter(Duration::from_millis(5), Duration::from_millis(20));
    GuardedHttpClient::new(
        reqwest::Client::new(),
        Arc::new(RetryPolicy::new(breakers, backoff)),
    )
}

pub fn default_client() -> GuardedHttpClient {
    GuardedHttpClient::new(
        reqwest::Client::new(),
        Arc::new(RetryPolicy::from_config(&IntegrationConfig::default())),
    )
}
