//! Shared fixtures for the integration tests: in-memory fetchers, a
//! recording reporter and a one-shot HTTP server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;
use wasmboot::{BootstrapError, Fetch, FetchError, Fetched, ModuleSource, Reporter};

/// Assemble WAT into a binary module.
pub fn wasm(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("test WAT should assemble")
}

/// A fetcher serving fixed payloads keyed by the source's display form.
#[derive(Clone, Default)]
pub struct MapFetcher {
    entries: HashMap<String, Fetched>,
    delay: Option<Duration>,
    fetches: Arc<AtomicUsize>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: &str, bytes: Vec<u8>) -> Self {
        self.entries.insert(
            source.to_string(),
            Fetched {
                bytes,
                content_type: Some("application/wasm".to_string()),
            },
        );
        self
    }

    pub fn with_content_type(mut self, source: &str, bytes: Vec<u8>, content_type: &str) -> Self {
        self.entries.insert(
            source.to_string(),
            Fetched {
                bytes,
                content_type: Some(content_type.to_string()),
            },
        );
        self
    }

    /// Sleep before answering every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of fetch attempts, readable after the fetcher moves.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fetches)
    }
}

impl Fetch for MapFetcher {
    async fn fetch(&self, source: &ModuleSource) -> Result<Fetched, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.entries
            .get(&source.to_string())
            .cloned()
            .ok_or_else(|| FetchError::NotFound(source.to_string()))
    }
}

/// Records the kind of every reported failure.
#[derive(Clone, Default)]
pub struct Reports {
    kinds: Arc<Mutex<Vec<&'static str>>>,
}

impl Reports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporter(&self) -> impl Reporter + use<> {
        let kinds = Arc::clone(&self.kinds);
        move |err: &BootstrapError| kinds.lock().unwrap().push(err.kind())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.kinds.lock().unwrap().clone()
    }
}

/// Serve exactly one HTTP response on a loopback port and return the URL
/// of `path` on it. `declared_len` overrides the `Content-Length` header.
pub async fn serve_once(
    status: &str,
    content_type: &str,
    body: Vec<u8>,
    declared_len: Option<usize>,
    path: &str,
) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        declared_len.unwrap_or(body.len())
    );

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
    });

    Url::parse(&format!("http://{addr}{path}")).unwrap()
}

/// Accept one connection, read the request and never answer. The socket
/// stays open for `hold` so the client sees a stalled server.
pub async fn serve_stalled(path: &str, hold: Duration) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        tokio::time::sleep(hold).await;
        drop(socket);
    });

    Url::parse(&format!("http://{addr}{path}")).unwrap()
}
