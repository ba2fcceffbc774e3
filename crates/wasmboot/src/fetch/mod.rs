use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;
use url::Url;

use crate::ModuleSource;

/// Bytes retrieved for a module, plus what the server said they were.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// `Content-Type` of an HTTP response; `None` for other sources.
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("failed to read {origin}: {error}")]
    Io {
        origin: String,
        #[source]
        error: io::Error,
    },
    #[error("GET {url} returned status {status}")]
    Status { url: Url, status: u16 },
    #[error("GET {url} failed: {message}")]
    Transport { url: Url, message: String },
    #[error("payload truncated: received {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
    #[error("expected content type application/wasm, found {found}")]
    ContentType { found: String },
    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("invalid module URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Retrieves module bytes for a [`ModuleSource`].
pub trait Fetch: Send + Sync {
    fn fetch(
        &self,
        source: &ModuleSource,
    ) -> impl Future<Output = Result<Fetched, FetchError>> + Send;
}

/// Reads paths and `file://` URLs from disk and GETs `http(s)://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFetcher {
    timeout: Option<Duration>,
}

impl DefaultFetcher {
    /// Bound each HTTP request from connect through the last body byte.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Fetch for DefaultFetcher {
    async fn fetch(&self, source: &ModuleSource) -> Result<Fetched, FetchError> {
        debug!(%source, "fetching module");
        let fetched = match source {
            ModuleSource::Path(path) => read_file(path).await?,
            ModuleSource::Url(url) => match url.scheme() {
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|()| FetchError::UnsupportedScheme(url.to_string()))?;
                    read_file(&path).await?
                }
                "http" | "https" => http_get(url.clone(), self.timeout).await?,
                other => return Err(FetchError::UnsupportedScheme(other.to_string())),
            },
            ModuleSource::Bytes { bytes, .. } => Fetched {
                bytes: bytes.to_vec(),
                content_type: None,
            },
        };
        debug!(%source, bytes = fetched.bytes.len(), "fetched module");
        Ok(fetched)
    }
}

async fn read_file(path: &Path) -> Result<Fetched, FetchError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Fetched {
            bytes,
            content_type: None,
        }),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            Err(FetchError::NotFound(path.display().to_string()))
        }
        Err(error) => Err(FetchError::Io {
            origin: path.display().to_string(),
            error,
        }),
    }
}

/// `ureq` blocks, so the request runs on tokio's blocking pool.
async fn http_get(url: Url, timeout: Option<Duration>) -> Result<Fetched, FetchError> {
    let task_url = url.clone();
    tokio::task::spawn_blocking(move || get_blocking(&task_url, timeout))
        .await
        .map_err(|err| FetchError::Transport {
            url,
            message: err.to_string(),
        })?
}

fn get_blocking(url: &Url, timeout: Option<Duration>) -> Result<Fetched, FetchError> {
    let mut agent = ureq::AgentBuilder::new();
    if let Some(limit) = timeout {
        agent = agent.timeout(limit);
    }
    let started_at = Instant::now();
    let timed_out = |kind: Option<io::ErrorKind>, limit: Duration| {
        matches!(kind, Some(io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
            || started_at.elapsed() >= limit
    };

    let response = match agent.build().get(url.as_str()).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(status, _)) => {
            return Err(FetchError::Status {
                url: url.clone(),
                status,
            });
        }
        Err(ureq::Error::Transport(transport)) => {
            let kind = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<io::Error>())
                .map(io::Error::kind);
            if let Some(limit) = timeout.filter(|limit| timed_out(kind, *limit)) {
                return Err(FetchError::TimedOut(limit));
            }
            return Err(FetchError::Transport {
                url: url.clone(),
                message: transport.to_string(),
            });
        }
    };

    let content_type = response.header("Content-Type").map(str::to_string);
    let expected = response
        .header("Content-Length")
        .and_then(|len| len.trim().parse::<u64>().ok());

    let mut bytes = Vec::new();
    match response.into_reader().read_to_end(&mut bytes) {
        Ok(_) => {}
        // A body cut short of its Content-Length; reported below.
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {}
        Err(error) => {
            if let Some(limit) = timeout.filter(|limit| timed_out(Some(error.kind()), *limit)) {
                return Err(FetchError::TimedOut(limit));
            }
            return Err(FetchError::Io {
                origin: url.to_string(),
                error,
            });
        }
    }

    let received = bytes.len() as u64;
    if let Some(expected) = expected {
        if received < expected {
            return Err(FetchError::Truncated { expected, received });
        }
    }
    Ok(Fetched {
        bytes,
        content_type,
    })
}

/// Whether a `Content-Type` value names the wasm media type, ignoring
/// parameters and case.
pub(crate) fn is_wasm_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/wasm"))
}
