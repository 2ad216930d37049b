//! HTTP object store client
//!
//! Talks to a plain HTTP bucket endpoint: `GET {base}/{key}` downloads,
//! `PUT {base}/{key}` uploads, `HEAD {base}/{key}` checks existence.
//! Connection failures and 5xx responses are retried with exponential
//! backoff; everything else fails immediately.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::fs_blob::write_atomic;
use crate::storage_traits::{BlobStore, StorageResult};

/// HTTP blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBlobConfig {
    /// Bucket endpoint, e.g. `https://storage.example.com/handsign`
    pub base_url: String,
    /// Base for public URLs (defaults to `base_url`)
    pub public_base_url: Option<String>,
    /// Bearer token for authenticated buckets
    pub token: Option<String>,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each further retry
    pub initial_backoff_ms: u64,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for HttpBlobConfig {
    fn default() -> Self {
        HttpBlobConfig {
            base_url: std::env::var("HANDSIGN_BLOB_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000/handsign".to_string()),
            public_base_url: std::env::var("HANDSIGN_BLOB_PUBLIC_URL").ok(),
            token: std::env::var("HANDSIGN_BLOB_TOKEN").ok(),
            max_attempts: 3,
            initial_backoff_ms: 200,
            timeout_secs: 120,
        }
    }
}

impl HttpBlobConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific endpoint
    pub fn new(base_url: &str) -> Self {
        HttpBlobConfig {
            base_url: base_url.to_string(),
            public_base_url: None,
            token: None,
            max_attempts: 3,
            initial_backoff_ms: 200,
            timeout_secs: 120,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// Outcome of a single attempt.
enum Attempt<T> {
    Done(T),
    Retry(String),
    Fatal(StorageError),
}

/// `reqwest`-backed blob store.
pub struct HttpBlobStore {
    config: HttpBlobConfig,
    http_client: reqwest::Client,
}

impl HttpBlobStore {
    /// Create a new HTTP blob store client
    pub fn new(config: HttpBlobConfig) -> StorageResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("handsign-store/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StorageError::Backend(format!("failed to create HTTP client: {e}")))?;

        Ok(HttpBlobStore {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> StorageResult<Self> {
        Self::new(HttpBlobConfig::from_env())
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), key)
    }

    fn public_url(&self, key: &str) -> String {
        let base = self
            .config
            .public_base_url
            .as_deref()
            .unwrap_or(&self.config.base_url);
        format!("{}/{}", base.trim_end_matches('/'), key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn with_retry<T, F, Fut>(&self, key: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut attempt = 1;
        loop {
            match op().await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(reason) if attempt >= max_attempts => {
                    return Err(StorageError::Transient {
                        key: key.to_string(),
                        attempts: attempt,
                        reason,
                    });
                }
                Attempt::Retry(reason) => {
                    warn!(key = %key, attempt, reason = %reason, "blob request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}

fn classify_send_error<T>(err: reqwest::Error) -> Attempt<T> {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        Attempt::Retry(err.to_string())
    } else {
        Attempt::Fatal(StorageError::Backend(err.to_string()))
    }
}

fn classify_status<T>(status: StatusCode, key: &str) -> Attempt<T> {
    if status == StatusCode::NOT_FOUND {
        Attempt::Fatal(StorageError::NotFound {
            key: key.to_string(),
        })
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Attempt::Retry(format!("server returned {status}"))
    } else {
        Attempt::Fatal(StorageError::Backend(format!(
            "unexpected status {status} for {key}"
        )))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn download_to(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let url = self.object_url(key);
        let bytes = self
            .with_retry(key, || async {
                let response = match self.authorize(self.http_client.get(&url)).send().await {
                    Ok(r) => r,
                    Err(e) => return classify_send_error(e),
                };
                let status = response.status();
                if !status.is_success() {
                    return classify_status(status, key);
                }
                match response.bytes().await {
                    Ok(b) => Attempt::Done(b),
                    Err(e) => Attempt::Retry(e.to_string()),
                }
            })
            .await?;
        let len = bytes.len();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&dest, &bytes))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;
        debug!(key = %key, bytes = len, "http blob downloaded");
        Ok(())
    }

    async fn upload_from(&self, key: &str, src: &Path) -> StorageResult<String> {
        let url = self.object_url(key);
        let body = tokio::fs::read(src).await?;
        self.with_retry(key, || async {
            let request = self.authorize(self.http_client.put(&url)).body(body.clone());
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => return classify_send_error(e),
            };
            let status = response.status();
            if status.is_success() {
                Attempt::Done(())
            } else {
                classify_status(status, key)
            }
        })
        .await?;
        debug!(key = %key, "http blob uploaded");
        Ok(self.public_url(key))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let url = self.object_url(key);
        self.with_retry(key, || async {
            let response = match self.authorize(self.http_client.head(&url)).send().await {
                Ok(r) => r,
                Err(e) => return classify_send_error(e),
            };
            let status = response.status();
            if status.is_success() {
                Attempt::Done(true)
            } else if status == StatusCode::NOT_FOUND {
                Attempt::Done(false)
            } else {
                classify_status(status, key)
            }
        })
        .await
    }
}
