//! Comment backend client
//!
//! `CommentBackend` is the engine's only network seam. `HttpBackend` talks
//! to real servers with reqwest and also reads local files, so the same
//! `load` call works for `https://...`, `file://...` and plain paths.

pub mod model;

use std::fmt;
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures_util::future::BoxFuture;
use reqwest::{Client, header};
use tracing::debug;

pub use model::{CommentRecord, parse_comments};

const USER_AGENT: &str = concat!("danmaku/", env!("CARGO_PKG_VERSION"));

/// Remote comment source and sink
///
/// Returned futures own their data so they can be spawned onto the runtime
/// without borrowing the backend.
pub trait CommentBackend: Send + Sync + 'static {
    /// Fetch the raw body of a comment collection
    fn fetch(&self, source: &str) -> BoxFuture<'static, Result<String>>;

    /// Publish one comment
    fn post(&self, endpoint: &str, record: CommentRecord) -> BoxFuture<'static, Result<()>>;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackend")
            .field("client", &"<HttpClient>")
            .finish()
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

impl CommentBackend for HttpBackend {
    fn fetch(&self, source: &str) -> BoxFuture<'static, Result<String>> {
        let client = self.client.clone();
        let source = source.to_string();
        Box::pin(async move {
            if !is_remote(&source) {
                let path = source.strip_prefix("file://").unwrap_or(&source);
                debug!("Reading comments from {}", path);
                return tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| anyhow!("Failed to read {}: {}", path, e));
            }

            debug!("Fetching comments from {}", source);
            let response = client
                .get(&source)
                .header(header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| anyhow!("Request failed: {}", e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("Server returned {}", status));
            }
            response
                .text()
                .await
                .map_err(|e| anyhow!("Failed to read response: {}", e))
        })
    }

    fn post(&self, endpoint: &str, record: CommentRecord) -> BoxFuture<'static, Result<()>> {
        let client = self.client.clone();
        let endpoint = endpoint.to_string();
        Box::pin(async move {
            let response = client
                .post(&endpoint)
                .json(&record)
                .send()
                .await
                .map_err(|e| anyhow!("Request failed: {}", e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("Server returned {}", status));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_local_file() {
        let path = std::env::temp_dir().join(format!("danmaku-fetch-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"[{"text":"a","time":1}]"#)
            .await
            .unwrap();
        let backend = HttpBackend::new(Duration::from_secs(1)).unwrap();

        let body = backend.fetch(&path.to_string_lossy()).await.unwrap();
        assert_eq!(parse_comments(&body).unwrap().len(), 1);

        let url = format!("file://{}", path.to_string_lossy());
        assert!(backend.fetch(&url).await.is_ok());
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_fetch_missing_file_fails() {
        let backend = HttpBackend::new(Duration::from_secs(1)).unwrap();
        assert!(backend.fetch("/nonexistent/comments.json").await.is_err());
    }
}
