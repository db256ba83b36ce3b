use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::instrument;
use url::Url;

use crate::error::LoadError;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_DOCUMENT_BYTES: u64 = 512 * 1024 * 1024;

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, LoadError>;
}

/// Blocking `ureq` agent driven from tokio's blocking pool.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            max_bytes: MAX_DOCUMENT_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Bytes, LoadError> {
        let agent = self.agent.clone();
        let limit = self.max_bytes;
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            let response = agent
                .get(&url)
                .call()
                .map_err(|err| LoadError::Network(err.to_string()))?;
            read_body(response.into_reader(), limit, &url)
        })
        .await
        .map_err(|err| LoadError::Network(format!("fetch task failed: {err}")))?
    }
}

/// Reads at most `limit` bytes. A longer body is an error rather than a truncated document.
fn read_body(reader: impl Read, limit: u64, url: &str) -> Result<Bytes, LoadError> {
    let mut body = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(|err| LoadError::Network(err.to_string()))?;
    if body.len() as u64 > limit {
        return Err(LoadError::Network(format!(
            "document exceeds {limit} bytes: {url}"
        )));
    }
    if body.is_empty() {
        return Err(LoadError::Network(format!("No data received from {url}")));
    }
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const URL: &str = "https://example.com/a.pdf";

    #[test]
    fn body_at_the_limit_is_kept_whole() {
        let body = read_body(Cursor::new(b"%PDF-1.7".to_vec()), 8, URL).unwrap();
        assert_eq!(&body[..], b"%PDF-1.7");
    }

    #[test]
    fn oversized_body_is_rejected_instead_of_truncated() {
        let err = read_body(Cursor::new(b"%PDF-1.7 and more".to_vec()), 8, URL).unwrap_err();
        assert_eq!(
            err,
            LoadError::Network(format!("document exceeds 8 bytes: {URL}"))
        );
    }

    #[test]
    fn empty_body_is_an_error() {
        let err = read_body(Cursor::new(Vec::new()), 8, URL).unwrap_err();
        assert_eq!(err.to_string(), format!("Network error: No data received from {URL}"));
    }
}
