//! Runbook fetching: opaque `fetch(url) → markdown`.

use async_trait::async_trait;

use tarsy_domain::error::{Error, Result};

#[async_trait]
pub trait RunbookFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP fetcher used in production.
pub struct HttpRunbookFetcher {
    http: reqwest::Client,
}

impl Default for HttpRunbookFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRunbookFetcher {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

#[async_trait]
impl RunbookFetcher for HttpRunbookFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("runbook fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "runbook fetch failed: HTTP {} for {url}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| Error::Http(format!("runbook body read failed: {e}")))
    }
}

/// Fixed-content fetcher for tests.
pub struct StaticRunbookFetcher {
    pub content: String,
}

#[async_trait]
impl RunbookFetcher for StaticRunbookFetcher {
    async fn fetch(&self, _url: &str) -> Result<String> {
        Ok(self.content.clone())
    }
}
