//! Shared HTTP helper for out-of-band negotiation calls.

use bytes::Bytes;
use reqwest::Client;

use crate::error::{BarrageError, Result};

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Thin wrapper around a shared [`reqwest::Client`].
///
/// Used by `prepare`, `online` and room-id resolution. Timeout and retry
/// policy is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Wrap an existing client (custom proxy, timeouts, ...).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GET the URL with the given query parameters, returning the raw body.
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    /// GET the URL and parse the body as JSON.
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value> {
        let body = self.get(url, query).await?;
        serde_json::from_slice(&body)
            .map_err(|e| BarrageError::negotiation(format!("invalid json from {url}: {e}")))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
