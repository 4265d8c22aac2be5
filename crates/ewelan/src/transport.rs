//! HTTP transport boundary for outbound device commands.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

/// Response surfaced to the dispatcher: HTTP status plus the raw body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Interface to the HTTP client used for command delivery.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// POST a JSON body to a device endpoint.
    async fn post(&self, url: &str, body: String) -> Result<TransportResponse, TransportError>;
}

/// Upper bound on a single command exchange. The device protocol specifies
/// no timeout; an unreachable device must not pin a dispatch task forever.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Real transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CommandTransport for HttpTransport {
    async fn post(&self, url: &str, body: String) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json;charset=UTF-8")
            .header("Accept", "application/json")
            .header("Accept-Language", "en-gb")
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

/// Mock transport for tests: records every request and answers with a
/// scriptable response (HTTP 200 / `{"error":0}` by default).
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct MockTransport {
    pub requests: std::sync::Mutex<Vec<(String, String)>>,
    pub response: std::sync::Mutex<TransportResponse>,
}

#[cfg(test)]
impl Default for MockTransport {
    fn default() -> Self {
        Self {
            requests: std::sync::Mutex::new(Vec::new()),
            response: std::sync::Mutex::new(TransportResponse {
                status: 200,
                body: r#"{"error":0}"#.to_string(),
            }),
        }
    }
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn set_response(&self, status: u16, body: &str) {
        *self.response.lock().unwrap() = TransportResponse {
            status,
            body: body.to_string(),
        };
    }
}

#[cfg(test)]
#[async_trait]
impl CommandTransport for MockTransport {
    async fn post(&self, url: &str, body: String) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body));
        Ok(self.response.lock().unwrap().clone())
    }
}
