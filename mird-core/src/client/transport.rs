//! HTTP transport to the collector endpoint
//!
//! [`HttpTransport`] speaks the collector protocol: one JSON record per POST,
//! authenticated with `X-Analytics-Token`. The beacon variant is the
//! page-teardown path and is bounded by its own, shorter timeout.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::EventRecord;

/// Header carrying the shared secret
pub const TOKEN_HEADER: &str = "X-Analytics-Token";

/// Delivers records to the collector.
pub trait Transport: Send + Sync + 'static {
    /// Regular submission; resolves once the collector answered.
    fn send(&self, record: &EventRecord) -> impl Future<Output = Result<()>> + Send;

    /// Best-effort submission used while the page is being torn down.
    fn beacon(&self, record: &EventRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Body returned by the collector
#[derive(Debug, Deserialize)]
pub struct TrackResponse {
    pub status: String,
    pub message: String,
}

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
    beacon_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            TOKEN_HEADER,
            HeaderValue::from_str(&config.token)
                .map_err(|e| Error::Config(format!("invalid client.token: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            beacon_timeout: Duration::from_secs(config.beacon_timeout_secs),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, record: &EventRecord, timeout: Option<Duration>) -> Result<TrackResponse> {
        let mut request = self.http_client.post(&self.endpoint).json(record);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Collector(format!("failed to parse response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Collector(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, record: &EventRecord) -> Result<()> {
        let response = self.post(record, None).await?;
        tracing::debug!(
            session_id = %record.session_id,
            event_type = record.event_type(),
            status = %response.status,
            "Analytics sent"
        );
        Ok(())
    }

    async fn beacon(&self, record: &EventRecord) -> Result<()> {
        self.post(record, Some(self.beacon_timeout)).await.map(|_| ())
    }
}
