use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{build_uri, QueryParams, Transport};
use crate::config::RequestConfig;
use crate::error::{TransportError, TransportResult};

/// Plain HTTP transport for headless hosts.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(request_config: &RequestConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        uri: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> TransportResult<Value> {
        let url = build_uri(uri, params);
        let start = Instant::now();

        debug!(url = %url, "Sending request");

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else if e.is_builder() {
                    TransportError::InvalidUri {
                        message: e.to_string(),
                    }
                } else {
                    TransportError::Http(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(TransportError::Http)?;

        info!(
            uri = %uri,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis(),
            "Request completed"
        );

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            return Ok(json!({ "status": "failed", "response": body }));
        }

        serde_json::from_str(&body).map_err(|e| TransportError::InvalidResponse {
            message: format!("Failed to parse response: {}", e),
        })
    }
}
