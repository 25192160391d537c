//! Generic `request(method, path, body)` contract the engine adapter is built on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best-effort human readable message from an error body.
    pub fn message(&self) -> String {
        self.body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.body.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<TransportResponse, GatewayError>;
}

/// HTTP transport authenticating with the engine's API key header.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<TransportResponse, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "Calling workflow engine");

        let mut request = self
            .client
            .request(method, &url)
            .header("X-N8N-API-KEY", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(TransportResponse { status, body })
    }
}
