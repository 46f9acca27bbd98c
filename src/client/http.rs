//! Upstream HTTP Client
//!
//! Async client for the Gemini `generateContent` endpoint.

use crate::api::gemini::{generate_content_url, GenerateContentRequest, GenerateContentResponse};
use crate::error::{ProxyError, Result};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;

const BODY_PREVIEW_CHARS: usize = 500;

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

/// HTTP client bound to one upstream endpoint
#[derive(Debug, Clone)]
pub struct GeminiClient {
    /// Inner reqwest client (shared connection pool)
    client: Client,

    /// Base URL, e.g. `https://generativelanguage.googleapis.com/v1beta`
    endpoint: String,

    /// Total timeout per call
    timeout: Duration,
}

impl GeminiClient {
    /// Create a new HTTP client
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a `generateContent` call and extract the first text part
    ///
    /// Anything but 200 is `UpstreamHttp`; a 200 without
    /// `candidates[0].content.parts[0].text` is `MalformedUpstreamResponse`.
    pub async fn generate_content(
        &self,
        model: &str,
        key: &str,
        body: &GenerateContentRequest,
    ) -> Result<String> {
        let url = generate_content_url(&self.endpoint, model);

        // The credential rides in the query string; strip the URL from
        // transport errors so it never reaches logs.
        let response = self
            .client
            .post(&url)
            .query(&[("key", key)])
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProxyError::from(e.without_url()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::UpstreamHttp {
                status: status.as_u16(),
                body: preview(&body),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::from(e.without_url()))?;

        let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|e| {
            ProxyError::MalformedUpstreamResponse(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                preview(&text)
            ))
        })?;

        parsed.first_text().map(str::to_string).ok_or_else(|| {
            ProxyError::MalformedUpstreamResponse(
                "missing candidates[0].content.parts[0].text".to_string(),
            )
        })
    }
}
