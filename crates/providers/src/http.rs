//! HTTP client for the local provider proxy.
//!
//! Every provider is reached through a fixed path on one local proxy server
//! (e.g. `http://localhost:3001/api/sutu/...`). [`ProxyClient`] wraps a
//! pooled [`reqwest::Client`], attaches the API-key header, and turns
//! responses into either a JSON body or a classified [`GenerationError`]:
//!
//! - the request never got an answer -> [`GenerationError::Transport`];
//! - the proxy/provider answered non-2xx or with an unreadable body ->
//!   [`GenerationError::Provider`] carrying the status and raw body.

use std::time::Duration;

use genflow_core::error::GenerationError;
use genflow_core::types::ProviderKind;
use serde::de::DeserializeOwned;

/// Header carrying the provider credential.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Readiness endpoint exposed by the proxy server.
pub const HEALTH_PATH: &str = "/api/health";

/// Timeout for a single readiness probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of probes made by [`ProxyClient::wait_until_ready`].
pub const DEFAULT_READY_ATTEMPTS: u32 = 60;

/// Default delay between readiness probes.
pub const DEFAULT_READY_INTERVAL: Duration = Duration::from_millis(500);

/// Shared HTTP client for one proxy server.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyClient {
    /// Create a client with a per-request timeout.
    ///
    /// * `base_url` - proxy origin, e.g. `http://localhost:3001`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Configuration(format!("HTTP client setup failed: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path` under a provider's proxy prefix.
    pub fn url(&self, proxy_path: &str, path: &str) -> String {
        format!("{}{}{}", self.base_url, proxy_path, path)
    }

    /// Absolute URL for `path` with `id` appended as one percent-encoded
    /// path segment.
    pub fn resource_url(
        &self,
        proxy_path: &str,
        path: &str,
        id: &str,
    ) -> Result<String, GenerationError> {
        let mut url = reqwest::Url::parse(&self.url(proxy_path, path))
            .map_err(|e| GenerationError::Configuration(format!("Invalid proxy URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| {
                GenerationError::Configuration(format!(
                    "Proxy URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .push(id);
        Ok(url.to_string())
    }

    /// `POST` a JSON body and return the JSON response.
    pub async fn post_json(
        &self,
        provider: ProviderKind,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, GenerationError> {
        tracing::debug!(provider = %provider, url, "POST to provider proxy");
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport(provider, e))?;

        Self::read_json(provider, response).await
    }

    /// `GET` with query parameters and return the JSON response.
    pub async fn get_json(
        &self,
        provider: ProviderKind,
        url: &str,
        api_key: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, GenerationError> {
        tracing::debug!(provider = %provider, url, "GET from provider proxy");
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| transport(provider, e))?;

        Self::read_json(provider, response).await
    }

    /// Probe the proxy's health endpoint once.
    pub async fn check_health(&self) -> bool {
        match self
            .client
            .get(format!("{}{}", self.base_url, HEALTH_PATH))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Probe until the proxy answers healthy or `attempts` run out.
    pub async fn wait_until_ready(&self, attempts: u32, interval: Duration) -> bool {
        for attempt in 1..=attempts {
            if self.check_health().await {
                tracing::info!(attempt, base_url = %self.base_url, "Provider proxy ready");
                return true;
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        tracing::error!(
            attempts,
            base_url = %self.base_url,
            "Provider proxy did not become ready",
        );
        false
    }

    // ---- private helpers ----

    /// Read the body, failing with the status and raw text on non-2xx or
    /// non-JSON responses.
    async fn read_json(
        provider: ProviderKind,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, GenerationError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| transport(provider, e))?;

        if !status.is_success() {
            return Err(GenerationError::Provider {
                provider,
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(provider = %provider, error = %e, "Provider returned non-JSON body");
            GenerationError::Provider {
                provider,
                status: status.as_u16(),
                body,
            }
        })
    }
}

/// Deserialize a provider response into its typed shape.
///
/// A shape mismatch is reported as a provider error carrying the raw body.
pub fn decode<T: DeserializeOwned>(
    provider: ProviderKind,
    value: &serde_json::Value,
) -> Result<T, GenerationError> {
    T::deserialize(value).map_err(|e| {
        tracing::warn!(provider = %provider, error = %e, "Unexpected provider response shape");
        GenerationError::Provider {
            provider,
            status: 200,
            body: value.to_string(),
        }
    })
}

fn transport(provider: ProviderKind, e: reqwest::Error) -> GenerationError {
    GenerationError::Transport {
        provider,
        message: e.to_string(),
    }
}
