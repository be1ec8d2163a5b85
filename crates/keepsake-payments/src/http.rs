//! Shared reqwest plumbing for the REST-based providers

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{PaymentError, Result};

/// Upper bound on every provider call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn build_client(provider: &'static str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentError::Config(format!("{provider} HTTP client: {e}")))
}

/// Send `request` and decode a JSON body, mapping every failure to
/// [`PaymentError::Provider`].
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| PaymentError::transport(provider, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider, status = status.as_u16(), "Provider returned an error");
        return Err(PaymentError::provider(provider, status.as_u16(), body));
    }

    response.json::<T>().await.map_err(|e| {
        PaymentError::provider(provider, status.as_u16(), format!("malformed response: {e}"))
    })
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn require_env(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::Config(format!("{key} not set")))
}
