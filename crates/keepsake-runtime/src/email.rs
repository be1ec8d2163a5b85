//! Email Transport

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, RuntimeError};

const SERVICE: &str = "email";

pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com";

/// A rendered message ready to send
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Delivers rendered email
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Returns the provider's message id
    async fn send(&self, email: &OutgoingEmail) -> Result<String>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

/// Resend REST transport
pub struct ResendTransport {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl ResendTransport {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| RuntimeError::Config(format!("email HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("RESEND_API_KEY")
            .map_err(|_| RuntimeError::Config("RESEND_API_KEY not set".into()))?;
        let from = std::env::var("EMAIL_FROM")
            .map_err(|_| RuntimeError::Config("EMAIL_FROM not set".into()))?;
        let api_url = std::env::var("RESEND_API_URL").unwrap_or_else(|_| DEFAULT_RESEND_API_URL.into());
        Self::new(api_url, api_key, from)
    }
}

#[async_trait]
impl EmailTransport for ResendTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let request = SendRequest {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
        };

        let response = self
            .http
            .post(format!("{}/emails", self.api_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RuntimeError::transport(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::http(SERVICE, status.as_u16(), body));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::http(SERVICE, status.as_u16(), format!("malformed body: {e}")))?;
        Ok(sent.id)
    }
}
