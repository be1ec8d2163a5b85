//! QR Code Rendering

use async_trait::async_trait;

use crate::error::{Result, RuntimeError};

const SERVICE: &str = "qr";

pub const DEFAULT_QR_API_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";

/// Rendering options for the memorial QR image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QrOptions {
    /// Image width in pixels
    pub width: u32,
    /// Quiet zone in modules
    pub margin: u32,
    pub dark: String,
    pub light: String,
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            width: 512,
            margin: 2,
            dark: "#000000".into(),
            light: "#ffffff".into(),
        }
    }
}

/// Turns text into a PNG QR code
#[async_trait]
pub trait QrEncoder: Send + Sync {
    async fn encode_png(&self, data: &str, options: &QrOptions) -> Result<Vec<u8>>;
}

/// QR rendering through a goqr.me-compatible HTTP API
pub struct HttpQrEncoder {
    http: reqwest::Client,
    api_url: String,
}

impl HttpQrEncoder {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| RuntimeError::Config(format!("QR HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(std::env::var("QR_API_URL").unwrap_or_else(|_| DEFAULT_QR_API_URL.into()))
    }
}

#[async_trait]
impl QrEncoder for HttpQrEncoder {
    async fn encode_png(&self, data: &str, options: &QrOptions) -> Result<Vec<u8>> {
        let size = format!("{0}x{0}", options.width);
        let margin = options.margin.to_string();
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("data", data),
                ("size", size.as_str()),
                ("margin", margin.as_str()),
                ("color", options.dark.trim_start_matches('#')),
                ("bgcolor", options.light.trim_start_matches('#')),
                ("format", "png"),
            ])
            .send()
            .await
            .map_err(|e| RuntimeError::transport(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::http(SERVICE, status.as_u16(), body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RuntimeError::transport(SERVICE, &e))?;
        if bytes.is_empty() {
            return Err(RuntimeError::http(SERVICE, status.as_u16(), "empty image"));
        }
        Ok(bytes.to_vec())
    }
}
