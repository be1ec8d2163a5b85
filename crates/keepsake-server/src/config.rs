//! Server Configuration

use std::path::PathBuf;

use keepsake_core::ProviderFamily;
use keepsake_runtime::LocalBlobStore;

/// Settings read from the environment at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Origin of memorial pages (`{public_base_url}/{slug}`)
    pub public_base_url: String,
    /// Origin providers post webhooks to
    pub webhook_base_url: String,
    pub domestic_country: String,
    pub domestic_provider: ProviderFamily,
    pub upload_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            public_base_url: "http://localhost:3000".into(),
            webhook_base_url: "http://localhost:3000".into(),
            domestic_country: "BR".into(),
            domestic_provider: ProviderFamily::Domestic,
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let public_base_url = var("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url);
        let domestic_provider = match var("DOMESTIC_PROVIDER").as_deref() {
            None | Some("mercadopago") => ProviderFamily::Domestic,
            Some("yampi") => ProviderFamily::DomesticAlt,
            Some(other) => {
                tracing::warn!(value = %other, "Unknown DOMESTIC_PROVIDER, using mercadopago");
                ProviderFamily::Domestic
            }
        };

        Self {
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            webhook_base_url: var("WEBHOOK_BASE_URL").unwrap_or_else(|| public_base_url.clone()),
            public_base_url,
            domestic_country: var("DOMESTIC_COUNTRY")
                .map_or(defaults.domestic_country, |c| c.to_uppercase()),
            domestic_provider,
            upload_dir: var("UPLOAD_DIR").map_or(defaults.upload_dir, PathBuf::from),
        }
    }

    /// Blob storage under `upload_dir`, served back at `{public_base_url}/uploads`
    pub fn blob_store(&self) -> LocalBlobStore {
        LocalBlobStore::new(&self.upload_dir, &self.public_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_runtime::BlobStore;

    #[tokio::test]
    async fn test_blob_urls_match_served_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            public_base_url: "https://keepsake.app/".into(),
            upload_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let url = config
            .blob_store()
            .put("abc/qr-code.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();

        assert_eq!(url, "https://keepsake.app/uploads/abc/qr-code.png");
        assert!(dir.path().join("abc/qr-code.png").exists());
    }
}
