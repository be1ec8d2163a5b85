//! Blob Storage
//!
//! Photos and QR images, keyed `{orderId}/photos/{uuid}.{ext}` and
//! `{orderId}/qr-code.png`. [`LocalBlobStore`] writes under a directory the
//! server exposes at `/uploads`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use keepsake_core::OrderId;

use crate::error::{Result, RuntimeError};

/// Key of an order photo
pub fn photo_key(order_id: &OrderId, photo_id: &str, extension: &str) -> String {
    format!("{order_id}/photos/{photo_id}.{extension}")
}

/// Key of an order's QR image
pub fn qr_key(order_id: &OrderId) -> String {
    format!("{order_id}/qr-code.png")
}

/// Object storage for order assets
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return its public URL
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`; a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Reject keys that could escape the storage root
fn checked_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    let safe = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(path)
    } else {
        Err(RuntimeError::Blob(format!("invalid key '{key}'")))
    }
}

/// Filesystem-backed blob store
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    /// `public_base_url` is the origin that serves `/uploads`
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let path = self.root.join(checked_key(key)?);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = bytes.len();
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(key = %key, size, content_type, "Stored blob");
        Ok(format!("{}/uploads/{key}", self.public_base_url))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(checked_key(key)?);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.root.join(checked_key(key)?);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Removed blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory blob store for testing
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    public_base_url: String,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: &str) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs
            .read()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        checked_key(key)?;
        self.blobs
            .write()
            .map_err(|e| RuntimeError::Blob(e.to_string()))?
            .insert(key.to_string(), bytes);
        Ok(format!("{}/{key}", self.public_base_url))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .read()
            .map_err(|e| RuntimeError::Blob(e.to_string()))?
            .get(key)
            .cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs
            .write()
            .map_err(|e| RuntimeError::Blob(e.to_string()))?
            .remove(key);
        Ok(())
    }
}
