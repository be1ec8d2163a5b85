//! Runtime Error Types

use keepsake_core::{NotificationError, OrderError};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors from the external collaborators
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Remote service answered with a non-success status, or not at all
    #[error("{service} request failed (status {status}): {message}")]
    Http {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// Blob key rejected or blob write failed
    #[error("Blob storage error: {0}")]
    Blob(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Order store error
    #[error(transparent)]
    Order(#[from] OrderError),
}

impl RuntimeError {
    pub(crate) fn http(service: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            service,
            status,
            message: message.into(),
        }
    }

    /// Map a reqwest transport error for `service`
    pub(crate) fn transport(service: &'static str, err: &reqwest::Error) -> Self {
        let status = err.status().map_or(0, |s| s.as_u16());
        let message = if err.is_timeout() {
            "timeout".to_string()
        } else {
            err.to_string()
        };
        Self::http(service, status, message)
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Http { status: 0 | 500..=599, .. })
    }
}

impl From<RuntimeError> for NotificationError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Http { service: "email", .. } => Self::Transport(err.to_string()),
            RuntimeError::Config(msg) => Self::Disabled(msg),
            other => Self::Artifact(other.to_string()),
        }
    }
}
