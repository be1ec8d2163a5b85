//! Error Types

use thiserror::Error;

use crate::order::PaymentStatus;

/// Result type alias for order operations
pub type Result<T> = std::result::Result<T, OrderError>;

/// Order lifecycle errors
#[derive(Error, Debug)]
pub enum OrderError {
    /// Required order fields missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Insert rejected by the slug uniqueness constraint
    #[error("Slug already taken: {0}")]
    DuplicateSlug(String),

    /// Bounded slug retry loop gave up
    #[error("Could not allocate a free slug for '{base}' after {attempts} attempts")]
    SlugExhausted { base: String, attempts: usize },

    /// Order not found by id or slug
    #[error("Order not found: {0}")]
    NotFound(String),

    /// Content edits attempted after payment left `pending`
    #[error("Order content is locked once status is {0}")]
    ContentLocked(PaymentStatus),

    /// Owner email gate rejected the caller
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Underlying storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl OrderError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DuplicateSlug(_) | Self::Storage(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => format!("Please check the form: {msg}"),
            Self::DuplicateSlug(_) | Self::SlugExhausted { .. } => {
                "We could not reserve a page address for this name. Please try a different name.".into()
            }
            Self::NotFound(_) => "Page not found.".into(),
            Self::ContentLocked(_) => "This page can no longer be edited.".into(),
            Self::Forbidden(_) => "You are not allowed to change this page.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}
