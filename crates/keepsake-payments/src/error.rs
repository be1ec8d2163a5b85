//! Payment Error Types

use keepsake_core::OrderError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Provider API answered with a non-success status, or not at all.
    ///
    /// `status` is 0 when no HTTP response was received (timeout, connection).
    #[error("{provider} request failed (status {status}): {message}")]
    Provider {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// Checkout input rejected before calling a provider
    #[error("Validation error: {0}")]
    Validation(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Webhook points at an order this adapter does not own
    #[error("No order for correlation key {0}")]
    CorrelationNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Order store error
    #[error(transparent)]
    Order(#[from] OrderError),
}

impl PaymentError {
    pub(crate) fn provider(provider: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            status,
            message: message.into(),
        }
    }

    /// Map a reqwest transport error (timeout, DNS, TLS) for `provider`
    pub(crate) fn transport(provider: &'static str, err: &reqwest::Error) -> Self {
        let status = err.status().map_or(0, |s| s.as_u16());
        let message = if err.is_timeout() {
            "timeout".to_string()
        } else {
            err.to_string()
        };
        Self::provider(provider, status, message)
    }

    /// Check if the caller may simply resubmit
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            Self::Provider { .. } => "Payment processing failed. Please try again.",
            Self::Validation(_) => "Some checkout details are missing or invalid.",
            Self::Config(_) => "Service configuration error.",
            Self::CorrelationNotFound(_) => "Order not found.",
            _ => "An error occurred processing your request.",
        }
    }
}
