//! Payment Confirmation Hook
//!
//! Invoked by the webhook reconciler exactly once per order, right after the
//! conditional write that moved it into `paid`. Failures are reported back
//! for logging only; they never undo the status write.

use async_trait::async_trait;
use thiserror::Error;

use crate::order::{redact_email, Order};

/// Confirmation side-effect failures
#[derive(Error, Debug)]
pub enum NotificationError {
    /// Email provider refused or could not be reached
    #[error("Email transport error: {0}")]
    Transport(String),

    /// QR code or other artifact could not be produced
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Notification not configured
    #[error("Notifications disabled: {0}")]
    Disabled(String),
}

/// Deferred side effects of a confirmed payment
#[async_trait]
pub trait ConfirmationHook: Send + Sync {
    /// Returns the transport message id of the confirmation email
    async fn order_paid(&self, order: &Order) -> Result<String, NotificationError>;
}

/// Hook that only logs, used when no email transport is configured
pub struct LoggingConfirmationHook;

#[async_trait]
impl ConfirmationHook for LoggingConfirmationHook {
    async fn order_paid(&self, order: &Order) -> Result<String, NotificationError> {
        tracing::info!(
            order_id = %order.id,
            slug = %order.custom_slug,
            email = %redact_email(&order.email),
            "Order paid (no-op confirmation hook)"
        );
        Err(NotificationError::Disabled("no email transport configured".into()))
    }
}
