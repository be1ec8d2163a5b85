//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use keepsake_core::OrderError;
use keepsake_payments::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub enum ApiError {
    Order(OrderError),
    Payment(PaymentError),
    BadRequest(String),
    /// Provider credentials missing at startup
    Disabled(&'static str),
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        Self::Order(err)
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Order(inner) => Self::Order(inner),
            other => Self::Payment(other),
        }
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::Order(e) => {
                let (status, code) = match e {
                    OrderError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    OrderError::DuplicateSlug(_) | OrderError::SlugExhausted { .. } => {
                        (StatusCode::CONFLICT, "SLUG_EXHAUSTED")
                    }
                    OrderError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    OrderError::ContentLocked(_) => (StatusCode::CONFLICT, "CONTENT_LOCKED"),
                    OrderError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                    OrderError::Storage(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                (status, code, e.user_message())
            }
            Self::Payment(e) => {
                let (status, code) = match e {
                    PaymentError::Provider { .. } => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
                    PaymentError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    PaymentError::WebhookSignature(_) => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
                    PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
                    PaymentError::CorrelationNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
                    PaymentError::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_DISABLED"),
                    PaymentError::Order(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
                };
                let message = match e {
                    PaymentError::Validation(detail) => detail.clone(),
                    PaymentError::WebhookSignature(_) => "Invalid signature".into(),
                    PaymentError::WebhookParse(_) => "Malformed payload".into(),
                    other => other.user_message().into(),
                };
                (status, code, message)
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            Self::Disabled(provider) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PAYMENTS_DISABLED",
                format!("{provider} is not configured"),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = self.parts();

        match &self {
            Self::Order(e) if status.is_server_error() => tracing::error!(error = %e, code, "Request failed"),
            Self::Payment(e) if status.is_server_error() => tracing::error!(error = %e, code, "Request failed"),
            Self::Order(e) => tracing::warn!(error = %e, code, "Request rejected"),
            Self::Payment(e) => tracing::warn!(error = %e, code, "Request rejected"),
            _ => tracing::warn!(code, error = %error, "Request rejected"),
        }

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.into(),
            }),
        )
            .into_response()
    }
}
