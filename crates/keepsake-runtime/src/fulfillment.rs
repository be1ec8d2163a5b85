//! Payment Fulfillment
//!
//! The runtime [`ConfirmationHook`]: render the QR image for the memorial
//! URL, store it, record `qr_code_url` on the order, then send the
//! confirmation email. A QR failure is logged and the email still goes out
//! without the image.

use async_trait::async_trait;
use std::sync::Arc;

use keepsake_core::{ConfirmationHook, NotificationError, Order, OrderKey, OrderPatch, OrderStore};

use crate::blob::{qr_key, BlobStore};
use crate::error::Result;
use crate::notify::NotificationDispatcher;
use crate::qr::{QrEncoder, QrOptions};

pub struct PaymentFulfillment {
    store: Arc<dyn OrderStore>,
    blobs: Arc<dyn BlobStore>,
    qr: Arc<dyn QrEncoder>,
    dispatcher: NotificationDispatcher,
    qr_options: QrOptions,
}

impl PaymentFulfillment {
    pub fn new(
        store: Arc<dyn OrderStore>,
        blobs: Arc<dyn BlobStore>,
        qr: Arc<dyn QrEncoder>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            blobs,
            qr,
            dispatcher,
            qr_options: QrOptions::default(),
        }
    }

    /// Render, upload and record the QR image; returns the updated order
    async fn attach_qr(&self, order: &Order) -> Result<Order> {
        let png = self.qr.encode_png(&order.unique_url, &self.qr_options).await?;
        let url = self.blobs.put(&qr_key(&order.id), png, "image/png").await?;

        let updated = self.store.update(
            &OrderKey::Id(order.id),
            OrderPatch {
                qr_code_url: Some(url),
                ..Default::default()
            },
        )?;
        Ok(updated)
    }
}

#[async_trait]
impl ConfirmationHook for PaymentFulfillment {
    async fn order_paid(&self, order: &Order) -> std::result::Result<String, NotificationError> {
        let order = if order.qr_code_url.is_some() {
            order.clone()
        } else {
            match self.attach_qr(order).await {
                Ok(updated) => {
                    tracing::info!(order_id = %updated.id, "QR code stored");
                    updated
                }
                Err(e) => {
                    tracing::error!(
                        order_id = %order.id,
                        error = %e,
                        "QR code generation failed; sending confirmation without it"
                    );
                    order.clone()
                }
            }
        };

        self.dispatcher.send_confirmation(&order).await
    }
}
