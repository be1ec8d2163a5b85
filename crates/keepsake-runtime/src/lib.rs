//! # keepsake-runtime
//!
//! External collaborators behind keepsake orders.
//!
//! ## Services
//!
//! - **Geo routing**: client IP to provider family via an ip-api.com style service
//! - **Blob storage**: local filesystem (served at `/uploads`) or in-memory
//! - **QR rendering**: goqr.me style HTTP API
//! - **Email**: Resend REST API
//! - **Fulfillment**: the [`ConfirmationHook`](keepsake_core::ConfirmationHook)
//!   that stores the QR image and sends the confirmation email
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keepsake_runtime::{NotificationDispatcher, PaymentFulfillment, ResendTransport};
//!
//! let dispatcher = NotificationDispatcher::new(Arc::new(ResendTransport::from_env()?));
//! let hook = PaymentFulfillment::new(store.clone(), blobs, qr, dispatcher);
//! let reconciler = Reconciler::new(store, Arc::new(hook));
//! ```

pub mod blob;
pub mod email;
pub mod error;
pub mod fulfillment;
pub mod geo;
pub mod notify;
pub mod qr;

pub use blob::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use email::{EmailTransport, OutgoingEmail, ResendTransport};
pub use error::{Result, RuntimeError};
pub use fulfillment::PaymentFulfillment;
pub use geo::{GeoDetection, GeoIpLookup, GeoRouter, IpApiClient};
pub use notify::NotificationDispatcher;
pub use qr::{HttpQrEncoder, QrEncoder, QrOptions};
