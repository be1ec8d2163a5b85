//! # keepsake-payments
//!
//! Checkout sessions and webhook reconciliation for the three payment
//! processors behind keepsake orders.
//!
//! | Family               | Processor    | Checkout                 | Webhook correlation          |
//! |----------------------|--------------|--------------------------|------------------------------|
//! | `domestic`           | Mercado Pago | Checkout Pro preference  | payment `external_reference` |
//! | `international_card` | Stripe       | Hosted checkout session  | `customSlug` / `orderId`     |
//! | `domestic_alt`       | Yampi        | Signed order + proxy URL | Yampi order id               |
//!
//! ## Checkout
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │  /checkout  │────▶│  Provider hosted │────▶│  unique_url │
//! │             │     │   payment page   │     │             │
//! └─────────────┘     └──────────────────┘     └─────────────┘
//!        │                     │
//!        ▼                     ▼ webhook
//!  provider refs        ┌──────────────┐   first `paid`   ┌──────────────┐
//!  on the order         │  Reconciler  │─────────────────▶│ Confirmation │
//!                       └──────────────┘                  │     hook     │
//!                                                         └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keepsake_payments::{begin_checkout, CheckoutSessionFactory, StripeCheckout, StripeConfig};
//!
//! let factory = CheckoutSessionFactory::new()
//!     .with(ProviderFamily::InternationalCard, Arc::new(StripeCheckout::new(&StripeConfig::from_env()?)));
//!
//! let session = begin_checkout(store.as_ref(), &factory, "ana-leo", contact, Plan::Basic).await?;
//! // Redirect the customer to: session.redirect_url
//! ```

mod checkout;
mod error;
mod http;
pub mod mercadopago;
pub mod signature;
pub mod stripe;
mod webhook;
pub mod yampi;

pub use checkout::{begin_checkout, CheckoutContact, CheckoutProvider, CheckoutSession, CheckoutSessionFactory};
pub use error::{PaymentError, Result};
pub use http::REQUEST_TIMEOUT;
pub use mercadopago::{MercadoPagoClient, MercadoPagoConfig, MercadoPagoWebhook, PaymentLookup};
pub use self::stripe::{StripeCheckout, StripeConfig, StripeSignal, StripeWebhook};
pub use webhook::{Correlation, InboundWebhook, ProviderId, ReconcileOutcome, Reconciler, WebhookAdapter};
pub use yampi::{YampiClient, YampiConfig, YampiWebhook};
