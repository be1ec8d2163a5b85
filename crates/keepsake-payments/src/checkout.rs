//! Checkout Session Factory
//!
//! One entry point for minting a hosted payment page, dispatching on the
//! order's provider family to a [`CheckoutProvider`] adapter.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌──────────────┐
//! │  /checkout  │────▶│  Provider hosted │────▶│  unique_url  │
//! │   (order)   │     │   payment page   │     │  (success)   │
//! └─────────────┘     └──────────────────┘     └──────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use keepsake_core::order::redact_email;
use keepsake_core::{
    Order, OrderError, OrderKey, OrderPatch, OrderStore, PaymentStatus, Plan, ProviderFamily,
};

use crate::error::{PaymentError, Result};

/// Result of creating a checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider name (`mercadopago`, `stripe`, `yampi`)
    pub provider: String,

    /// URL to redirect the customer to
    pub redirect_url: String,

    /// Preference id or Stripe session id
    #[serde(default)]
    pub session_id: Option<String>,

    /// Provider's own order id, used to correlate later webhooks
    #[serde(default)]
    pub provider_order_id: Option<String>,
}

/// One hosted-checkout integration
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &'static str;

    /// Mint a checkout session for `order`
    async fn create_session(&self, order: &Order, plan: Plan) -> Result<CheckoutSession>;
}

/// Provider registry keyed by family
#[derive(Clone, Default)]
pub struct CheckoutSessionFactory {
    providers: HashMap<ProviderFamily, Arc<dyn CheckoutProvider>>,
}

impl CheckoutSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapter for `family`
    #[must_use]
    pub fn with(mut self, family: ProviderFamily, provider: Arc<dyn CheckoutProvider>) -> Self {
        self.providers.insert(family, provider);
        self
    }

    pub fn is_configured(&self, family: ProviderFamily) -> bool {
        self.providers.contains_key(&family)
    }

    /// Families with a registered adapter
    pub fn configured(&self) -> Vec<ProviderFamily> {
        ProviderFamily::ALL
            .into_iter()
            .filter(|f| self.is_configured(*f))
            .collect()
    }

    /// Dispatch on `order.provider_family`
    pub async fn create_session(&self, order: &Order, plan: Plan) -> Result<CheckoutSession> {
        let provider = self.providers.get(&order.provider_family).ok_or_else(|| {
            PaymentError::Config(format!(
                "no checkout provider configured for {}",
                order.provider_family
            ))
        })?;

        tracing::info!(
            order_id = %order.id,
            provider = provider.name(),
            plan = %plan,
            "Creating checkout session"
        );

        provider.create_session(order, plan).await
    }
}

/// Contact details collected on the checkout form
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutContact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl CheckoutContact {
    fn into_patch(self) -> OrderPatch {
        fn non_blank(value: Option<String>) -> Option<String> {
            value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        }

        OrderPatch {
            email: non_blank(self.email),
            full_name: non_blank(self.full_name),
            phone: non_blank(self.phone),
            ..Default::default()
        }
    }
}

/// Record contact details on a pending order, mint a session and attach the
/// provider references to the order.
pub async fn begin_checkout(
    store: &dyn OrderStore,
    factory: &CheckoutSessionFactory,
    slug: &str,
    contact: CheckoutContact,
    plan: Plan,
) -> Result<CheckoutSession> {
    let key = OrderKey::from(slug);
    let order = store
        .find(&key)?
        .ok_or_else(|| OrderError::NotFound(slug.to_string()))?;

    if order.payment_status != PaymentStatus::Pending {
        return Err(OrderError::ContentLocked(order.payment_status).into());
    }
    if order.plan_type != plan {
        return Err(PaymentError::Validation(format!(
            "order was created for the {} plan, not {plan}",
            order.plan_type
        )));
    }

    let patch = contact.into_patch();
    let order = if patch.touches_customer_fields() {
        store.update(&key, patch)?
    } else {
        order
    };

    let missing = order.missing_contact_fields();
    if !missing.is_empty() {
        return Err(PaymentError::Validation(format!(
            "missing contact fields: {}",
            missing.join(", ")
        )));
    }

    let session = factory.create_session(&order, plan).await?;

    store.update(
        &OrderKey::Id(order.id),
        OrderPatch {
            provider_session_id: session.session_id.clone(),
            provider_order_id: session.provider_order_id.clone(),
            ..Default::default()
        },
    )?;

    tracing::info!(
        order_id = %order.id,
        provider = %session.provider,
        email = %redact_email(&order.email),
        "Checkout session created"
    );

    Ok(session)
}
