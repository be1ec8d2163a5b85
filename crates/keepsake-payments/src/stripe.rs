//! Stripe Checkout Integration
//!
//! Hosted checkout sessions for the international card family. Sessions carry
//! `orderId`, `customSlug` and `email` metadata, which the webhook side reads
//! back to find the order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use stripe::{
    CheckoutSession as StripeSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, Event, EventObject, EventType, StripeError, Webhook,
    WebhookError,
};

use keepsake_core::{Order, OrderId, OrderPatch, PaymentStatus, Plan, ProviderFamily};

use crate::checkout::{CheckoutProvider, CheckoutSession};
use crate::error::{PaymentError, Result};
use crate::http::{require_env, REQUEST_TIMEOUT};
use crate::webhook::{Correlation, InboundWebhook, ReconcileOutcome, Reconciler, WebhookAdapter};

pub const PROVIDER: &str = "stripe";

/// Stripe configuration
#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Price id per plan
    pub price_ids: HashMap<Plan, String>,
    /// API origin override, `None` for api.stripe.com
    pub api_base: Option<String>,
    pub timeout: Duration,
}

impl StripeConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;

        let mut price_ids = HashMap::new();
        for (plan, key) in [
            (Plan::Basic, "STRIPE_PRICE_BASIC"),
            (Plan::Premium, "STRIPE_PRICE_PREMIUM"),
        ] {
            match require_env(key) {
                Ok(price) => {
                    price_ids.insert(plan, price);
                }
                Err(_) => tracing::warn!(plan = %plan, "{key} not set; plan unavailable on Stripe"),
            }
        }

        Ok(Self {
            secret_key,
            webhook_secret,
            price_ids,
            api_base: require_env("STRIPE_API_BASE").ok(),
            timeout: REQUEST_TIMEOUT,
        })
    }
}

/// Stripe client wrapper
pub struct StripeCheckout {
    client: Client,
    price_ids: HashMap<Plan, String>,
    timeout: Duration,
}

impl StripeCheckout {
    pub fn new(config: &StripeConfig) -> Self {
        let client = match config.api_base.as_deref() {
            Some(url) => Client::from_url(url, config.secret_key.clone()),
            None => Client::new(config.secret_key.clone()),
        };
        Self {
            client,
            price_ids: config.price_ids.clone(),
            timeout: config.timeout,
        }
    }

    fn price_for(&self, plan: Plan) -> Result<&str> {
        self.price_ids
            .get(&plan)
            .map(String::as_str)
            .ok_or_else(|| PaymentError::Config(format!("no Stripe price configured for {plan}")))
    }
}

fn stripe_error(err: &StripeError) -> PaymentError {
    let status = match err {
        StripeError::Stripe(request) => request.http_status,
        _ => 0,
    };
    PaymentError::provider(PROVIDER, status, err.to_string())
}

#[async_trait]
impl CheckoutProvider for StripeCheckout {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn create_session(&self, order: &Order, plan: Plan) -> Result<CheckoutSession> {
        let price = self.price_for(plan)?;
        let cancel_url = order.cancel_url();
        let order_id = order.id.to_string();

        let mut params = CreateCheckoutSession::new();
        params.customer_email = Some(&order.email);
        params.success_url = Some(&order.unique_url);
        params.cancel_url = Some(&cancel_url);
        params.client_reference_id = Some(&order.custom_slug);
        params.mode = Some(CheckoutSessionMode::Payment);

        let mut metadata = HashMap::new();
        metadata.insert("orderId".to_string(), order_id);
        metadata.insert("customSlug".to_string(), order.custom_slug.clone());
        metadata.insert("email".to_string(), order.email.clone());
        params.metadata = Some(metadata);

        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = tokio::time::timeout(self.timeout, StripeSession::create(&self.client, params))
            .await
            .map_err(|_| PaymentError::provider(PROVIDER, 0, "timeout"))?
            .map_err(|e| stripe_error(&e))?;

        let redirect_url = session
            .url
            .ok_or_else(|| PaymentError::provider(PROVIDER, 200, "no checkout URL returned"))?;

        Ok(CheckoutSession {
            provider: PROVIDER.into(),
            redirect_url,
            session_id: Some(session.id.to_string()),
            provider_order_id: None,
        })
    }
}

/// The parts of a Stripe event the reconciler acts on
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StripeSignal {
    pub event_type: String,
    /// `None` for event types we do not handle
    pub target: Option<PaymentStatus>,
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub custom_slug: Option<String>,
    pub order_id: Option<String>,
}

impl StripeSignal {
    pub fn from_event(event: &Event) -> Result<Self> {
        let target = match event.type_ {
            EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded => {
                Some(PaymentStatus::Paid)
            }
            EventType::CheckoutSessionExpired => Some(PaymentStatus::Cancelled),
            EventType::CheckoutSessionAsyncPaymentFailed => Some(PaymentStatus::Rejected),
            _ => None,
        };
        let event_type = event.type_.to_string();

        if target.is_none() {
            return Ok(Self {
                event_type,
                ..Default::default()
            });
        }

        let EventObject::CheckoutSession(session) = &event.data.object else {
            return Err(PaymentError::WebhookParse(format!(
                "{event_type} without a checkout session"
            )));
        };

        let meta = |key: &str| {
            session
                .metadata
                .as_ref()
                .and_then(|m| m.get(key))
                .filter(|v| !v.trim().is_empty())
                .cloned()
        };

        Ok(Self {
            target,
            session_id: Some(session.id.to_string()),
            payment_intent_id: session.payment_intent.as_ref().map(|p| p.id().to_string()),
            custom_slug: meta("customSlug").or_else(|| session.client_reference_id.clone()),
            order_id: meta("orderId"),
            event_type,
        })
    }

    /// `customSlug` first, then `orderId`
    pub fn correlation(&self) -> Option<Correlation> {
        self.custom_slug
            .clone()
            .map(Correlation::Slug)
            .or_else(|| {
                self.order_id
                    .as_deref()
                    .and_then(OrderId::parse)
                    .map(Correlation::OrderId)
            })
    }
}

/// Stripe webhook adapter
pub struct StripeWebhook {
    webhook_secret: String,
}

impl StripeWebhook {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the `Stripe-Signature` header and parse the event
    ///
    /// A verified body that does not parse is a payload error, not a signature one.
    pub fn parse_event(&self, inbound: &InboundWebhook) -> Result<Event> {
        let header = inbound.require_signature()?;
        Webhook::construct_event(&inbound.body, header, &self.webhook_secret).map_err(|e| match e {
            WebhookError::BadParse(e) => PaymentError::WebhookParse(e.to_string()),
            e => {
                tracing::warn!(security = true, provider = PROVIDER, error = %e, "Rejected webhook with invalid signature");
                PaymentError::WebhookSignature(e.to_string())
            }
        })
    }

    /// Apply an already-authenticated signal
    pub async fn apply_signal(
        &self,
        reconciler: &Reconciler,
        signal: StripeSignal,
    ) -> Result<ReconcileOutcome> {
        let Some(target) = signal.target else {
            tracing::debug!(event_type = %signal.event_type, "Unhandled Stripe event");
            return Ok(ReconcileOutcome::ignored(format!(
                "event '{}' not handled",
                signal.event_type
            )));
        };

        let correlation = signal.correlation().ok_or_else(|| {
            PaymentError::CorrelationNotFound(format!(
                "session:{}",
                signal.session_id.clone().unwrap_or_default()
            ))
        })?;
        let order = reconciler.resolve(ProviderFamily::InternationalCard, &correlation)?;

        tracing::info!(
            order_id = %order.id,
            event_type = %signal.event_type,
            "Stripe checkout event"
        );

        let refs = OrderPatch {
            provider_session_id: signal.session_id,
            provider_payment_id: signal.payment_intent_id,
            provider_status: Some(signal.event_type),
            ..Default::default()
        };

        reconciler.apply(&order, target, refs).await
    }
}

#[async_trait]
impl WebhookAdapter for StripeWebhook {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn reconcile(
        &self,
        reconciler: &Reconciler,
        inbound: &InboundWebhook,
    ) -> Result<ReconcileOutcome> {
        let event = self.parse_event(inbound)?;
        let signal = StripeSignal::from_event(&event)?;
        self.apply_signal(reconciler, signal).await
    }
}
