//! Webhook Reconciliation
//!
//! Every provider adapter follows the same four steps:
//!
//! 1. **Authenticate** the raw body against the provider's signature scheme
//! 2. **Resolve** the order through the provider's own correlation key
//! 3. **Map** the provider's status vocabulary onto [`PaymentStatus`]
//! 4. **Apply** through [`Reconciler::apply`], which performs the single
//!    conditional status write and fires the confirmation hook for the one
//!    write that reaches `paid`
//!
//! Skipped transitions (repeats, regressions) still succeed so that the
//! provider stops retrying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use keepsake_core::status::Verdict;
use keepsake_core::{
    ConfirmationHook, Order, OrderId, OrderKey, OrderPatch, OrderStore, PaymentStatus,
    ProviderFamily, Transition, TransitionSource,
};

use crate::error::{PaymentError, Result};

/// A webhook delivery as received over HTTP
#[derive(Clone, Debug, Default)]
pub struct InboundWebhook {
    /// Raw body, exactly as signed by the provider
    pub body: String,
    /// Value of the provider's signature header
    pub signature: Option<String>,
    /// Query string parameters
    pub query: HashMap<String, String>,
}

impl InboundWebhook {
    pub fn new(body: impl Into<String>, signature: Option<String>) -> Self {
        Self {
            body: body.into(),
            signature,
            query: HashMap::new(),
        }
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub(crate) fn require_signature(&self) -> Result<&str> {
        self.signature
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PaymentError::WebhookSignature("missing signature header".into()))
    }
}

/// How a provider points at one of our orders
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Correlation {
    /// Mercado Pago `external_reference`, Stripe `customSlug` metadata
    Slug(String),
    /// Stripe `orderId` metadata
    OrderId(OrderId),
    /// Yampi order id stored at checkout
    ProviderOrderId(String),
}

impl std::fmt::Display for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slug(slug) => write!(f, "slug:{slug}"),
            Self::OrderId(id) => write!(f, "order:{id}"),
            Self::ProviderOrderId(id) => write!(f, "provider_order:{id}"),
        }
    }
}

/// Provider identifiers arrive as JSON numbers or strings
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProviderId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s.trim()),
        }
    }
}

/// What a delivery did to the order
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Status written
    Applied {
        slug: String,
        from: PaymentStatus,
        to: PaymentStatus,
        /// Confirmation hook ran and succeeded
        notified: bool,
    },
    /// Repeat or illegal transition
    Skipped {
        slug: String,
        current: PaymentStatus,
        requested: PaymentStatus,
    },
    /// Raw provider status copied, canonical status untouched
    Mirrored { slug: String, provider_status: String },
    /// Event type or status we do not act on
    Ignored { reason: String },
}

impl ReconcileOutcome {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

/// Per-provider webhook adapter
#[async_trait]
pub trait WebhookAdapter: Send + Sync {
    /// Provider name used in logs and routes
    fn provider(&self) -> &'static str;

    /// Authenticate, resolve, map and apply one delivery
    async fn reconcile(
        &self,
        reconciler: &Reconciler,
        inbound: &InboundWebhook,
    ) -> Result<ReconcileOutcome>;
}

/// Applies mapped webhook statuses onto the order store
pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    hook: Arc<dyn ConfirmationHook>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn OrderStore>, hook: Arc<dyn ConfirmationHook>) -> Self {
        Self { store, hook }
    }

    pub fn store(&self) -> &dyn OrderStore {
        self.store.as_ref()
    }

    /// Find the order a delivery refers to.
    ///
    /// Orders owned by another provider family are treated as unknown.
    pub fn resolve(&self, family: ProviderFamily, correlation: &Correlation) -> Result<Order> {
        let found = match correlation {
            Correlation::Slug(slug) => self.store.find_by_slug(slug)?,
            Correlation::OrderId(id) => self.store.find_by_id(id)?,
            Correlation::ProviderOrderId(id) => self.store.find_by_provider_order_id(family, id)?,
        };

        match found {
            Some(order) if order.provider_family == family => Ok(order),
            Some(order) => {
                tracing::warn!(
                    correlation = %correlation,
                    owner = %order.provider_family,
                    caller = %family,
                    "Webhook references an order owned by another provider"
                );
                Err(PaymentError::CorrelationNotFound(correlation.to_string()))
            }
            None => {
                tracing::warn!(
                    correlation = %correlation,
                    family = %family,
                    "Webhook references an unknown order"
                );
                Err(PaymentError::CorrelationNotFound(correlation.to_string()))
            }
        }
    }

    /// Conditionally move the order to `to`, recording provider references
    /// in the same write.
    ///
    /// The confirmation hook runs only when this call performed the
    /// transition into `paid`. Hook failures are logged and swallowed.
    pub async fn apply(&self, order: &Order, to: PaymentStatus, refs: OrderPatch) -> Result<ReconcileOutcome> {
        let transition = self.store.transition_with_refs(
            &OrderKey::Id(order.id),
            to,
            TransitionSource::Webhook,
            refs,
        )?;
        let first_payment = transition.is_first_payment();

        match transition {
            Transition::Applied { from, to, order } => {
                tracing::info!(
                    order_id = %order.id,
                    slug = %order.custom_slug,
                    family = %order.provider_family,
                    from = %from,
                    to = %to,
                    "Payment status updated"
                );

                let notified = if first_payment {
                    self.confirm(&order).await
                } else {
                    false
                };

                Ok(ReconcileOutcome::Applied {
                    slug: order.custom_slug,
                    from,
                    to,
                    notified,
                })
            }
            Transition::Skipped {
                requested,
                verdict,
                order,
            } => {
                if verdict == Verdict::Illegal {
                    tracing::warn!(
                        order_id = %order.id,
                        current = %order.payment_status,
                        requested = %requested,
                        "Ignoring transition not allowed by the state machine"
                    );
                } else {
                    tracing::info!(
                        order_id = %order.id,
                        status = %requested,
                        "Duplicate webhook, status already applied"
                    );
                }

                Ok(ReconcileOutcome::Skipped {
                    slug: order.custom_slug,
                    current: order.payment_status,
                    requested,
                })
            }
        }
    }

    /// Copy the provider's raw status without touching `payment_status`
    pub fn mirror(&self, order: &Order, provider_status: &str) -> Result<ReconcileOutcome> {
        let updated = self.store.update(
            &OrderKey::Id(order.id),
            OrderPatch {
                provider_status: Some(provider_status.to_string()),
                ..Default::default()
            },
        )?;

        tracing::info!(
            order_id = %updated.id,
            provider_status = %provider_status,
            "Mirrored provider status"
        );

        Ok(ReconcileOutcome::Mirrored {
            slug: updated.custom_slug,
            provider_status: provider_status.to_string(),
        })
    }

    async fn confirm(&self, order: &Order) -> bool {
        match self.hook.order_paid(order).await {
            Ok(message_id) => {
                tracing::info!(
                    order_id = %order.id,
                    message_id = %message_id,
                    "Confirmation sent"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    error = %e,
                    "Confirmation failed; payment stays confirmed"
                );
                false
            }
        }
    }
}
