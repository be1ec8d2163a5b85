//! Mercado Pago Integration
//!
//! Checkout Pro preferences for the domestic family, plus the payment
//! notification adapter. Notifications carry only a payment id; the payment
//! itself is fetched back through [`PaymentLookup`] and correlated by its
//! `external_reference`, which is the order slug.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use keepsake_core::{Order, OrderPatch, PaymentStatus, Plan, ProviderFamily};

use crate::checkout::{CheckoutProvider, CheckoutSession};
use crate::error::{PaymentError, Result};
use crate::http::{build_client, env_or, require_env, send_json, REQUEST_TIMEOUT};
use crate::signature;
use crate::webhook::{
    Correlation, InboundWebhook, ProviderId, ReconcileOutcome, Reconciler, WebhookAdapter,
};

pub const PROVIDER: &str = "mercadopago";
pub const DEFAULT_API_URL: &str = "https://api.mercadopago.com";

/// Mercado Pago configuration
#[derive(Clone, Debug)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub webhook_secret: String,
    pub api_url: String,
    /// Absolute URL of our `/webhooks/mercadopago` route
    pub notification_url: String,
    /// Redirect to `sandbox_init_point` instead of `init_point`
    pub sandbox: bool,
    pub timeout: Duration,
}

impl MercadoPagoConfig {
    /// Create from environment variables.
    ///
    /// `webhook_base_url` is the public origin providers can reach.
    pub fn from_env(webhook_base_url: &str) -> Result<Self> {
        let access_token = require_env("MERCADOPAGO_ACCESS_TOKEN")?;
        let webhook_secret = require_env("MERCADOPAGO_WEBHOOK_SECRET")?;
        let sandbox = std::env::var("MERCADOPAGO_SANDBOX")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            access_token,
            webhook_secret,
            api_url: env_or("MERCADOPAGO_API_URL", DEFAULT_API_URL),
            notification_url: format!(
                "{}/webhooks/mercadopago",
                webhook_base_url.trim_end_matches('/')
            ),
            sandbox,
            timeout: REQUEST_TIMEOUT,
        })
    }
}

/// Mercado Pago status vocabulary onto ours.
///
/// Returns `None` for statuses with no counterpart.
pub fn map_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "approved" => Some(PaymentStatus::Paid),
        "pending" | "in_process" | "authorized" => Some(PaymentStatus::Pending),
        "rejected" => Some(PaymentStatus::Rejected),
        "refunded" => Some(PaymentStatus::Refunded),
        "cancelled" => Some(PaymentStatus::Cancelled),
        "in_mediation" => Some(PaymentStatus::Disputed),
        "charged_back" => Some(PaymentStatus::Chargeback),
        _ => None,
    }
}

/// Payment as returned by `GET /v1/payments/{id}`
#[derive(Clone, Debug, Deserialize)]
pub struct MpPayment {
    pub id: ProviderId,
    pub status: String,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub order: Option<MpMerchantOrder>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MpMerchantOrder {
    pub id: ProviderId,
}

/// Fetches payment details referenced by a notification
#[async_trait]
pub trait PaymentLookup: Send + Sync {
    async fn fetch_payment(&self, payment_id: &str) -> Result<MpPayment>;
}

#[derive(Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem<'a>>,
    payer: Payer<'a>,
    back_urls: BackUrls<'a>,
    auto_return: &'static str,
    notification_url: &'a str,
    external_reference: &'a str,
}

#[derive(Serialize)]
struct PreferenceItem<'a> {
    id: &'static str,
    title: &'a str,
    description: &'a str,
    quantity: u32,
    currency_id: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
}

#[derive(Serialize)]
struct Payer<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct BackUrls<'a> {
    success: &'a str,
    failure: &'a str,
    pending: &'a str,
}

#[derive(Deserialize)]
struct PreferenceResponse {
    id: String,
    #[serde(default)]
    init_point: Option<String>,
    #[serde(default)]
    sandbox_init_point: Option<String>,
}

/// Mercado Pago REST client
pub struct MercadoPagoClient {
    http: reqwest::Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> Result<Self> {
        Ok(Self {
            http: build_client(PROVIDER, config.timeout)?,
            config,
        })
    }

    pub fn config(&self) -> &MercadoPagoConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CheckoutProvider for MercadoPagoClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn create_session(&self, order: &Order, plan: Plan) -> Result<CheckoutSession> {
        let pricing = plan.pricing(order.currency);
        let cancel_url = order.cancel_url();

        let request = PreferenceRequest {
            items: vec![PreferenceItem {
                id: plan.as_str(),
                title: &pricing.name,
                description: &pricing.description,
                quantity: 1,
                currency_id: pricing.currency.code(),
                unit_price: pricing.price,
            }],
            payer: Payer {
                email: &order.email,
                name: order.full_name.as_deref(),
            },
            back_urls: BackUrls {
                success: &order.unique_url,
                failure: &cancel_url,
                pending: &cancel_url,
            },
            auto_return: "approved",
            notification_url: &self.config.notification_url,
            external_reference: &order.custom_slug,
        };

        let preference: PreferenceResponse = send_json(
            PROVIDER,
            self.http
                .post(self.url("/checkout/preferences"))
                .bearer_auth(&self.config.access_token)
                .json(&request),
        )
        .await?;

        let init_point = if self.config.sandbox {
            preference.sandbox_init_point.or(preference.init_point)
        } else {
            preference.init_point
        };
        let redirect_url = init_point
            .ok_or_else(|| PaymentError::provider(PROVIDER, 200, "no init_point returned"))?;

        Ok(CheckoutSession {
            provider: PROVIDER.into(),
            redirect_url,
            session_id: Some(preference.id),
            provider_order_id: None,
        })
    }
}

#[async_trait]
impl PaymentLookup for MercadoPagoClient {
    async fn fetch_payment(&self, payment_id: &str) -> Result<MpPayment> {
        send_json(
            PROVIDER,
            self.http
                .get(self.url(&format!("/v1/payments/{payment_id}")))
                .bearer_auth(&self.config.access_token),
        )
        .await
    }
}

#[derive(Default, Deserialize)]
struct Notification {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<NotificationData>,
}

#[derive(Default, Deserialize)]
struct NotificationData {
    #[serde(default)]
    id: Option<ProviderId>,
}

/// Payment id carried in the query string
fn query_payment_id(inbound: &InboundWebhook) -> Option<String> {
    inbound
        .query
        .get("data.id")
        .or_else(|| inbound.query.get("id"))
        .filter(|id| !id.is_empty())
        .cloned()
}

/// Text signed when the payment id travels in the query: `id:{payment_id};{body}`
pub fn signed_manifest(payment_id: &str, body: &str) -> String {
    format!("id:{payment_id};{body}")
}

/// Payment notification adapter
pub struct MercadoPagoWebhook {
    secret: String,
    lookup: Arc<dyn PaymentLookup>,
}

impl MercadoPagoWebhook {
    pub fn new(secret: impl Into<String>, lookup: Arc<dyn PaymentLookup>) -> Self {
        Self {
            secret: secret.into(),
            lookup,
        }
    }

    /// Check `x-signature`; returns the query payment id when the signature covers it
    fn authenticate(&self, inbound: &InboundWebhook) -> Result<Option<String>> {
        let header = inbound.require_signature()?;
        if let Some(id) = query_payment_id(inbound) {
            if signature::verify_hex(&self.secret, signed_manifest(&id, &inbound.body).as_bytes(), header) {
                return Ok(Some(id));
            }
        }
        if signature::verify_hex(&self.secret, inbound.body.as_bytes(), header) {
            return Ok(None);
        }
        tracing::warn!(security = true, provider = PROVIDER, "Rejected webhook with invalid signature");
        Err(PaymentError::WebhookSignature("signature mismatch".into()))
    }

    fn parse(inbound: &InboundWebhook) -> Result<Notification> {
        if inbound.body.trim().is_empty() {
            return Ok(Notification::default());
        }
        serde_json::from_str(&inbound.body).map_err(|e| PaymentError::WebhookParse(e.to_string()))
    }
}

#[async_trait]
impl WebhookAdapter for MercadoPagoWebhook {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn reconcile(
        &self,
        reconciler: &Reconciler,
        inbound: &InboundWebhook,
    ) -> Result<ReconcileOutcome> {
        let signed_query_id = self.authenticate(inbound)?;
        let notification = Self::parse(inbound)?;

        let topic = notification
            .kind
            .or(notification.topic)
            .or_else(|| inbound.query.get("type").cloned())
            .or_else(|| inbound.query.get("topic").cloned());
        let is_payment = topic.as_deref() == Some("payment")
            || notification
                .action
                .as_deref()
                .is_some_and(|a| a.starts_with("payment."));
        if !is_payment {
            let topic = topic.unwrap_or_default();
            tracing::debug!(topic = %topic, "Ignoring non-payment notification");
            return Ok(ReconcileOutcome::ignored(format!("topic '{topic}' not handled")));
        }

        let body_id = notification
            .data
            .and_then(|d| d.id)
            .map(|id| id.to_string())
            .filter(|id| !id.is_empty());
        let payment_id = match (body_id, signed_query_id) {
            (Some(id), _) | (None, Some(id)) => id,
            (None, None) if query_payment_id(inbound).is_some() => {
                tracing::warn!(security = true, provider = PROVIDER, "Rejected payment id outside the signature");
                return Err(PaymentError::WebhookSignature(
                    "payment id not covered by signature".into(),
                ));
            }
            (None, None) => return Err(PaymentError::WebhookParse("payment id missing".into())),
        };

        let payment = self.lookup.fetch_payment(&payment_id).await?;
        let slug = payment
            .external_reference
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| PaymentError::CorrelationNotFound(format!("payment:{payment_id}")))?;

        let order = reconciler.resolve(ProviderFamily::Domestic, &Correlation::Slug(slug))?;

        tracing::info!(
            order_id = %order.id,
            payment_id = %payment_id,
            status = %payment.status,
            detail = ?payment.status_detail,
            "Mercado Pago payment notification"
        );

        let Some(target) = map_status(&payment.status) else {
            return reconciler.mirror(&order, &payment.status);
        };

        let refs = OrderPatch {
            provider_payment_id: Some(payment.id.to_string()),
            merchant_order_id: payment.order.as_ref().map(|o| o.id.to_string()),
            provider_status: Some(payment.status.clone()),
            ..Default::default()
        };

        reconciler.apply(&order, target, refs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::testing::{sample_order, sample_order_in, RecordingHook};
    use keepsake_core::{MemoryOrderStore, OrderStore};
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "mp_secret";

    fn config(api_url: &str) -> MercadoPagoConfig {
        MercadoPagoConfig {
            access_token: "TEST-token".into(),
            webhook_secret: SECRET.into(),
            api_url: api_url.into(),
            notification_url: "https://keepsake.app/webhooks/mercadopago".into(),
            sandbox: false,
            timeout: Duration::from_secs(2),
        }
    }

    async fn mount_payment(server: &MockServer, id: u64, status: &str, reference: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/payments/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "status": status,
                "status_detail": "accredited",
                "external_reference": reference,
                "order": { "id": 998_877 }
            })))
            .mount(server)
            .await;
    }

    fn signed(body: &str) -> InboundWebhook {
        InboundWebhook::new(body, Some(signature::sign_hex(SECRET, body.as_bytes())))
    }

    fn setup(server: &MockServer) -> (Arc<MemoryOrderStore>, Arc<RecordingHook>, Reconciler, MercadoPagoWebhook) {
        let store = Arc::new(MemoryOrderStore::new());
        let hook = Arc::new(RecordingHook::new());
        let reconciler = Reconciler::new(store.clone(), hook.clone());
        let client = MercadoPagoClient::new(config(&server.uri())).unwrap();
        let adapter = MercadoPagoWebhook::new(SECRET, Arc::new(client));
        (store, hook, reconciler, adapter)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("approved"), Some(PaymentStatus::Paid));
        assert_eq!(map_status("in_process"), Some(PaymentStatus::Pending));
        assert_eq!(map_status("in_mediation"), Some(PaymentStatus::Disputed));
        assert_eq!(map_status("charged_back"), Some(PaymentStatus::Chargeback));
        assert_eq!(map_status("something_new"), None);
    }

    #[tokio::test]
    async fn test_create_preference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .and(header("authorization", "Bearer TEST-token"))
            .and(body_partial_json(json!({
                "external_reference": "ana-leo",
                "auto_return": "approved",
                "notification_url": "https://keepsake.app/webhooks/mercadopago",
                "back_urls": {
                    "success": "https://keepsake.app/ana-leo",
                    "failure": "https://keepsake.app/create"
                },
                "items": [{ "quantity": 1, "currency_id": "BRL", "unit_price": 29.9 }]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pref-1",
                "init_point": "https://mp.example/checkout?pref=pref-1",
                "sandbox_init_point": "https://sandbox.mp.example/checkout?pref=pref-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = MercadoPagoClient::new(config(&server.uri())).unwrap();
        let session = client
            .create_session(&sample_order("ana-leo"), Plan::Basic)
            .await
            .unwrap();

        assert_eq!(session.redirect_url, "https://mp.example/checkout?pref=pref-1");
        assert_eq!(session.session_id.as_deref(), Some("pref-1"));
    }

    #[tokio::test]
    async fn test_preference_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid payer"))
            .mount(&server)
            .await;

        let client = MercadoPagoClient::new(config(&server.uri())).unwrap();
        let err = client
            .create_session(&sample_order("ana-leo"), Plan::Basic)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PaymentError::Provider { provider: "mercadopago", status: 400, ref message } if message == "invalid payer"
        ));
    }

    #[tokio::test]
    async fn test_approved_payment_marks_paid_and_redelivery_is_noop() {
        let server = MockServer::start().await;
        mount_payment(&server, 123, "approved", "ana-leo").await;
        let (store, hook, reconciler, adapter) = setup(&server);
        store.create(sample_order("ana-leo")).unwrap();

        let body = r#"{"type":"payment","action":"payment.updated","data":{"id":"123"}}"#;
        let first = adapter.reconcile(&reconciler, &signed(body)).await.unwrap();
        assert!(matches!(
            first,
            ReconcileOutcome::Applied { to: PaymentStatus::Paid, notified: true, .. }
        ));

        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.provider_payment_id.as_deref(), Some("123"));
        assert_eq!(stored.merchant_order_id.as_deref(), Some("998877"));
        assert_eq!(hook.count(), 1);

        let again = adapter.reconcile(&reconciler, &signed(body)).await.unwrap();
        assert!(matches!(again, ReconcileOutcome::Skipped { current: PaymentStatus::Paid, .. }));
        assert_eq!(hook.count(), 1);
    }

    #[tokio::test]
    async fn test_payment_id_from_query() {
        let server = MockServer::start().await;
        mount_payment(&server, 77, "rejected", "ana-leo").await;
        let (store, hook, reconciler, adapter) = setup(&server);
        store.create(sample_order("ana-leo")).unwrap();

        let query = HashMap::from([
            ("topic".to_string(), "payment".to_string()),
            ("id".to_string(), "77".to_string()),
        ]);
        let inbound = InboundWebhook::new(
            "",
            Some(signature::sign_hex(SECRET, signed_manifest("77", "").as_bytes())),
        )
        .with_query(query);
        let outcome = adapter.reconcile(&reconciler, &inbound).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied { to: PaymentStatus::Rejected, .. }));
        assert_eq!(hook.count(), 0);
    }

    #[tokio::test]
    async fn test_query_id_must_be_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/78"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (store, hook, reconciler, adapter) = setup(&server);
        store.create(sample_order("ana-leo")).unwrap();

        // Signature lifted from a delivery for payment 77
        let replayed = signature::sign_hex(SECRET, signed_manifest("77", "").as_bytes());
        let query = HashMap::from([
            ("topic".to_string(), "payment".to_string()),
            ("id".to_string(), "78".to_string()),
        ]);
        let err = adapter
            .reconcile(&reconciler, &InboundWebhook::new("", Some(replayed)).with_query(query.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));

        // A valid signature over the empty body alone does not vouch for the id
        let err = adapter
            .reconcile(&reconciler, &signed("").with_query(query))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));

        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(hook.count(), 0);
    }

    #[tokio::test]
    async fn test_tampered_body_rejected_without_change() {
        let server = MockServer::start().await;
        mount_payment(&server, 123, "approved", "ana-leo").await;
        let (store, hook, reconciler, adapter) = setup(&server);
        store.create(sample_order("ana-leo")).unwrap();

        let signature = signature::sign_hex(SECRET, br#"{"type":"payment","data":{"id":"1"}}"#);
        let inbound = InboundWebhook::new(
            r#"{"type":"payment","data":{"id":"123"}}"#,
            Some(format!("ts=1700000000,v1={signature}")),
        );

        let err = adapter.reconcile(&reconciler, &inbound).await.unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));

        let missing = adapter
            .reconcile(&reconciler, &InboundWebhook::new("{}", None))
            .await
            .unwrap_err();
        assert!(matches!(missing, PaymentError::WebhookSignature(_)));

        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(hook.count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_not_found() {
        let server = MockServer::start().await;
        mount_payment(&server, 5, "approved", "nobody").await;
        let (_store, _hook, reconciler, adapter) = setup(&server);

        let err = adapter
            .reconcile(&reconciler, &signed(r#"{"type":"payment","data":{"id":5}}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::CorrelationNotFound(_)));
    }

    #[tokio::test]
    async fn test_other_family_order_is_not_found() {
        let server = MockServer::start().await;
        mount_payment(&server, 5, "approved", "ana-leo").await;
        let (store, hook, reconciler, adapter) = setup(&server);
        store
            .create(sample_order_in("ana-leo", ProviderFamily::InternationalCard))
            .unwrap();

        let err = adapter
            .reconcile(&reconciler, &signed(r#"{"type":"payment","data":{"id":5}}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::CorrelationNotFound(_)));
        assert_eq!(hook.count(), 0);
    }

    #[tokio::test]
    async fn test_non_payment_topic_ignored() {
        let server = MockServer::start().await;
        let (_store, _hook, reconciler, adapter) = setup(&server);

        let outcome = adapter
            .reconcile(&reconciler, &signed(r#"{"type":"merchant_order","data":{"id":"9"}}"#))
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        let (_store, _hook, reconciler, adapter) = setup(&server);

        let err = adapter
            .reconcile(&reconciler, &signed("not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::WebhookParse(_)));
    }
}
