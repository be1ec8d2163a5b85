//! Yampi Integration
//!
//! Alternative domestic checkout. Orders are created through the Yampi REST
//! API with a body signed by HMAC-SHA256; the returned checkout URL is moved
//! onto our proxied checkout domain. Webhooks are correlated by the Yampi
//! order id stored at checkout time.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use keepsake_core::{Order, OrderPatch, PaymentStatus, Plan, ProviderFamily};

use crate::checkout::{CheckoutProvider, CheckoutSession};
use crate::error::{PaymentError, Result};
use crate::http::{build_client, env_or, require_env, send_json, REQUEST_TIMEOUT};
use crate::signature;
use crate::webhook::{
    Correlation, InboundWebhook, ProviderId, ReconcileOutcome, Reconciler, WebhookAdapter,
};

pub const PROVIDER: &str = "yampi";
pub const DEFAULT_API_URL: &str = "https://api.dooki.com.br/v2";
pub const SIGNATURE_HEADER: &str = "X-Yampi-Hmac-SHA256";

/// Yampi configuration
#[derive(Clone, Debug)]
pub struct YampiConfig {
    pub api_url: String,
    /// Store alias, the first path segment of every API call
    pub alias: String,
    pub token: String,
    /// Shared secret for request signing and webhook verification
    pub secret: String,
    /// Host that replaces Yampi's own in returned checkout URLs
    pub checkout_domain: Option<String>,
    pub timeout: Duration,
}

impl YampiConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: env_or("YAMPI_API_URL", DEFAULT_API_URL),
            alias: require_env("YAMPI_ALIAS")?,
            token: require_env("YAMPI_TOKEN")?,
            secret: require_env("YAMPI_SECRET")?,
            checkout_domain: require_env("YAMPI_CHECKOUT_DOMAIN").ok(),
            timeout: REQUEST_TIMEOUT,
        })
    }
}

/// Split a full name into first and last; a single word is used for both
pub fn split_name(full_name: &str) -> (String, String) {
    let mut words = full_name.split_whitespace();
    let first = words.next().unwrap_or_default().to_string();
    let rest = words.collect::<Vec<_>>().join(" ");
    if rest.is_empty() {
        (first.clone(), first)
    } else {
        (first, rest)
    }
}

/// Normalize a Brazilian phone number to `+55…` form
pub fn to_e164(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 | 11 => format!("+55{digits}"),
        _ => format!("+{digits}"),
    }
}

/// Replace the host of `checkout_url` with `domain`
pub fn rewrite_host(checkout_url: &str, domain: &str) -> Result<String> {
    let mut url = Url::parse(checkout_url)
        .map_err(|e| PaymentError::provider(PROVIDER, 200, format!("bad checkout URL: {e}")))?;
    url.set_host(Some(domain))
        .map_err(|e| PaymentError::Config(format!("YAMPI_CHECKOUT_DOMAIN: {e}")))?;
    Ok(url.into())
}

#[derive(Serialize)]
struct OrderRequest<'a> {
    customer: Customer<'a>,
    items: Vec<Item<'a>>,
    currency: &'static str,
    metadata: Metadata<'a>,
}

#[derive(Serialize)]
struct Customer<'a> {
    first_name: String,
    last_name: String,
    email: &'a str,
    phone: Phone,
}

#[derive(Serialize)]
struct Phone {
    full_number: String,
}

#[derive(Serialize)]
struct Item<'a> {
    sku: &'static str,
    name: &'a str,
    quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
}

#[derive(Serialize)]
struct Metadata<'a> {
    custom_slug: &'a str,
    order_id: String,
}

#[derive(Deserialize)]
struct OrderResponse {
    data: CreatedOrder,
}

#[derive(Deserialize)]
struct CreatedOrder {
    id: ProviderId,
    checkout_url: String,
}

/// Yampi REST client
pub struct YampiClient {
    http: reqwest::Client,
    config: YampiConfig,
}

impl YampiClient {
    pub fn new(config: YampiConfig) -> Result<Self> {
        Ok(Self {
            http: build_client(PROVIDER, config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl CheckoutProvider for YampiClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn create_session(&self, order: &Order, plan: Plan) -> Result<CheckoutSession> {
        let pricing = plan.pricing(order.currency);
        let (first_name, last_name) = split_name(order.full_name.as_deref().unwrap_or_default());

        let request = OrderRequest {
            customer: Customer {
                first_name,
                last_name,
                email: &order.email,
                phone: Phone {
                    full_number: to_e164(order.phone.as_deref().unwrap_or_default()),
                },
            },
            items: vec![Item {
                sku: plan.as_str(),
                name: &pricing.name,
                quantity: 1,
                price: pricing.price,
            }],
            currency: pricing.currency.code(),
            metadata: Metadata {
                custom_slug: &order.custom_slug,
                order_id: order.id.to_string(),
            },
        };

        // The signature covers these exact bytes
        let body = serde_json::to_vec(&request)
            .map_err(|e| PaymentError::Validation(format!("order payload: {e}")))?;
        let hmac = signature::sign_base64(&self.config.secret, &body);

        let url = format!(
            "{}/{}/orders",
            self.config.api_url.trim_end_matches('/'),
            self.config.alias
        );
        let response: OrderResponse = send_json(
            PROVIDER,
            self.http
                .post(url)
                .header("User-Token", &self.config.token)
                .header(SIGNATURE_HEADER, hmac)
                .header(CONTENT_TYPE, "application/json")
                .body(body),
        )
        .await?;

        let redirect_url = match &self.config.checkout_domain {
            Some(domain) => rewrite_host(&response.data.checkout_url, domain)?,
            None => response.data.checkout_url,
        };

        Ok(CheckoutSession {
            provider: PROVIDER.into(),
            redirect_url,
            session_id: None,
            provider_order_id: Some(response.data.id.to_string()),
        })
    }
}

#[derive(Deserialize)]
struct YampiEvent {
    event: String,
    #[serde(default)]
    resource: Option<YampiResource>,
}

#[derive(Deserialize)]
struct YampiResource {
    id: ProviderId,
    #[serde(default)]
    status: Option<Value>,
}

/// Raw status from either `"status": "paid"` or `"status": {"data": {"alias": "paid"}}`
fn status_alias(status: &Value) -> Option<String> {
    match status {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => status
            .pointer("/data/alias")
            .or_else(|| status.get("alias"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}

/// Yampi webhook adapter
pub struct YampiWebhook {
    secret: String,
}

impl YampiWebhook {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl WebhookAdapter for YampiWebhook {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn reconcile(
        &self,
        reconciler: &Reconciler,
        inbound: &InboundWebhook,
    ) -> Result<ReconcileOutcome> {
        let header = inbound.require_signature()?;
        if !signature::verify_base64(&self.secret, inbound.body.as_bytes(), header) {
            tracing::warn!(security = true, provider = PROVIDER, "Rejected webhook with invalid signature");
            return Err(PaymentError::WebhookSignature("signature mismatch".into()));
        }

        let event: YampiEvent = serde_json::from_str(&inbound.body)
            .map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        let target = match event.event.as_str() {
            "order.paid" => Some(PaymentStatus::Paid),
            "order.canceled" => Some(PaymentStatus::Cancelled),
            "order.status.updated" => None,
            other => {
                tracing::debug!(event = %other, "Unhandled Yampi event");
                return Ok(ReconcileOutcome::ignored(format!("event '{other}' not handled")));
            }
        };

        let resource = event
            .resource
            .ok_or_else(|| PaymentError::WebhookParse("resource missing".into()))?;
        let provider_order_id = resource.id.to_string();
        let order = reconciler.resolve(
            ProviderFamily::DomesticAlt,
            &Correlation::ProviderOrderId(provider_order_id),
        )?;
        let raw_status = resource.status.as_ref().and_then(status_alias);

        tracing::info!(
            order_id = %order.id,
            event = %event.event,
            raw_status = ?raw_status,
            "Yampi order event"
        );

        match target {
            Some(target) => {
                let refs = OrderPatch {
                    provider_status: raw_status.or(Some(event.event)),
                    ..Default::default()
                };
                reconciler.apply(&order, target, refs).await
            }
            None => match raw_status {
                Some(raw) => reconciler.mirror(&order, &raw),
                None => Ok(ReconcileOutcome::ignored("status update without a status")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::testing::{sample_order_in, RecordingHook};
    use keepsake_core::{MemoryOrderStore, OrderKey, OrderStore};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "yampi_secret";

    fn config(api_url: &str, checkout_domain: Option<&str>) -> YampiConfig {
        YampiConfig {
            api_url: api_url.into(),
            alias: "keepsake".into(),
            token: "tok".into(),
            secret: SECRET.into(),
            checkout_domain: checkout_domain.map(String::from),
            timeout: Duration::from_secs(2),
        }
    }

    fn signed(body: &str) -> InboundWebhook {
        InboundWebhook::new(body, Some(signature::sign_base64(SECRET, body.as_bytes())))
    }

    fn setup_with_order(provider_order_id: &str) -> (Arc<MemoryOrderStore>, Arc<RecordingHook>, Reconciler) {
        let store = Arc::new(MemoryOrderStore::new());
        let mut order = sample_order_in("ana-leo", ProviderFamily::DomesticAlt);
        order.provider_order_id = Some(provider_order_id.into());
        store.create(order).unwrap();
        let hook = Arc::new(RecordingHook::new());
        let reconciler = Reconciler::new(store.clone(), hook.clone());
        (store, hook, reconciler)
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("Ana Souza Lima"), ("Ana".into(), "Souza Lima".into()));
        assert_eq!(split_name("  Ana  "), ("Ana".into(), "Ana".into()));
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(to_e164("(11) 98765-4321"), "+5511987654321");
        assert_eq!(to_e164("1133334444"), "+551133334444");
        assert_eq!(to_e164("+55 11 98765-4321"), "+5511987654321");
    }

    #[test]
    fn test_rewrite_host() {
        assert_eq!(
            rewrite_host("https://seguro.yampi.com.br/checkout/abc?x=1", "pay.keepsake.app").unwrap(),
            "https://pay.keepsake.app/checkout/abc?x=1"
        );
    }

    #[tokio::test]
    async fn test_create_order_signs_and_rewrites() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keepsake/orders"))
            .and(header("User-Token", "tok"))
            .and(header_exists(SIGNATURE_HEADER))
            .and(body_partial_json(json!({
                "customer": {
                    "first_name": "Ana",
                    "last_name": "Souza Lima",
                    "phone": { "full_number": "+5511987654321" }
                },
                "metadata": { "custom_slug": "ana-leo" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "id": 4242, "checkout_url": "https://seguro.yampi.com.br/checkout/4242" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = YampiClient::new(config(&server.uri(), Some("pay.keepsake.app"))).unwrap();
        let order = sample_order_in("ana-leo", ProviderFamily::DomesticAlt);
        let session = client.create_session(&order, Plan::Basic).await.unwrap();

        assert_eq!(session.redirect_url, "https://pay.keepsake.app/checkout/4242");
        assert_eq!(session.provider_order_id.as_deref(), Some("4242"));

        let requests = server.received_requests().await.unwrap();
        let sent = &requests[0];
        let signature_value = sent.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert!(signature::verify_base64(SECRET, &sent.body, signature_value));
    }

    #[tokio::test]
    async fn test_create_order_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keepsake/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid customer"))
            .mount(&server)
            .await;

        let client = YampiClient::new(config(&server.uri(), None)).unwrap();
        let order = sample_order_in("ana-leo", ProviderFamily::DomesticAlt);
        let err = client.create_session(&order, Plan::Basic).await.unwrap_err();

        assert!(matches!(err, PaymentError::Provider { provider: "yampi", status: 422, .. }));
    }

    #[tokio::test]
    async fn test_paid_event() {
        let (store, hook, reconciler) = setup_with_order("4242");
        let body = json!({
            "event": "order.paid",
            "resource": { "id": 4242, "status": { "data": { "alias": "paid" } } }
        })
        .to_string();

        let outcome = YampiWebhook::new(SECRET)
            .reconcile(&reconciler, &signed(&body))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied { to: PaymentStatus::Paid, notified: true, .. }));
        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.provider_status.as_deref(), Some("paid"));
        assert_eq!(hook.count(), 1);
    }

    #[tokio::test]
    async fn test_status_update_is_mirrored() {
        let (store, hook, reconciler) = setup_with_order("4242");
        let body = json!({
            "event": "order.status.updated",
            "resource": { "id": "4242", "status": "waiting_payment" }
        })
        .to_string();

        let outcome = YampiWebhook::new(SECRET)
            .reconcile(&reconciler, &signed(&body))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Mirrored { .. }));
        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.provider_status.as_deref(), Some("waiting_payment"));
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(hook.count(), 0);
    }

    #[tokio::test]
    async fn test_paid_on_first_of_two_checkouts() {
        let (store, hook, reconciler) = setup_with_order("1001");
        store
            .update(
                &OrderKey::Slug("ana-leo".into()),
                OrderPatch {
                    provider_order_id: Some("1002".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let body = json!({
            "event": "order.paid",
            "resource": { "id": 1001, "status": { "data": { "alias": "paid" } } }
        })
        .to_string();

        let outcome = YampiWebhook::new(SECRET)
            .reconcile(&reconciler, &signed(&body))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied { to: PaymentStatus::Paid, .. }));
        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(hook.count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_order_and_bad_signature() {
        let (_store, _hook, reconciler) = setup_with_order("4242");
        let body = json!({ "event": "order.paid", "resource": { "id": 1 } }).to_string();
        let webhook = YampiWebhook::new(SECRET);

        let err = webhook.reconcile(&reconciler, &signed(&body)).await.unwrap_err();
        assert!(matches!(err, PaymentError::CorrelationNotFound(_)));

        let forged = InboundWebhook::new(body, Some("AAAA".into()));
        let err = webhook.reconcile(&reconciler, &forged).await.unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));
    }
}
