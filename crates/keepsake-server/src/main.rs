//! keepsake HTTP Server
//!
//! Axum-based server for memorial page orders: order creation and editing,
//! hosted checkout, and payment webhooks for Mercado Pago, Stripe and Yampi.

mod config;
mod error;
mod handlers;
mod routes;
mod state;

use std::collections::HashMap;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keepsake_core::{ConfirmationHook, LoggingConfirmationHook, MemoryOrderStore, OrderStore, ProviderFamily};
use keepsake_payments::{
    CheckoutSessionFactory, MercadoPagoClient, MercadoPagoConfig, MercadoPagoWebhook, Reconciler,
    StripeCheckout, StripeConfig, StripeWebhook, WebhookAdapter, YampiClient, YampiConfig, YampiWebhook,
};
use keepsake_runtime::{
    BlobStore, GeoRouter, HttpQrEncoder, IpApiClient, NotificationDispatcher,
    PaymentFulfillment, ResendTransport,
};

use crate::config::AppConfig;
use crate::routes::build_router;
use crate::state::AppState;

type Webhooks = HashMap<ProviderFamily, Arc<dyn WebhookAdapter>>;

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Filter from `RUST_LOG`; `.env` must already be loaded
fn log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    )
}

/// Register every provider whose credentials are present
fn payment_providers(config: &AppConfig) -> anyhow::Result<(CheckoutSessionFactory, Webhooks)> {
    let mut checkout = CheckoutSessionFactory::new();
    let mut webhooks: Webhooks = HashMap::new();

    match MercadoPagoConfig::from_env(&config.webhook_base_url) {
        Ok(mp) => {
            let secret = mp.webhook_secret.clone();
            let client = Arc::new(MercadoPagoClient::new(mp)?);
            checkout = checkout.with(ProviderFamily::Domestic, client.clone());
            webhooks.insert(
                ProviderFamily::Domestic,
                Arc::new(MercadoPagoWebhook::new(secret, client)),
            );
            tracing::info!("✓ Mercado Pago configured");
        }
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Mercado Pago not configured - domestic payments disabled");
        }
    }

    match StripeConfig::from_env() {
        Ok(stripe) => {
            checkout = checkout.with(
                ProviderFamily::InternationalCard,
                Arc::new(StripeCheckout::new(&stripe)),
            );
            webhooks.insert(
                ProviderFamily::InternationalCard,
                Arc::new(StripeWebhook::new(stripe.webhook_secret)),
            );
            tracing::info!("✓ Stripe configured");
        }
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Stripe not configured - card payments disabled");
            tracing::warn!("  Set STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET in .env");
        }
    }

    match YampiConfig::from_env() {
        Ok(yampi) => {
            let secret = yampi.secret.clone();
            checkout = checkout.with(ProviderFamily::DomesticAlt, Arc::new(YampiClient::new(yampi)?));
            webhooks.insert(ProviderFamily::DomesticAlt, Arc::new(YampiWebhook::new(secret)));
            tracing::info!("✓ Yampi configured");
        }
        Err(e) => {
            tracing::debug!(error = %e, "Yampi not configured");
        }
    }

    if !checkout.is_configured(config.domestic_provider) {
        tracing::warn!(
            provider = config.domestic_provider.provider_name(),
            "⚠ Domestic provider has no credentials; domestic checkouts will fail"
        );
    }

    Ok((checkout, webhooks))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Storage
    let store: Arc<dyn OrderStore> = Arc::new(MemoryOrderStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(config.blob_store());

    // Payment confirmation
    let hook: Arc<dyn ConfirmationHook> = match ResendTransport::from_env() {
        Ok(transport) => {
            tracing::info!("✓ Resend configured");
            Arc::new(PaymentFulfillment::new(
                store.clone(),
                blobs.clone(),
                Arc::new(HttpQrEncoder::from_env()?),
                NotificationDispatcher::new(Arc::new(transport)),
            ))
        }
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Email not configured - paid orders are only logged");
            Arc::new(LoggingConfirmationHook)
        }
    };

    let (checkout, webhooks) = payment_providers(&config)?;

    let geo = GeoRouter::new(Arc::new(IpApiClient::from_env()?))
        .domestic_country(config.domestic_country.clone())
        .domestic_provider(config.domestic_provider);

    // Build application state
    let state = AppState {
        store: store.clone(),
        blobs,
        geo: Arc::new(geo),
        checkout: Arc::new(checkout),
        reconciler: Arc::new(Reconciler::new(store, hook)),
        webhooks: Arc::new(webhooks),
        public_base_url: Arc::from(config.public_base_url.as_str()),
    };

    let app = build_router(state, &config.upload_dir);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("keepsake server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET   /health                - Health check");
    tracing::info!("  POST  /api/orders            - Create order");
    tracing::info!("  GET   /api/orders/{{slug}}     - Memorial page data");
    tracing::info!("  PATCH /api/orders/{{slug}}     - Edit pending order");
    tracing::info!("  POST  /api/checkout          - Create checkout session");
    tracing::info!("  POST  /webhooks/mercadopago  - Mercado Pago notifications");
    tracing::info!("  POST  /webhooks/stripe       - Stripe events");
    tracing::info!("  POST  /webhooks/yampi        - Yampi events");

    axum::serve(listener, app).await?;

    Ok(())
}
