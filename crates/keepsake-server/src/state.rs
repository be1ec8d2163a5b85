//! Application State

use std::collections::HashMap;
use std::sync::Arc;

use keepsake_core::{OrderStore, ProviderFamily};
use keepsake_payments::{CheckoutSessionFactory, Reconciler, WebhookAdapter};
use keepsake_runtime::{BlobStore, GeoRouter};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Order store, partitioned by provider family
    pub store: Arc<dyn OrderStore>,

    /// Photo and QR storage
    pub blobs: Arc<dyn BlobStore>,

    /// Client IP to provider family
    pub geo: Arc<GeoRouter>,

    /// Checkout adapters for the configured families
    pub checkout: Arc<CheckoutSessionFactory>,

    /// Applies webhook statuses and fires the confirmation hook
    pub reconciler: Arc<Reconciler>,

    /// Webhook adapters (a family is absent if its credentials are missing)
    pub webhooks: Arc<HashMap<ProviderFamily, Arc<dyn WebhookAdapter>>>,

    /// Origin of memorial pages
    pub public_base_url: Arc<str>,
}
