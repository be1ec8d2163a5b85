//! HTTP Handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use keepsake_core::service::validate_submission;
use keepsake_core::status::expiry_due;
use keepsake_core::{
    create_order, NewOrder, Order, OrderError, OrderId, OrderKey, OrderPatch, PaymentStatus, Plan,
    OrderStore, ProviderFamily, Transition, TransitionSource,
};
use keepsake_payments::{begin_checkout, CheckoutContact, InboundWebhook, ReconcileOutcome};
use keepsake_runtime::blob::photo_key;
use keepsake_runtime::GeoDetection;

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Providers with checkout credentials
    pub providers: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUpload {
    pub content_type: String,
    /// Base64, optionally as a `data:` URL
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub couple_name: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
    #[serde(default)]
    pub photos: Vec<PhotoUpload>,
    #[serde(default)]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Explicit family; geo routing decides when absent
    #[serde(default)]
    pub provider: Option<ProviderFamily>,
}

/// Order as shown on the public memorial page (no contact details)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicOrder {
    pub slug: String,
    pub unique_url: String,
    pub couple_name: String,
    pub start_date: NaiveDate,
    pub message: Option<String>,
    pub youtube_url: Option<String>,
    pub photos: Vec<String>,
    pub plan_type: Plan,
    pub provider_family: ProviderFamily,
    pub payment_status: PaymentStatus,
    pub qr_code_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for PublicOrder {
    fn from(order: Order) -> Self {
        Self {
            slug: order.custom_slug,
            unique_url: order.unique_url,
            couple_name: order.couple_name,
            start_date: order.start_date,
            message: order.message,
            youtube_url: order.youtube_url,
            photos: order.photos,
            plan_type: order.plan_type,
            provider_family: order.provider_family,
            payment_status: order.payment_status,
            qr_code_url: order.qr_code_url,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order: PublicOrder,
    pub geo: GeoDetection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    /// Owner gate: must match the email the order was created with
    pub email: String,
    #[serde(default)]
    pub couple_name: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
    #[serde(default)]
    pub photos: Option<Vec<PhotoUpload>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorialData {
    pub slug: String,
    #[serde(flatten)]
    pub contact: CheckoutContact,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub plan_type: Option<String>,
    pub memorial_data: MemorialData,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_plan(raw: Option<&str>) -> Result<Plan, ApiError> {
    match raw {
        None => Ok(Plan::default()),
        Some(raw) => Plan::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown plan '{raw}'"))),
    }
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

fn photo_extension(content_type: &str) -> Option<&'static str> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn decode_photo(photo: &PhotoUpload) -> Result<(Vec<u8>, &'static str), ApiError> {
    let ext = photo_extension(&photo.content_type).ok_or_else(|| {
        ApiError::BadRequest(format!("unsupported photo type '{}'", photo.content_type))
    })?;
    let data = photo
        .data
        .split_once(";base64,")
        .map_or(photo.data.as_str(), |(_, encoded)| encoded);
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::BadRequest(format!("photo is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty photo".into()));
    }
    Ok((bytes, ext))
}

/// A photo that decoded and is ready to store
struct DecodedPhoto<'a> {
    bytes: Vec<u8>,
    extension: &'static str,
    content_type: &'a str,
}

/// Decode every photo before anything is written
fn decode_photos(photos: &[PhotoUpload]) -> Result<Vec<DecodedPhoto<'_>>, ApiError> {
    photos
        .iter()
        .map(|photo| {
            let (bytes, extension) = decode_photo(photo)?;
            Ok(DecodedPhoto {
                bytes,
                extension,
                content_type: &photo.content_type,
            })
        })
        .collect()
}

/// Photos written for one order, as `(key, url)` pairs
#[derive(Default)]
struct StoredPhotos(Vec<(String, String)>);

impl StoredPhotos {
    fn urls(&self) -> Vec<String> {
        self.0.iter().map(|(_, url)| url.clone()).collect()
    }

    /// Best-effort removal once the order will not exist
    async fn discard(self, state: &AppState) {
        for (key, _) in self.0 {
            if let Err(e) = state.blobs.delete(&key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove orphaned photo");
            }
        }
    }
}

/// Store photos under the order's prefix; a failed write removes the ones already stored
async fn upload_photos(
    state: &AppState,
    order_id: &OrderId,
    photos: Vec<DecodedPhoto<'_>>,
) -> Result<StoredPhotos, ApiError> {
    let mut stored = StoredPhotos::default();
    for photo in photos {
        let key = photo_key(order_id, &uuid::Uuid::new_v4().to_string(), photo.extension);
        match state.blobs.put(&key, photo.bytes, photo.content_type).await {
            Ok(url) => stored.0.push((key, url)),
            Err(e) => {
                stored.discard(state).await;
                return Err(OrderError::Storage(e.to_string()).into());
            }
        }
    }
    Ok(stored)
}

fn find_order(state: &AppState, slug: &str) -> Result<Order, ApiError> {
    state
        .store
        .find_by_slug(slug)?
        .ok_or_else(|| OrderError::NotFound(slug.to_string()).into())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        providers: state
            .checkout
            .configured()
            .iter()
            .map(ProviderFamily::provider_name)
            .collect(),
    })
}

/// Create a pending order from the form
pub async fn create_order_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let plan = parse_plan(payload.plan_type.as_deref())?;
    validate_submission(
        &payload.couple_name,
        payload.start_date,
        payload.photos.len(),
        &payload.email,
    )?;

    let ip = client_ip(&headers);
    let geo = state.geo.detect(ip.as_deref()).await;
    let family = state.geo.select_family(payload.provider, &geo);

    let decoded = decode_photos(&payload.photos)?;
    let id = OrderId::new();
    let stored = upload_photos(&state, &id, decoded).await?;

    let created = create_order(
        state.store.as_ref(),
        NewOrder {
            id,
            provider_family: family,
            couple_name: payload.couple_name,
            start_date: payload.start_date,
            message: payload.message,
            youtube_url: payload.youtube_url,
            photos: stored.urls(),
            plan_type: plan,
            email: payload.email,
            full_name: payload.full_name,
            phone: payload.phone,
            address: geo.address(),
            address_detected_by: geo.source.to_string(),
        },
        &state.public_base_url,
    );
    let order = match created {
        Ok(order) => order,
        Err(e) => {
            stored.discard(&state).await;
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order: order.into(),
            geo,
        }),
    ))
}

/// Public memorial view; applies the lazy expiry rule
pub async fn get_order(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PublicOrder>, ApiError> {
    let order = find_order(&state, &slug)?;
    let order = expire_if_due(state.store.as_ref(), order, Utc::now())?;
    Ok(Json(order.into()))
}

/// Lazy expiry: a stale order moves to `expired` when it is read
fn expire_if_due(store: &dyn OrderStore, order: Order, now: DateTime<Utc>) -> Result<Order, ApiError> {
    if !expiry_due(&order, now) {
        return Ok(order);
    }

    let transition = store.transition_status(
        &OrderKey::Id(order.id),
        PaymentStatus::Expired,
        TransitionSource::Expiry,
    )?;
    if let Transition::Applied { from, .. } = &transition {
        tracing::info!(order_id = %order.id, from = %from, "Order expired");
    }
    Ok(transition.into_order())
}

/// Owner-gated content edit, allowed while pending
pub async fn update_order(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Json<PublicOrder>, ApiError> {
    let order = find_order(&state, &slug)?;
    if !order.is_owned_by(&payload.email) {
        return Err(OrderError::Forbidden("email does not match the order".into()).into());
    }
    if order.payment_status != PaymentStatus::Pending {
        return Err(OrderError::ContentLocked(order.payment_status).into());
    }

    let stored = match &payload.photos {
        Some(photos) if photos.is_empty() => {
            return Err(OrderError::Validation("at least one photo is required".into()).into());
        }
        Some(photos) => Some(upload_photos(&state, &order.id, decode_photos(photos)?).await?),
        None => None,
    };

    let updated = state.store.update(
        &OrderKey::Id(order.id),
        OrderPatch {
            couple_name: payload.couple_name.filter(|n| !n.trim().is_empty()),
            start_date: payload.start_date,
            message: payload.message,
            youtube_url: payload.youtube_url,
            photos: stored.as_ref().map(StoredPhotos::urls),
            ..Default::default()
        },
    );
    let updated = match updated {
        Ok(order) => order,
        Err(e) => {
            if let Some(stored) = stored {
                stored.discard(&state).await;
            }
            return Err(e.into());
        }
    };

    tracing::info!(order_id = %updated.id, "Order content updated");
    Ok(Json(updated.into()))
}

/// Mint a checkout session for a pending order
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let plan = parse_plan(payload.plan_type.as_deref())?;
    let session = begin_checkout(
        state.store.as_ref(),
        &state.checkout,
        &payload.memorial_data.slug,
        payload.memorial_data.contact,
        plan,
    )
    .await?;

    Ok(Json(CheckoutResponse {
        url: session.redirect_url,
    }))
}

async fn handle_webhook(
    state: &AppState,
    family: ProviderFamily,
    signature_header: &str,
    headers: &HeaderMap,
    query: HashMap<String, String>,
    body: String,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    let adapter = state
        .webhooks
        .get(&family)
        .ok_or(ApiError::Disabled(family.provider_name()))?;

    let signature = headers
        .get(signature_header)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let inbound = InboundWebhook::new(body, signature).with_query(query);

    let outcome = adapter.reconcile(&state.reconciler, &inbound).await?;
    tracing::debug!(provider = adapter.provider(), outcome = ?outcome, "Webhook processed");
    Ok(Json(outcome))
}

/// Mercado Pago payment notifications
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    handle_webhook(&state, ProviderFamily::Domestic, "x-signature", &headers, query, body).await
}

/// Stripe checkout events
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    handle_webhook(
        &state,
        ProviderFamily::InternationalCard,
        "stripe-signature",
        &headers,
        HashMap::new(),
        body,
    )
    .await
}

/// Yampi order events
pub async fn yampi_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    handle_webhook(
        &state,
        ProviderFamily::DomesticAlt,
        "x-yampi-hmac-sha256",
        &headers,
        HashMap::new(),
        body,
    )
    .await
}

/// Bare `OPTIONS` on webhook routes (CORS preflights are answered by the CORS layer)
pub async fn webhook_options() -> impl IntoResponse {
    (StatusCode::OK, [(header::ALLOW, "POST, OPTIONS")])
}
