//! Test fixtures shared with the other workspace crates
//! (enabled through the `test-util` feature).

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Mutex;

use crate::hook::{ConfirmationHook, NotificationError};
use crate::order::{DetectedAddress, Order, OrderId, PaymentStatus, ProviderFamily};
use crate::plan::Plan;
use crate::service::NewOrder;

/// A pending domestic order with the given slug
pub fn sample_order(slug: &str) -> Order {
    sample_order_in(slug, ProviderFamily::Domestic)
}

/// A pending order with the given slug in the given partition
pub fn sample_order_in(slug: &str, family: ProviderFamily) -> Order {
    let now = Utc::now();
    let pricing = Plan::Basic.pricing(family.currency());
    Order {
        id: OrderId::new(),
        provider_family: family,
        custom_slug: slug.to_string(),
        unique_url: format!("https://keepsake.app/{slug}"),
        couple_name: "Ana & Leo".into(),
        start_date: NaiveDate::from_ymd_opt(2020, 2, 14).unwrap_or_default(),
        message: Some("Forever".into()),
        youtube_url: None,
        photos: vec![format!("https://cdn.keepsake.app/{slug}/photos/1.jpg")],
        plan_type: Plan::Basic,
        plan_price: pricing.price,
        currency: pricing.currency,
        payment_status: PaymentStatus::Pending,
        provider_session_id: None,
        provider_payment_id: None,
        provider_order_id: None,
        merchant_order_id: None,
        provider_status: None,
        email: "ana@example.com".into(),
        full_name: Some("Ana Souza Lima".into()),
        phone: Some("(11) 98765-4321".into()),
        address: DetectedAddress::default(),
        address_detected_by: "fallback".into(),
        qr_code_url: None,
        created_at: now,
        updated_at: now,
    }
}

/// A complete form submission for `couple_name`
pub fn new_order(couple_name: &str) -> NewOrder {
    NewOrder {
        id: OrderId::new(),
        provider_family: ProviderFamily::Domestic,
        couple_name: couple_name.into(),
        start_date: NaiveDate::from_ymd_opt(2020, 2, 14),
        message: Some("Forever".into()),
        youtube_url: None,
        photos: vec!["https://cdn.keepsake.app/photo.jpg".into()],
        plan_type: Plan::Basic,
        email: "ana@example.com".into(),
        full_name: None,
        phone: None,
        address: DetectedAddress::default(),
        address_detected_by: "fallback".into(),
    }
}

/// Confirmation hook that records every call
#[derive(Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<Order>>,
    fail: bool,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook whose every call fails after being recorded
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<Order> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfirmationHook for RecordingHook {
    async fn order_paid(&self, order: &Order) -> Result<String, NotificationError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(order.clone());
        }
        if self.fail {
            Err(NotificationError::Transport("smtp down".into()))
        } else {
            Ok(format!("msg-{}", order.id))
        }
    }
}
