//! Order Creation
//!
//! Validates a form submission, allocates a unique slug and inserts a
//! `pending` order. Insert races on the slug are retried with the next suffix.

use chrono::{NaiveDate, Utc};

use crate::error::{OrderError, Result};
use crate::order::{redact_email, DetectedAddress, Order, OrderId, PaymentStatus, ProviderFamily};
use crate::plan::Plan;
use crate::slug::{generate_unique_slug, slugify};
use crate::store::OrderStore;

/// Insert attempts before giving up with `SlugExhausted`
pub const MAX_CREATE_ATTEMPTS: usize = 5;

/// A validated-on-create order request
#[derive(Clone, Debug)]
pub struct NewOrder {
    /// Pre-allocated so photos can be uploaded under the order's prefix first
    pub id: OrderId,
    pub provider_family: ProviderFamily,
    pub couple_name: String,
    pub start_date: Option<NaiveDate>,
    pub message: Option<String>,
    pub youtube_url: Option<String>,
    pub photos: Vec<String>,
    pub plan_type: Plan,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: DetectedAddress,
    pub address_detected_by: String,
}

/// Minimum fields for an order: couple name, a start date, one photo and an email
pub fn validate_submission(
    couple_name: &str,
    start_date: Option<NaiveDate>,
    photo_count: usize,
    email: &str,
) -> Result<()> {
    let mut problems = Vec::new();
    if couple_name.trim().is_empty() {
        problems.push("couple name is required");
    }
    if start_date.is_none() {
        problems.push("start date is required");
    }
    if photo_count == 0 {
        problems.push("at least one photo is required");
    }
    if !looks_like_email(email) {
        problems.push("a valid email is required");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(OrderError::Validation(problems.join(", ")))
    }
}

/// Loose shape check; the payment provider does the real verification
pub fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
}

/// Create a `pending` order with a globally unique slug
pub fn create_order<S: OrderStore + ?Sized>(
    store: &S,
    new: NewOrder,
    public_base_url: &str,
) -> Result<Order> {
    validate_submission(&new.couple_name, new.start_date, new.photos.len(), &new.email)?;
    let start_date = new
        .start_date
        .ok_or_else(|| OrderError::Validation("start date is required".into()))?;

    let base_url = public_base_url.trim_end_matches('/');
    let pricing = new.plan_type.pricing(new.provider_family.currency());
    let mut next_suffix = 0;

    for attempt in 1..=MAX_CREATE_ATTEMPTS {
        let (slug, suffix) = generate_unique_slug(store, &new.couple_name, next_suffix)?;
        let now = Utc::now();

        let order = Order {
            id: new.id,
            provider_family: new.provider_family,
            unique_url: format!("{base_url}/{slug}"),
            custom_slug: slug,
            couple_name: new.couple_name.trim().to_string(),
            start_date,
            message: new.message.clone(),
            youtube_url: new.youtube_url.clone(),
            photos: new.photos.clone(),
            plan_type: new.plan_type,
            plan_price: pricing.price,
            currency: pricing.currency,
            payment_status: PaymentStatus::Pending,
            provider_session_id: None,
            provider_payment_id: None,
            provider_order_id: None,
            merchant_order_id: None,
            provider_status: None,
            email: new.email.trim().to_string(),
            full_name: new.full_name.clone(),
            phone: new.phone.clone(),
            address: new.address.clone(),
            address_detected_by: new.address_detected_by.clone(),
            qr_code_url: None,
            created_at: now,
            updated_at: now,
        };

        match store.create(order) {
            Ok(order) => {
                tracing::info!(
                    order_id = %order.id,
                    slug = %order.custom_slug,
                    family = %order.provider_family,
                    email = %redact_email(&order.email),
                    "Created order"
                );
                return Ok(order);
            }
            Err(OrderError::DuplicateSlug(taken)) => {
                tracing::warn!(slug = %taken, attempt, "Slug taken on insert, retrying");
                next_suffix = suffix + 1;
            }
            Err(e) => return Err(e),
        }
    }

    Err(OrderError::SlugExhausted {
        base: slugify(&new.couple_name),
        attempts: MAX_CREATE_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;
    use crate::store::{MemoryOrderStore, OrderKey, OrderPatch, Transition};
    use crate::status::TransitionSource;
    use crate::testing::new_order;
    use std::sync::Arc;

    #[test]
    fn test_first_order_gets_plain_slug() {
        let store = MemoryOrderStore::new();
        let order = create_order(&store, new_order("Ana & Leo"), "https://keepsake.app/").unwrap();

        assert_eq!(order.custom_slug, "ana-leo");
        assert_eq!(order.unique_url, "https://keepsake.app/ana-leo");
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.cancel_url(), "https://keepsake.app/create");
    }

    #[test]
    fn test_second_order_gets_suffix() {
        let store = MemoryOrderStore::new();
        create_order(&store, new_order("Ana & Leo"), "https://keepsake.app").unwrap();
        let mut second = new_order("Ana & Leo");
        second.provider_family = ProviderFamily::InternationalCard;
        let second = create_order(&store, second, "https://keepsake.app").unwrap();

        assert_eq!(second.custom_slug, "ana-leo-1");
        assert_eq!(second.unique_url, "https://keepsake.app/ana-leo-1");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let store = MemoryOrderStore::new();
        let mut new = new_order("  ");
        new.photos.clear();
        new.start_date = None;
        new.email = "nope".into();

        let err = create_order(&store, new, "https://keepsake.app").unwrap_err();
        match err {
            OrderError::Validation(msg) => {
                assert!(msg.contains("couple name"));
                assert!(msg.contains("start date"));
                assert!(msg.contains("photo"));
                assert!(msg.contains("email"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.exists_by_slug("memorial").unwrap());
    }

    /// Store whose existence check always lies, so every insert collides
    struct RacingStore(MemoryOrderStore);

    impl OrderStore for RacingStore {
        fn create(&self, order: Order) -> Result<Order> {
            Err(OrderError::DuplicateSlug(order.custom_slug))
        }
        fn find_by_slug(&self, slug: &str) -> Result<Option<Order>> {
            self.0.find_by_slug(slug)
        }
        fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>> {
            self.0.find_by_id(id)
        }
        fn find_by_provider_order_id(
            &self,
            family: ProviderFamily,
            provider_order_id: &str,
        ) -> Result<Option<Order>> {
            self.0.find_by_provider_order_id(family, provider_order_id)
        }
        fn exists_by_slug(&self, _slug: &str) -> Result<bool> {
            Ok(false)
        }
        fn update(&self, key: &OrderKey, patch: OrderPatch) -> Result<Order> {
            self.0.update(key, patch)
        }
        fn transition_with_refs(
            &self,
            key: &OrderKey,
            to: PaymentStatus,
            source: TransitionSource,
            refs: OrderPatch,
        ) -> Result<Transition> {
            self.0.transition_with_refs(key, to, source, refs)
        }
    }

    #[test]
    fn test_insert_races_exhaust() {
        let store = RacingStore(MemoryOrderStore::new());
        let err = create_order(&store, new_order("Ana & Leo"), "https://keepsake.app").unwrap_err();
        assert!(matches!(
            err,
            OrderError::SlugExhausted { ref base, attempts: MAX_CREATE_ATTEMPTS } if base == "ana-leo"
        ));
    }

    #[test]
    fn test_concurrent_creation_yields_distinct_slugs() {
        let store = Arc::new(MemoryOrderStore::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    create_order(store.as_ref(), new_order("Ana & Leo"), "https://keepsake.app")
                        .map(|o| o.custom_slug)
                })
            })
            .collect();

        let mut slugs: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        slugs.sort();
        slugs.dedup();
        assert_eq!(slugs.len(), 4);
        assert!(slugs.contains(&"ana-leo".to_string()));
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("ana@example.com"));
        assert!(!looks_like_email("ana@example"));
        assert!(!looks_like_email("@example.com"));
    }
}
