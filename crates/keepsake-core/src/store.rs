//! Order Storage
//!
//! Orders are partitioned by [`ProviderFamily`]. Slugs are unique across all
//! partitions, and every status change goes through
//! [`OrderStore::transition_status`], a single conditional update that
//! checks the state machine and writes under the same lock.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{OrderError, Result};
use crate::order::{Order, OrderId, PaymentStatus, ProviderFamily};
use crate::status::{self, TransitionSource, Verdict};

/// Addresses an order by id or by slug
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderKey {
    Id(OrderId),
    Slug(String),
}

impl From<OrderId> for OrderKey {
    fn from(id: OrderId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for OrderKey {
    fn from(slug: &str) -> Self {
        Self::Slug(slug.to_string())
    }
}

impl std::fmt::Display for OrderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Slug(slug) => write!(f, "slug:{slug}"),
        }
    }
}

/// Partial update.
///
/// Has no fields for `provider_family`, `custom_slug`,
/// `unique_url` or `payment_status`.
#[derive(Clone, Debug, Default)]
pub struct OrderPatch {
    pub couple_name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub message: Option<String>,
    pub youtube_url: Option<String>,
    pub photos: Option<Vec<String>>,

    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,

    pub provider_session_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_order_id: Option<String>,
    pub merchant_order_id: Option<String>,
    pub provider_status: Option<String>,

    pub qr_code_url: Option<String>,
}

impl OrderPatch {
    /// Whether the patch edits customer-supplied fields
    pub const fn touches_customer_fields(&self) -> bool {
        self.couple_name.is_some()
            || self.start_date.is_some()
            || self.message.is_some()
            || self.youtube_url.is_some()
            || self.photos.is_some()
            || self.email.is_some()
            || self.full_name.is_some()
            || self.phone.is_some()
    }

    /// Whether applying the patch would change a provider reference on `order`
    pub fn changes_provider_refs(&self, order: &Order) -> bool {
        fn differs(current: Option<&String>, new: Option<&String>) -> bool {
            new.is_some() && new != current
        }

        differs(order.provider_session_id.as_ref(), self.provider_session_id.as_ref())
            || differs(order.provider_payment_id.as_ref(), self.provider_payment_id.as_ref())
            || differs(order.provider_order_id.as_ref(), self.provider_order_id.as_ref())
            || differs(order.merchant_order_id.as_ref(), self.merchant_order_id.as_ref())
            || differs(order.provider_status.as_ref(), self.provider_status.as_ref())
    }

    fn apply(self, order: &mut Order) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }
        fn set_opt<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut order.couple_name, self.couple_name);
        set(&mut order.start_date, self.start_date);
        set_opt(&mut order.message, self.message);
        set_opt(&mut order.youtube_url, self.youtube_url);
        set(&mut order.photos, self.photos);
        set(&mut order.email, self.email);
        set_opt(&mut order.full_name, self.full_name);
        set_opt(&mut order.phone, self.phone);
        set_opt(&mut order.provider_session_id, self.provider_session_id);
        set_opt(&mut order.provider_payment_id, self.provider_payment_id);
        set_opt(&mut order.provider_order_id, self.provider_order_id);
        set_opt(&mut order.merchant_order_id, self.merchant_order_id);
        set_opt(&mut order.provider_status, self.provider_status);
        set_opt(&mut order.qr_code_url, self.qr_code_url);
    }
}

/// Result of a conditional status update
#[derive(Clone, Debug)]
pub enum Transition {
    /// Status was written
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
        order: Order,
    },
    /// Repeat or illegal transition; status untouched
    Skipped {
        requested: PaymentStatus,
        verdict: Verdict,
        order: Order,
    },
}

impl Transition {
    pub const fn order(&self) -> &Order {
        match self {
            Self::Applied { order, .. } | Self::Skipped { order, .. } => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Self::Applied { order, .. } | Self::Skipped { order, .. } => order,
        }
    }

    /// True only for the write that moved the order into `paid`
    pub fn is_first_payment(&self) -> bool {
        matches!(
            self,
            Self::Applied { from, to: PaymentStatus::Paid, .. } if *from != PaymentStatus::Paid
        )
    }
}

/// Order storage trait
pub trait OrderStore: Send + Sync {
    /// Insert a new order; fails with `DuplicateSlug` if the slug is taken in any partition
    fn create(&self, order: Order) -> Result<Order>;

    /// Find by slug across all partitions
    fn find_by_slug(&self, slug: &str) -> Result<Option<Order>>;

    /// Find by id across all partitions
    fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>>;

    /// Find by the provider's own order id within one partition.
    ///
    /// Ids replaced by a later checkout still resolve.
    fn find_by_provider_order_id(
        &self,
        family: ProviderFamily,
        provider_order_id: &str,
    ) -> Result<Option<Order>>;

    fn exists_by_slug(&self, slug: &str) -> Result<bool>;

    /// Partial update; bumps `updated_at`
    fn update(&self, key: &OrderKey, patch: OrderPatch) -> Result<Order>;

    /// Check-and-write `payment_status` atomically
    fn transition_status(
        &self,
        key: &OrderKey,
        to: PaymentStatus,
        source: TransitionSource,
    ) -> Result<Transition> {
        self.transition_with_refs(key, to, source, OrderPatch::default())
    }

    /// [`transition_status`](Self::transition_status) that also records
    /// provider references in the same write.
    ///
    /// `refs` lands only when the transition applies, or when a pending
    /// order sees `pending` again. Illegal and other repeated deliveries
    /// leave the order untouched.
    fn transition_with_refs(
        &self,
        key: &OrderKey,
        to: PaymentStatus,
        source: TransitionSource,
        refs: OrderPatch,
    ) -> Result<Transition>;

    /// Convenience lookup by key
    fn find(&self, key: &OrderKey) -> Result<Option<Order>> {
        match key {
            OrderKey::Id(id) => self.find_by_id(id),
            OrderKey::Slug(slug) => self.find_by_slug(slug),
        }
    }
}

#[derive(Default)]
struct Partitions {
    orders: HashMap<ProviderFamily, HashMap<OrderId, Order>>,
    /// Global unique index: slug → owning partition
    slugs: HashMap<String, (ProviderFamily, OrderId)>,
    ids: HashMap<OrderId, ProviderFamily>,
    /// Every provider order id ever recorded, including superseded ones
    provider_orders: HashMap<(ProviderFamily, String), OrderId>,
}

impl Partitions {
    fn locate(&self, key: &OrderKey) -> Option<(ProviderFamily, OrderId)> {
        match key {
            OrderKey::Id(id) => self.ids.get(id).map(|family| (*family, *id)),
            OrderKey::Slug(slug) => self.slugs.get(slug).copied(),
        }
    }

    fn get(&self, key: &OrderKey) -> Option<&Order> {
        let (family, id) = self.locate(key)?;
        self.orders.get(&family)?.get(&id)
    }

    fn get_mut(&mut self, key: &OrderKey) -> Option<&mut Order> {
        let (family, id) = self.locate(key)?;
        self.orders.get_mut(&family)?.get_mut(&id)
    }

    fn index_provider_order(&mut self, order: &Order) {
        if let Some(provider_order_id) = &order.provider_order_id {
            self.provider_orders
                .insert((order.provider_family, provider_order_id.clone()), order.id);
        }
    }
}

/// In-memory partitioned order store
pub struct MemoryOrderStore {
    inner: RwLock<Partitions>,
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Partitions::default()),
        }
    }

    /// Number of orders in one partition
    pub fn partition_len(&self, family: ProviderFamily) -> Result<usize> {
        Ok(self.read()?.orders.get(&family).map_or(0, HashMap::len))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Partitions>> {
        self.inner
            .read()
            .map_err(|_| OrderError::Storage("order store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Partitions>> {
        self.inner
            .write()
            .map_err(|_| OrderError::Storage("order store lock poisoned".into()))
    }
}

impl OrderStore for MemoryOrderStore {
    fn create(&self, order: Order) -> Result<Order> {
        let mut inner = self.write()?;

        if inner.slugs.contains_key(&order.custom_slug) {
            return Err(OrderError::DuplicateSlug(order.custom_slug));
        }
        if inner.ids.contains_key(&order.id) {
            return Err(OrderError::Storage(format!("order id {} already exists", order.id)));
        }

        inner
            .slugs
            .insert(order.custom_slug.clone(), (order.provider_family, order.id));
        inner.ids.insert(order.id, order.provider_family);
        inner.index_provider_order(&order);
        inner
            .orders
            .entry(order.provider_family)
            .or_default()
            .insert(order.id, order.clone());

        Ok(order)
    }

    fn find_by_slug(&self, slug: &str) -> Result<Option<Order>> {
        Ok(self.read()?.get(&OrderKey::Slug(slug.to_string())).cloned())
    }

    fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>> {
        Ok(self.read()?.get(&OrderKey::Id(*id)).cloned())
    }

    fn find_by_provider_order_id(
        &self,
        family: ProviderFamily,
        provider_order_id: &str,
    ) -> Result<Option<Order>> {
        let inner = self.read()?;
        Ok(inner
            .provider_orders
            .get(&(family, provider_order_id.to_string()))
            .and_then(|id| inner.orders.get(&family)?.get(id))
            .cloned())
    }

    fn exists_by_slug(&self, slug: &str) -> Result<bool> {
        Ok(self.read()?.slugs.contains_key(slug))
    }

    fn update(&self, key: &OrderKey, patch: OrderPatch) -> Result<Order> {
        let mut inner = self.write()?;
        let order = inner
            .get_mut(key)
            .ok_or_else(|| OrderError::NotFound(key.to_string()))?;

        if patch.touches_customer_fields() && order.payment_status != PaymentStatus::Pending {
            return Err(OrderError::ContentLocked(order.payment_status));
        }

        patch.apply(order);
        order.updated_at = Utc::now();
        let order = order.clone();
        inner.index_provider_order(&order);
        Ok(order)
    }

    fn transition_with_refs(
        &self,
        key: &OrderKey,
        to: PaymentStatus,
        source: TransitionSource,
        refs: OrderPatch,
    ) -> Result<Transition> {
        if refs.touches_customer_fields() {
            return Err(OrderError::Validation(
                "status transitions only carry provider references".into(),
            ));
        }

        let mut inner = self.write()?;
        let order = inner
            .get_mut(key)
            .ok_or_else(|| OrderError::NotFound(key.to_string()))?;

        let from = order.payment_status;
        let verdict = status::check(from, to, source);
        let write_refs = match verdict {
            Verdict::Apply => true,
            Verdict::Repeat => from == PaymentStatus::Pending && refs.changes_provider_refs(order),
            Verdict::Illegal => false,
        };

        if write_refs {
            refs.apply(order);
            order.updated_at = Utc::now();
        }
        if verdict == Verdict::Apply {
            order.payment_status = to;
        }

        let order = order.clone();
        if write_refs {
            inner.index_provider_order(&order);
        }

        Ok(match verdict {
            Verdict::Apply => Transition::Applied { from, to, order },
            verdict => Transition::Skipped {
                requested: to,
                verdict,
                order,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_order, sample_order_in};
    use std::sync::Arc;

    #[test]
    fn test_create_and_find() {
        let store = MemoryOrderStore::new();
        let order = store.create(sample_order("ana-leo")).unwrap();

        let by_slug = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(by_slug.id, order.id);
        let by_id = store.find_by_id(&order.id).unwrap().unwrap();
        assert_eq!(by_id.custom_slug, "ana-leo");
        assert!(store.exists_by_slug("ana-leo").unwrap());
        assert!(!store.exists_by_slug("bia-caio").unwrap());
    }

    #[test]
    fn test_slug_unique_across_partitions() {
        let store = MemoryOrderStore::new();
        store
            .create(sample_order_in("ana-leo", ProviderFamily::Domestic))
            .unwrap();

        let result = store.create(sample_order_in("ana-leo", ProviderFamily::InternationalCard));
        assert!(matches!(result, Err(OrderError::DuplicateSlug(s)) if s == "ana-leo"));
        assert_eq!(store.partition_len(ProviderFamily::InternationalCard).unwrap(), 0);
    }

    #[test]
    fn test_find_by_provider_order_id_is_partition_scoped() {
        let store = MemoryOrderStore::new();
        let mut order = sample_order_in("ana-leo", ProviderFamily::DomesticAlt);
        order.provider_order_id = Some("9001".into());
        store.create(order).unwrap();

        assert!(store
            .find_by_provider_order_id(ProviderFamily::DomesticAlt, "9001")
            .unwrap()
            .is_some());
        assert!(store
            .find_by_provider_order_id(ProviderFamily::Domestic, "9001")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_bumps_timestamp() {
        let store = MemoryOrderStore::new();
        let created = store.create(sample_order("ana-leo")).unwrap();

        let updated = store
            .update(
                &OrderKey::from("ana-leo"),
                OrderPatch {
                    provider_session_id: Some("pref_123".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.provider_session_id.as_deref(), Some("pref_123"));
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.custom_slug, created.custom_slug);
        assert_eq!(updated.unique_url, created.unique_url);
    }

    #[test]
    fn test_content_locked_after_payment() {
        let store = MemoryOrderStore::new();
        let order = store.create(sample_order("ana-leo")).unwrap();
        let key = OrderKey::Id(order.id);
        store
            .transition_status(&key, PaymentStatus::Paid, TransitionSource::Webhook)
            .unwrap();

        let result = store.update(
            &key,
            OrderPatch {
                message: Some("changed".into()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(OrderError::ContentLocked(PaymentStatus::Paid))));

        // Provider references remain writable
        let order = store
            .update(
                &key,
                OrderPatch {
                    provider_status: Some("approved".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(order.provider_status.as_deref(), Some("approved"));
    }

    #[test]
    fn test_update_missing_order() {
        let store = MemoryOrderStore::new();
        let result = store.update(&OrderKey::from("nobody"), OrderPatch::default());
        assert!(matches!(result, Err(OrderError::NotFound(_))));
    }

    #[test]
    fn test_transition_is_idempotent() {
        let store = MemoryOrderStore::new();
        store.create(sample_order("ana-leo")).unwrap();
        let key = OrderKey::from("ana-leo");

        let first = store
            .transition_status(&key, PaymentStatus::Paid, TransitionSource::Webhook)
            .unwrap();
        assert!(first.is_first_payment());
        let paid_at = first.order().updated_at;

        let second = store
            .transition_status(&key, PaymentStatus::Paid, TransitionSource::Webhook)
            .unwrap();
        assert!(!second.is_first_payment());
        assert!(matches!(second, Transition::Skipped { verdict: Verdict::Repeat, .. }));
        assert_eq!(second.order().payment_status, PaymentStatus::Paid);
        assert_eq!(second.order().updated_at, paid_at);
    }

    #[test]
    fn test_transition_rejects_regression() {
        let store = MemoryOrderStore::new();
        store.create(sample_order("ana-leo")).unwrap();
        let key = OrderKey::from("ana-leo");

        store
            .transition_status(&key, PaymentStatus::Paid, TransitionSource::Webhook)
            .unwrap();
        let back = store
            .transition_status(&key, PaymentStatus::Pending, TransitionSource::Webhook)
            .unwrap();
        assert!(matches!(back, Transition::Skipped { verdict: Verdict::Illegal, .. }));

        store
            .transition_status(&key, PaymentStatus::Refunded, TransitionSource::Webhook)
            .unwrap();
        let repaid = store
            .transition_status(&key, PaymentStatus::Paid, TransitionSource::Webhook)
            .unwrap();
        assert!(!repaid.is_first_payment());
        assert_eq!(repaid.order().payment_status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_refs_follow_the_transition_verdict() {
        let store = MemoryOrderStore::new();
        store.create(sample_order("ana-leo")).unwrap();
        let key = OrderKey::from("ana-leo");
        let refs = |status: &str| OrderPatch {
            provider_payment_id: Some("123".into()),
            provider_status: Some(status.into()),
            ..Default::default()
        };

        // Pending repeat still records fresher references
        let pending = store
            .transition_with_refs(&key, PaymentStatus::Pending, TransitionSource::Webhook, refs("in_process"))
            .unwrap();
        assert!(matches!(pending, Transition::Skipped { verdict: Verdict::Repeat, .. }));
        assert_eq!(pending.order().provider_status.as_deref(), Some("in_process"));

        store
            .transition_with_refs(&key, PaymentStatus::Paid, TransitionSource::Webhook, refs("approved"))
            .unwrap();
        let refunded = store
            .transition_with_refs(&key, PaymentStatus::Refunded, TransitionSource::Webhook, refs("refunded"))
            .unwrap();
        let refunded_at = refunded.order().updated_at;

        // A late approval is illegal and writes nothing
        let late = store
            .transition_with_refs(&key, PaymentStatus::Paid, TransitionSource::Webhook, refs("approved"))
            .unwrap();
        assert!(matches!(late, Transition::Skipped { verdict: Verdict::Illegal, .. }));

        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert_eq!(stored.provider_status.as_deref(), Some("refunded"));
        assert_eq!(stored.updated_at, refunded_at);

        // Repeats outside pending leave references alone too
        store
            .transition_with_refs(&key, PaymentStatus::Refunded, TransitionSource::Webhook, refs("changed"))
            .unwrap();
        let stored = store.find_by_slug("ana-leo").unwrap().unwrap();
        assert_eq!(stored.provider_status.as_deref(), Some("refunded"));
    }

    #[test]
    fn test_transition_refuses_customer_fields() {
        let store = MemoryOrderStore::new();
        store.create(sample_order("ana-leo")).unwrap();

        let result = store.transition_with_refs(
            &OrderKey::from("ana-leo"),
            PaymentStatus::Paid,
            TransitionSource::Webhook,
            OrderPatch {
                email: Some("other@example.com".into()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(OrderError::Validation(_))));
        assert_eq!(
            store.find_by_slug("ana-leo").unwrap().unwrap().payment_status,
            PaymentStatus::Pending
        );
    }

    #[test]
    fn test_superseded_provider_order_id_still_resolves() {
        let store = MemoryOrderStore::new();
        store
            .create(sample_order_in("ana-leo", ProviderFamily::DomesticAlt))
            .unwrap();
        let key = OrderKey::from("ana-leo");

        for id in ["1001", "1002"] {
            store
                .update(
                    &key,
                    OrderPatch {
                        provider_order_id: Some(id.into()),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        for id in ["1001", "1002"] {
            let found = store
                .find_by_provider_order_id(ProviderFamily::DomesticAlt, id)
                .unwrap()
                .unwrap();
            assert_eq!(found.custom_slug, "ana-leo");
            assert_eq!(found.provider_order_id.as_deref(), Some("1002"));
        }
        assert!(store
            .find_by_provider_order_id(ProviderFamily::DomesticAlt, "1003")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_concurrent_transitions_pay_once() {
        let store = Arc::new(MemoryOrderStore::new());
        store.create(sample_order("ana-leo")).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .transition_status(
                            &OrderKey::from("ana-leo"),
                            PaymentStatus::Paid,
                            TransitionSource::Webhook,
                        )
                        .unwrap()
                        .is_first_payment()
                })
            })
            .collect();

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|first| *first)
            .count();
        assert_eq!(firsts, 1);
    }
}
