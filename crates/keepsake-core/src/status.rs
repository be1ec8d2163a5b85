//! Payment Status State Machine
//!
//! ```text
//!            ┌──────────▶ paid ───────┬──▶ refunded
//!            │                        ├──▶ disputed
//!  pending ──┼──────────▶ rejected    └──▶ chargeback
//!            ├──────────▶ cancelled
//!            └─ ─ ─ ─ ─ ▶ expired      (time-based only)
//! ```
//!
//! Webhooks may only move an order along the solid edges. Expiry is driven by
//! the lazy check on page view, never by a provider callback.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{Order, PaymentStatus};

/// How long an unpaid order may wait before it expires
pub const PENDING_TTL_DAYS: i64 = 30;

/// Who is asking for a transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    Webhook,
    Expiry,
}

/// Outcome of checking a requested status change against the current one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Legal forward edge
    Apply,
    /// Same status again
    Repeat,
    /// Not an edge of the state machine
    Illegal,
}

/// Decide whether `from -> to` may be written
pub fn check(from: PaymentStatus, to: PaymentStatus, source: TransitionSource) -> Verdict {
    use PaymentStatus::{Cancelled, Chargeback, Disputed, Expired, Paid, Pending, Refunded, Rejected};

    if from == to {
        return Verdict::Repeat;
    }

    let legal = match source {
        TransitionSource::Webhook => matches!(
            (from, to),
            (Pending, Paid | Rejected | Cancelled) | (Paid, Refunded | Disputed | Chargeback)
        ),
        TransitionSource::Expiry => matches!((from, to), (Pending | Paid, Expired)),
    };

    if legal { Verdict::Apply } else { Verdict::Illegal }
}

/// Lazy expiry rule evaluated on page view.
///
/// Unpaid orders lapse after [`PENDING_TTL_DAYS`]; paid orders lapse when
/// their plan lifetime runs out.
pub fn expiry_due(order: &Order, now: DateTime<Utc>) -> bool {
    match order.payment_status {
        PaymentStatus::Pending => now - order.created_at > Duration::days(PENDING_TTL_DAYS),
        PaymentStatus::Paid => order
            .plan_type
            .lifetime()
            .is_some_and(|lifetime| now - order.created_at > lifetime),
        _ => false,
    }
}
