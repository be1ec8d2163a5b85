//! # keepsake-core
//!
//! Order lifecycle for personalized memorial pages.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       create_order                           │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │    Slug     │  │    OrderStore    │  │  Status state  │  │
//! │  │  generator  │──│ (partitioned by  │──│    machine     │  │
//! │  │             │  │ provider family) │  │                │  │
//! │  └─────────────┘  └──────────────────┘  └────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `payment_status` only changes through [`OrderStore::transition_status`],
//! which checks the state machine and writes in one step. The
//! [`ConfirmationHook`] runs for the single write that reaches `paid`.

pub mod error;
pub mod hook;
pub mod order;
pub mod plan;
pub mod service;
pub mod slug;
pub mod status;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{OrderError, Result};
pub use hook::{ConfirmationHook, LoggingConfirmationHook, NotificationError};
pub use order::{DetectedAddress, Order, OrderId, PaymentStatus, ProviderFamily};
pub use plan::{Currency, Plan, PlanPricing};
pub use service::{create_order, NewOrder};
pub use status::TransitionSource;
pub use store::{MemoryOrderStore, OrderKey, OrderPatch, OrderStore, Transition};
