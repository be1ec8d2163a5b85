//! Order Model
//!
//! The persisted record behind one memorial page. `payment_status` is the
//! single authoritative payment field; provider reference fields are opaque
//! strings used to correlate later webhooks.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::{Currency, Plan};

/// Unique order identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the string form used in provider metadata
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment processor family owning an order
///
/// Fixed at creation. Selects both the store partition and the webhook
/// adapter that may touch the order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// Mercado Pago preferences
    Domestic,
    /// Stripe checkout sessions
    InternationalCard,
    /// Yampi orders
    DomesticAlt,
}

impl ProviderFamily {
    pub const ALL: [Self; 3] = [Self::Domestic, Self::InternationalCard, Self::DomesticAlt];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Domestic => "domestic",
            Self::InternationalCard => "international_card",
            Self::DomesticAlt => "domestic_alt",
        }
    }

    /// Name of the processor behind the family
    pub const fn provider_name(&self) -> &'static str {
        match self {
            Self::Domestic => "mercadopago",
            Self::InternationalCard => "stripe",
            Self::DomesticAlt => "yampi",
        }
    }

    /// Accepts both family names and processor names
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "domestic" | "mercadopago" | "mercado_pago" => Some(Self::Domestic),
            "international_card" | "international" | "stripe" => Some(Self::InternationalCard),
            "domestic_alt" | "yampi" => Some(Self::DomesticAlt),
            _ => None,
        }
    }

    /// Currency charged by this family
    pub const fn currency(&self) -> Currency {
        match self {
            Self::Domestic | Self::DomesticAlt => Currency::Brl,
            Self::InternationalCard => Currency::Usd,
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical payment status all provider vocabularies map into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Rejected,
    Refunded,
    Cancelled,
    Disputed,
    Chargeback,
    Expired,
}

impl PaymentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
            Self::Chargeback => "chargeback",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geo-detected address, advisory only
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedAddress {
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub ip: Option<String>,
}

/// A memorial order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub provider_family: ProviderFamily,
    pub custom_slug: String,
    pub unique_url: String,

    // Couple content, editable while pending
    pub couple_name: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
    pub photos: Vec<String>,

    pub plan_type: Plan,
    pub plan_price: Decimal,
    pub currency: Currency,

    pub payment_status: PaymentStatus,

    /// Stripe session id or Mercado Pago preference id
    #[serde(default)]
    pub provider_session_id: Option<String>,
    /// Mercado Pago payment id
    #[serde(default)]
    pub provider_payment_id: Option<String>,
    /// Yampi order id
    #[serde(default)]
    pub provider_order_id: Option<String>,
    #[serde(default)]
    pub merchant_order_id: Option<String>,
    /// Raw status last reported by the provider (advisory)
    #[serde(default)]
    pub provider_status: Option<String>,

    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub address: DetectedAddress,
    pub address_detected_by: String,

    #[serde(default)]
    pub qr_code_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Where providers send the customer after a failed or abandoned payment:
    /// the origin of `unique_url` plus `/create`.
    pub fn cancel_url(&self) -> String {
        format!("{}/create", origin_of(&self.unique_url))
    }

    /// Checkout requires every contact field
    pub fn missing_contact_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.email.trim().is_empty() {
            missing.push("email");
        }
        if self.full_name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            missing.push("full_name");
        }
        if self.phone.as_deref().is_none_or(|p| p.trim().is_empty()) {
            missing.push("phone");
        }
        missing
    }

    /// Owner gate: the caller must know the email the order was created with
    pub fn is_owned_by(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }
}

/// Strip path, query and fragment from an absolute URL
pub fn origin_of(url: &str) -> &str {
    let after_scheme = url.find("://").map_or(0, |i| i + 3);
    match url[after_scheme..].find(['/', '?', '#']) {
        Some(end) => &url[..after_scheme + end],
        None => url,
    }
}

/// Email form safe for logs: `a***@example.com`
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_strips_path() {
        assert_eq!(origin_of("https://keepsake.app/ana-leo"), "https://keepsake.app");
        assert_eq!(origin_of("https://keepsake.app"), "https://keepsake.app");
        assert_eq!(origin_of("http://localhost:3000/a/b?x=1"), "http://localhost:3000");
    }

    #[test]
    fn test_redact_email() {
        assert_eq!(redact_email("ana@example.com"), "a***@example.com");
        assert_eq!(redact_email("not-an-email"), "***");
    }

    #[test]
    fn test_provider_family_parse() {
        assert_eq!(ProviderFamily::parse("stripe"), Some(ProviderFamily::InternationalCard));
        assert_eq!(ProviderFamily::parse("domestic_alt"), Some(ProviderFamily::DomesticAlt));
        assert_eq!(ProviderFamily::parse("paypal"), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&PaymentStatus::Chargeback).unwrap();
        assert_eq!(json, "\"chargeback\"");
    }
}
