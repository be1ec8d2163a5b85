//! Plans and Pricing

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Memorial page plans
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Page stays online for one year
    #[default]
    Basic,
    /// Page stays online for good
    Premium,
}

impl Plan {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "basic" | "basico" | "básico" => Some(Self::Basic),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    /// How long a paid page stays online
    pub fn lifetime(&self) -> Option<Duration> {
        match self {
            Self::Basic => Some(Duration::days(365)),
            Self::Premium => None,
        }
    }

    /// Get pricing for this plan in the given currency
    pub fn pricing(&self, currency: Currency) -> PlanPricing {
        let (name, description) = match self {
            Self::Basic => ("Keepsake Basic", "Personalized page with photos and counter, online for one year"),
            Self::Premium => ("Keepsake Premium", "Personalized page with photos, music and counter, online forever"),
        };
        let price = match (self, currency) {
            (Self::Basic, Currency::Brl) => dec!(29.90),
            (Self::Premium, Currency::Brl) => dec!(49.90),
            (Self::Basic, Currency::Usd) => dec!(9.90),
            (Self::Premium, Currency::Usd) => dec!(19.90),
        };
        PlanPricing {
            name: name.into(),
            description: description.into(),
            price,
            currency,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Charge currency
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Brl,
    Usd,
}

impl Currency {
    /// ISO 4217 code
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Brl => "BRL",
            Self::Usd => "USD",
        }
    }
}

/// Pricing information
#[derive(Clone, Debug)]
pub struct PlanPricing {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub currency: Currency,
}

impl PlanPricing {
    /// Price in minor units (cents)
    pub fn minor_units(&self) -> i64 {
        (self.price * dec!(100)).trunc().to_i64().unwrap_or_default()
    }
}
