//! Geo Routing
//!
//! Picks the provider family for a new order from the client IP. Detection
//! never fails the caller: any lookup problem yields a non-domestic result
//! tagged `fallback`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use keepsake_core::{DetectedAddress, ProviderFamily};

use crate::error::{Result, RuntimeError};

const SERVICE: &str = "geoip";

pub const DEFAULT_GEOIP_URL: &str = "http://ip-api.com/json";
pub const GEO_TIMEOUT: Duration = Duration::from_secs(3);
pub const SOURCE_GEOIP: &str = "geoip";
pub const SOURCE_FALLBACK: &str = "fallback";

/// Location returned by a geo-IP service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeoRecord {
    pub country_code: String,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Result of [`GeoRouter::detect`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoDetection {
    pub is_domestic: bool,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub ip: Option<String>,
    /// `geoip` or `fallback`
    pub source: &'static str,
}

impl GeoDetection {
    pub fn fallback(ip: Option<&str>) -> Self {
        Self {
            is_domestic: false,
            country_code: None,
            region: None,
            city: None,
            ip: ip.map(String::from),
            source: SOURCE_FALLBACK,
        }
    }

    pub fn address(&self) -> DetectedAddress {
        DetectedAddress {
            country_code: self.country_code.clone(),
            region: self.region.clone(),
            city: self.city.clone(),
            ip: self.ip.clone(),
        }
    }
}

/// Geo-IP lookup service
#[async_trait]
pub trait GeoIpLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

/// ip-api.com compatible client
pub struct IpApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl IpApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(GEO_TIMEOUT)
            .build()
            .map_err(|e| RuntimeError::Config(format!("geoip HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let url = std::env::var("GEOIP_URL").unwrap_or_else(|_| DEFAULT_GEOIP_URL.into());
        Self::new(url)
    }
}

#[async_trait]
impl GeoIpLookup for IpApiClient {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord> {
        let url = format!("{}/{ip}", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .query(&[("fields", "status,message,countryCode,regionName,city")])
            .send()
            .await
            .map_err(|e| RuntimeError::transport(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeError::http(SERVICE, status.as_u16(), "lookup failed"));
        }

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::http(SERVICE, status.as_u16(), format!("malformed body: {e}")))?;

        match (body.status.as_str(), body.country_code) {
            ("success", Some(country_code)) if !country_code.is_empty() => Ok(GeoRecord {
                country_code,
                region: body.region_name,
                city: body.city,
            }),
            _ => Err(RuntimeError::http(
                SERVICE,
                status.as_u16(),
                body.message.unwrap_or_else(|| "no country in response".into()),
            )),
        }
    }
}

/// Addresses a geo-IP service cannot place
pub fn is_unroutable(ip: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Err(_) => true,
    }
}

/// Chooses a provider family from the caller's location
pub struct GeoRouter {
    lookup: Arc<dyn GeoIpLookup>,
    domestic_country: String,
    domestic_provider: ProviderFamily,
    timeout: Duration,
}

impl GeoRouter {
    pub fn new(lookup: Arc<dyn GeoIpLookup>) -> Self {
        Self {
            lookup,
            domestic_country: "BR".into(),
            domestic_provider: ProviderFamily::Domestic,
            timeout: GEO_TIMEOUT,
        }
    }

    #[must_use]
    pub fn domestic_country(mut self, country: impl Into<String>) -> Self {
        self.domestic_country = country.into().to_uppercase();
        self
    }

    /// Family used for domestic callers (`Domestic` or `DomesticAlt`)
    #[must_use]
    pub fn domestic_provider(mut self, family: ProviderFamily) -> Self {
        self.domestic_provider = family;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Locate `ip`; never fails
    pub async fn detect(&self, ip: Option<&str>) -> GeoDetection {
        let Some(ip) = ip.map(str::trim).filter(|ip| !ip.is_empty()) else {
            tracing::debug!("No client IP, using geo fallback");
            return GeoDetection::fallback(None);
        };
        if is_unroutable(ip) {
            tracing::debug!(ip = %ip, "Unroutable client IP, using geo fallback");
            return GeoDetection::fallback(Some(ip));
        }

        match tokio::time::timeout(self.timeout, self.lookup.lookup(ip)).await {
            Ok(Ok(record)) => GeoDetection {
                is_domestic: record.country_code.eq_ignore_ascii_case(&self.domestic_country),
                country_code: Some(record.country_code),
                region: record.region,
                city: record.city,
                ip: Some(ip.to_string()),
                source: SOURCE_GEOIP,
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Geo lookup failed, using fallback");
                GeoDetection::fallback(Some(ip))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Geo lookup timed out, using fallback");
                GeoDetection::fallback(Some(ip))
            }
        }
    }

    /// Family for a new order: an explicit request wins, otherwise geo decides
    pub fn select_family(&self, requested: Option<ProviderFamily>, detection: &GeoDetection) -> ProviderFamily {
        requested.unwrap_or(if detection.is_domestic {
            self.domestic_provider
        } else {
            ProviderFamily::InternationalCard
        })
    }
}
