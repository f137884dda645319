//! Upstream REST clients.
//!
//! Two independent calls:
//!   1. GET {prayer_api}{ZONE}
//!      -> one month of prayer timestamps plus Hijri dates
//!   2. GET {mosque_api}&dist={km}&lat={lat}&long={lng}
//!      -> `locationData` list of nearby mosques
//!
//! Blocking `ureq` agent with a short timeout. When compiled without the
//! "online" feature every call fails with `FetchError::Disabled`.

use thiserror::Error;

use crate::config::Settings;
use crate::mosque::Mosque;
use crate::schedule::RawMonth;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("upstream unreachable: {0}")]
    Transport(String),
    #[error("upstream sent an unreadable body: {0}")]
    Decode(String),
    #[error("built without the `online` feature")]
    Disabled,
}

/// External collaborators the orchestration layer talks to.
pub trait Upstream: Send + Sync {
    fn prayer_month(&self, zone_code: &str) -> Result<RawMonth, FetchError>;
    fn nearby_mosques(&self, lat: f64, lng: f64) -> Result<Vec<Mosque>, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub prayer_api: String,
    pub mosque_api: String,
    pub mosque_radius_km: u32,
    pub timeout_secs: u64,
}

impl Endpoints {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            prayer_api: settings.prayer_api.clone(),
            mosque_api: settings.mosque_api.clone(),
            mosque_radius_km: settings.mosque_radius_km,
            timeout_secs: settings.http_timeout_secs,
        }
    }

    pub fn prayer_url(&self, zone_code: &str) -> String {
        format!("{}{}", self.prayer_api, zone_code)
    }

    pub fn mosque_url(&self, lat: f64, lng: f64) -> String {
        let sep = if self.mosque_api.contains('?') { '&' } else { '?' };
        format!(
            "{}{}dist={}&lat={}&long={}",
            self.mosque_api, sep, self.mosque_radius_km, lat, lng
        )
    }
}

#[cfg(feature = "online")]
pub struct HttpUpstream {
    endpoints: Endpoints,
    agent: ureq::Agent,
}

#[cfg(feature = "online")]
impl HttpUpstream {
    pub fn new(endpoints: Endpoints) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(endpoints.timeout_secs))
            .user_agent(concat!("solat/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { endpoints, agent }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        log::debug!("GET {url}");
        let resp = self
            .agent
            .get(url)
            .set("Accept", "application/json")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => FetchError::Status(code),
                ureq::Error::Transport(t) => FetchError::Transport(t.to_string()),
            })?;
        resp.into_json::<T>()
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(feature = "online")]
impl Upstream for HttpUpstream {
    fn prayer_month(&self, zone_code: &str) -> Result<RawMonth, FetchError> {
        self.get_json(&self.endpoints.prayer_url(zone_code))
    }

    fn nearby_mosques(&self, lat: f64, lng: f64) -> Result<Vec<Mosque>, FetchError> {
        let resp: crate::mosque::MosqueResponse = self.get_json(&self.endpoints.mosque_url(lat, lng))?;
        Ok(resp.location_data)
    }
}

// Offline stubs
#[cfg(not(feature = "online"))]
pub struct HttpUpstream;

#[cfg(not(feature = "online"))]
impl HttpUpstream {
    pub fn new(_endpoints: Endpoints) -> Self {
        Self
    }
}

#[cfg(not(feature = "online"))]
impl Upstream for HttpUpstream {
    fn prayer_month(&self, _zone_code: &str) -> Result<RawMonth, FetchError> {
        Err(FetchError::Disabled)
    }

    fn nearby_mosques(&self, _lat: f64, _lng: f64) -> Result<Vec<Mosque>, FetchError> {
        Err(FetchError::Disabled)
    }
}
