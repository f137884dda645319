//! getSolat orchestration.
//!
//! coordinate -> zone -> month of prayer times -> bearing -> nearby mosques.
//! Each step's failure maps to one `SolatError` variant; the mosque step is
//! allowed to fail and degrades to an empty list.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bearing::{Bearing, BearingTable};
use crate::fetch::{FetchError, Upstream};
use crate::mosque::Mosque;
use crate::schedule::{DayPrayerTimes, PayloadError, Schedule};
use crate::zone::{ZoneRecord, ZoneResolver};

#[derive(Debug, Error)]
pub enum SolatError {
    #[error("Missing required parameters: latitude and longitude")]
    MissingCoordinates,
    #[error("Invalid parameter values")]
    InvalidCoordinates,
    #[error("Zon JAKIM not found for {lat}, {lng}. Maybe you are not in Malaysia?")]
    OutsideCoverage { lat: f64, lng: f64 },
    #[error("Failed to retrieve prayer times: {0}")]
    Upstream(#[from] FetchError),
    #[error("Prayer times payload rejected: {0}")]
    Payload(#[from] PayloadError),
}

impl SolatError {
    pub fn http_status(&self) -> u16 {
        match self {
            SolatError::MissingCoordinates | SolatError::InvalidCoordinates => 400,
            SolatError::OutsideCoverage { .. } => 404,
            SolatError::Upstream(_) | SolatError::Payload(_) => 502,
        }
    }
}

/// Wire shape of a successful getSolat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolatResponse {
    pub zone: ZoneRecord,
    pub month: String,
    pub updated_at: Option<String>,
    pub bearing: f64,
    /// False when `bearing` is the 0° fallback for a zone missing from the table.
    pub bearing_resolved: bool,
    pub masjid: Vec<Mosque>,
    pub prayer_times: Vec<DayPrayerTimes>,
}

impl SolatResponse {
    /// Rebuild the validated month this response carries.
    pub fn schedule(&self) -> Result<Schedule, PayloadError> {
        Schedule::from_days(
            self.prayer_times.clone(),
            self.month.clone(),
            self.updated_at.clone(),
        )
    }
}

/// Parse query-string style coordinates, telling missing from malformed.
pub fn parse_coordinates(latitude: Option<&str>, longitude: Option<&str>) -> Result<(f64, f64), SolatError> {
    let (lat, lng) = match (latitude, longitude) {
        (Some(lat), Some(lng)) if !lat.trim().is_empty() && !lng.trim().is_empty() => (lat, lng),
        _ => return Err(SolatError::MissingCoordinates),
    };
    let lat: f64 = lat.trim().parse().map_err(|_| SolatError::InvalidCoordinates)?;
    let lng: f64 = lng.trim().parse().map_err(|_| SolatError::InvalidCoordinates)?;
    if !lat.is_finite() || !lng.is_finite() {
        return Err(SolatError::InvalidCoordinates);
    }
    Ok((lat, lng))
}

pub struct SolatService<U> {
    zones: ZoneResolver,
    bearings: BearingTable,
    upstream: U,
    utc_offset_secs: i64,
}

impl<U: Upstream> SolatService<U> {
    pub fn new(zones: ZoneResolver, bearings: BearingTable, upstream: U) -> Self {
        Self {
            zones,
            bearings,
            upstream,
            utc_offset_secs: crate::schedule::DEFAULT_UTC_OFFSET_SECS,
        }
    }

    pub fn with_utc_offset(mut self, secs: i64) -> Self {
        self.utc_offset_secs = secs;
        self
    }

    pub fn resolve_zone(&self, lat: f64, lng: f64) -> Result<ZoneRecord, SolatError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(SolatError::InvalidCoordinates);
        }
        self.zones
            .resolve(lat, lng)
            .ok_or(SolatError::OutsideCoverage { lat, lng })
    }

    pub fn bearing_for(&self, zone: &ZoneRecord) -> Bearing {
        let bearing = self.bearings.bearing_for(&zone.code);
        if !bearing.is_resolved() {
            log::warn!("no Qiblat bearing for zone {}, falling back to 0", zone.code);
        }
        bearing
    }

    pub fn get_solat(&self, lat: f64, lng: f64) -> Result<(SolatResponse, Schedule), SolatError> {
        let zone = self.resolve_zone(lat, lng)?;
        log::debug!("{lat},{lng} -> {} ({})", zone.code, zone.district);

        let raw = self.upstream.prayer_month(&zone.code)?;
        let schedule = Schedule::normalize(raw)?.with_utc_offset(self.utc_offset_secs);

        let bearing = self.bearing_for(&zone);

        let masjid = match self.upstream.nearby_mosques(lat, lng) {
            Ok(list) => list,
            Err(e) => {
                log::warn!("mosque lookup failed, continuing without: {e}");
                Vec::new()
            }
        };

        let response = SolatResponse {
            zone,
            month: schedule.month().to_string(),
            updated_at: schedule.last_updated().map(str::to_string),
            bearing: bearing.degrees_or_default(),
            bearing_resolved: bearing.is_resolved(),
            masjid,
            prayer_times: schedule.days().to_vec(),
        };
        Ok((response, schedule))
    }
}
