//! Location fix bookkeeping and the schedule refetch gate.
//!
//! The last accepted coordinate is the only shared mutable state on the fetch
//! path. It is owned here and overwritten eagerly; newest successful fetch wins.

use serde::{Deserialize, Serialize};

/// About 100 m at Malaysian latitudes.
pub const MIN_DISPLACEMENT_DEG: f64 = 0.001;

/// Seconds before an unmoved fix may refetch.
pub const CACHE_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub fetched_at: i64,
}

impl LocationFix {
    pub fn new(lat: f64, lng: f64, fetched_at: i64) -> Self {
        Self { lat, lng, fetched_at }
    }

    /// Moved more than the displacement threshold on either axis.
    pub fn moved_from(&self, other: &LocationFix) -> bool {
        (self.lat - other.lat).abs() > MIN_DISPLACEMENT_DEG
            || (self.lng - other.lng).abs() > MIN_DISPLACEMENT_DEG
    }
}

/// State of the live geolocation source.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFix {
    Loading,
    Failed(String),
    Ready(LocationFix),
}

/// The live fix when ready, otherwise the persisted one.
pub fn effective_fix(live: &LiveFix, cached: Option<LocationFix>) -> Option<LocationFix> {
    match live {
        LiveFix::Ready(fix) => Some(*fix),
        LiveFix::Loading | LiveFix::Failed(_) => cached,
    }
}

/// Debounces schedule fetches by displacement and elapsed time.
#[derive(Debug, Clone, Default)]
pub struct FetchGate {
    last: Option<LocationFix>,
    last_fetch_at: Option<i64>,
}

impl FetchGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_fetch(&self, fix: &LocationFix, now: i64) -> bool {
        match (&self.last, self.last_fetch_at) {
            (Some(last), Some(at)) => fix.moved_from(last) || now - at >= CACHE_WINDOW_SECS,
            _ => true,
        }
    }

    /// Note a fetch issued for `fix` at `now`.
    pub fn record(&mut self, fix: LocationFix, now: i64) {
        self.last = Some(fix);
        self.last_fetch_at = Some(now);
    }

    /// `should_fetch` then `record` in one step. Returns whether to fetch.
    pub fn offer(&mut self, fix: LocationFix, now: i64) -> bool {
        if !self.should_fetch(&fix, now) {
            return false;
        }
        self.record(fix, now);
        true
    }
}
