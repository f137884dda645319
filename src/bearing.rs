//! Qiblat bearing table.
//!
//! Static JSON list of `{zone, bearing, bearing_degree}`: one precomputed
//! bearing to the Kaaba per zone code, degrees clockwise from true north.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::zone::{read_dataset, DatasetError};

const BUILTIN_BEARINGS: &str = include_str!("../data/bearing.json");

#[derive(Deserialize)]
struct BearingJson {
    zone: String,
    #[serde(default)]
    bearing: String,
    bearing_degree: f64,
}

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct BearingRecord {
    pub zone: String,
    /// Degrees-minutes-seconds label as published, e.g. `292° 31' 20"`.
    pub label: String,
    pub degrees: f64,
}

/// Result of a table lookup. `Unresolved` is distinct from a real 0°.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bearing {
    Resolved(f64),
    Unresolved,
}

impl Bearing {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Bearing::Resolved(_))
    }

    /// Degrees, falling back to 0 for zones missing from the table.
    pub fn degrees_or_default(&self) -> f64 {
        match self {
            Bearing::Resolved(d) => *d,
            Bearing::Unresolved => 0.0,
        }
    }
}

pub struct BearingTable {
    entries: HashMap<String, BearingRecord>,
}

impl BearingTable {
    pub fn builtin() -> Result<Self, DatasetError> {
        Self::from_json(BUILTIN_BEARINGS)
    }

    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        Self::from_json(&read_dataset(path)?)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, DatasetError> {
        match path {
            Some(p) => Self::from_path(p),
            None => Self::builtin(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        let rows: Vec<BearingJson> = serde_json::from_str(json)?;
        if rows.is_empty() {
            return Err(DatasetError::Empty);
        }

        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            if !row.bearing_degree.is_finite() || !(0.0..360.0).contains(&row.bearing_degree) {
                return Err(DatasetError::Invalid {
                    code: row.zone,
                    reason: "bearing_degree outside [0, 360)",
                });
            }
            if entries.contains_key(&row.zone) {
                return Err(DatasetError::Invalid {
                    code: row.zone,
                    reason: "duplicate zone in bearing table",
                });
            }
            entries.insert(
                row.zone.clone(),
                BearingRecord {
                    zone: row.zone,
                    label: row.bearing,
                    degrees: row.bearing_degree,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn bearing_for(&self, zone_code: &str) -> Bearing {
        match self.entries.get(zone_code) {
            Some(r) => Bearing::Resolved(r.degrees),
            None => Bearing::Unresolved,
        }
    }

    pub fn record(&self, zone_code: &str) -> Option<&BearingRecord> {
        self.entries.get(zone_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::ZoneResolver;

    #[test]
    fn test_known_zone_resolves() {
        let table = BearingTable::builtin().unwrap();
        match table.bearing_for("WLY01") {
            Bearing::Resolved(d) => assert!(d > 290.0 && d < 296.0, "got {d}"),
            Bearing::Unresolved => panic!("WLY01 missing from bearing table"),
        }
        assert!(!table.record("WLY01").unwrap().label.is_empty());
    }

    #[test]
    fn test_unknown_zone_is_unresolved_not_zero() {
        let table = BearingTable::builtin().unwrap();
        let b = table.bearing_for("XXX99");
        assert_eq!(b, Bearing::Unresolved);
        assert!(!b.is_resolved());
        assert_eq!(b.degrees_or_default(), 0.0);
    }

    #[test]
    fn test_every_resolvable_zone_has_a_bearing() {
        // Catches drift between the two datasets: no built-in zone relies on
        // the 0° fallback.
        let table = BearingTable::builtin().unwrap();
        let zones = ZoneResolver::builtin().unwrap();
        for code in zones.codes() {
            assert!(
                table.bearing_for(code).is_resolved(),
                "zone {code} has no Qiblat bearing"
            );
        }
    }

    #[test]
    fn test_rejects_out_of_range_degrees() {
        let json = r#"[{"zone":"A01","bearing":"","bearing_degree":360.0}]"#;
        assert!(matches!(
            BearingTable::from_json(json),
            Err(DatasetError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicates() {
        let json = r#"[{"zone":"A01","bearing_degree":292.0},{"zone":"A01","bearing_degree":293.0}]"#;
        assert!(BearingTable::from_json(json).is_err());
    }
}
