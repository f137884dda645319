//! JAKIM prayer-zone lookup.
//!
//! Point-in-polygon over a GeoJSON FeatureCollection. Every feature carries
//! `jakim_code`, `state` and `name` (district) properties and a Polygon or
//! MultiPolygon boundary in [lng, lat] order. Interior rings are holes.
//! A coordinate lying exactly on any ring edge resolves to nothing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

const BUILTIN_ZONES: &str = include_str!("../data/zones.geojson");

/// Collinearity tolerance for the on-edge test (degrees squared).
const EDGE_EPSILON: f64 = 1e-12;

/// Error loading a static dataset (zones or bearings).
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("zone {code}: {reason}")]
    Invalid { code: String, reason: &'static str },
    #[error("dataset contains no entries")]
    Empty,
}

pub(crate) fn read_dataset(path: &Path) -> Result<String, DatasetError> {
    fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// A resolved prayer zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub code: String,
    pub state: String,
    pub district: String,
}

// GeoJSON wire shape. Unknown properties are ignored.

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<FeatureJson>,
}

#[derive(Deserialize)]
struct FeatureJson {
    properties: PropertiesJson,
    geometry: GeometryJson,
}

#[derive(Deserialize)]
struct PropertiesJson {
    jakim_code: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    name: String,
}

type Position = Vec<f64>;

#[derive(Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum GeometryJson {
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64, // longitude
    y: f64, // latitude
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Containment {
    Inside,
    Outside,
    Boundary,
}

#[derive(Debug, Clone, Copy)]
struct BBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BBox {
    fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    fn extend(&mut self, p: Point) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
    }

    // Inclusive so that edge points still reach the boundary test.
    fn contains(&self, p: Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}

struct Polygon {
    exterior: Vec<Point>,
    holes: Vec<Vec<Point>>,
}

impl Polygon {
    fn containment(&self, p: Point) -> Containment {
        match ring_containment(&self.exterior, p) {
            Containment::Inside => {}
            other => return other,
        }
        for hole in &self.holes {
            match ring_containment(hole, p) {
                Containment::Outside => {}
                Containment::Inside => return Containment::Outside,
                Containment::Boundary => return Containment::Boundary,
            }
        }
        Containment::Inside
    }
}

struct ZoneFeature {
    record: ZoneRecord,
    polygons: Vec<Polygon>,
    bbox: BBox,
}

impl ZoneFeature {
    fn containment(&self, p: Point) -> Containment {
        if !self.bbox.contains(p) {
            return Containment::Outside;
        }
        for polygon in &self.polygons {
            match polygon.containment(p) {
                Containment::Outside => {}
                other => return other,
            }
        }
        Containment::Outside
    }
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Even-odd ray cast, with an explicit on-edge check first.
fn ring_containment(ring: &[Point], p: Point) -> Containment {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[j];
        if on_segment(a, b, p) {
            return Containment::Boundary;
        }
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    if inside {
        Containment::Inside
    } else {
        Containment::Outside
    }
}

fn build_ring(code: &str, positions: Vec<Position>, bbox: &mut BBox) -> Result<Vec<Point>, DatasetError> {
    // A closed ring needs at least a triangle plus the repeated first vertex.
    if positions.len() < 4 {
        return Err(DatasetError::Invalid {
            code: code.to_string(),
            reason: "ring has fewer than four positions",
        });
    }
    let mut ring = Vec::with_capacity(positions.len());
    for pos in positions {
        match pos.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => {
                let p = Point { x: *x, y: *y };
                bbox.extend(p);
                ring.push(p);
            }
            _ => {
                return Err(DatasetError::Invalid {
                    code: code.to_string(),
                    reason: "position is not a finite [lng, lat] pair",
                })
            }
        }
    }
    Ok(ring)
}

fn build_polygon(code: &str, rings: Vec<Vec<Position>>, bbox: &mut BBox) -> Result<Polygon, DatasetError> {
    let mut rings = rings.into_iter();
    let exterior = match rings.next() {
        Some(r) => build_ring(code, r, bbox)?,
        None => {
            return Err(DatasetError::Invalid {
                code: code.to_string(),
                reason: "polygon has no exterior ring",
            })
        }
    };
    // Holes never widen the bounding box.
    let mut scratch = BBox::empty();
    let holes = rings
        .map(|r| build_ring(code, r, &mut scratch))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon { exterior, holes })
}

/// Read-only zone dataset, loaded once and shared.
pub struct ZoneResolver {
    features: Vec<ZoneFeature>,
}

impl ZoneResolver {
    /// The boundaries compiled into the binary: one cell per zone around its
    /// district towns, clipped to the coastline outline. Accurate for towns,
    /// approximate near district lines; set `zones_file` for official polygons.
    pub fn builtin() -> Result<Self, DatasetError> {
        Self::from_geojson(BUILTIN_ZONES)
    }

    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        Self::from_geojson(&read_dataset(path)?)
    }

    /// Load `path` when given, otherwise the built-in dataset.
    pub fn load(path: Option<&Path>) -> Result<Self, DatasetError> {
        match path {
            Some(p) => Self::from_path(p),
            None => Self::builtin(),
        }
    }

    pub fn from_geojson(json: &str) -> Result<Self, DatasetError> {
        let collection: FeatureCollection = serde_json::from_str(json)?;
        let mut features = Vec::with_capacity(collection.features.len());

        for feature in collection.features {
            let props = feature.properties;
            let mut bbox = BBox::empty();
            let polygons = match feature.geometry {
                GeometryJson::Polygon(rings) => vec![build_polygon(&props.jakim_code, rings, &mut bbox)?],
                GeometryJson::MultiPolygon(parts) => parts
                    .into_iter()
                    .map(|rings| build_polygon(&props.jakim_code, rings, &mut bbox))
                    .collect::<Result<Vec<_>, _>>()?,
            };
            features.push(ZoneFeature {
                record: ZoneRecord {
                    code: props.jakim_code,
                    state: props.state,
                    district: props.name,
                },
                polygons,
                bbox,
            });
        }

        if features.is_empty() {
            return Err(DatasetError::Empty);
        }
        Ok(Self { features })
    }

    /// Zone containing (lat, lng), or `None` when the point is outside every
    /// zone or lies on a boundary. Callers reject non-numeric input first;
    /// non-finite values simply resolve to `None`.
    pub fn resolve(&self, lat: f64, lng: f64) -> Option<ZoneRecord> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        let p = Point { x: lng, y: lat };
        for feature in &self.features {
            match feature.containment(p) {
                Containment::Inside => return Some(feature.record.clone()),
                Containment::Boundary => return None,
                Containment::Outside => {}
            }
        }
        None
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.record.code.as_str())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }
}
