//! Nearby-mosque records from the JAKIM directory.
//!
//! Only the fields the program reads are typed. Everything else the
//! directory sends rides along in `extra` and is served back unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Directory response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MosqueResponse {
    #[serde(default, rename = "locationData")]
    pub location_data: Vec<Mosque>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mosque {
    /// JAKIM registration number, unique per mosque.
    #[serde(default, deserialize_with = "string_or_number")]
    pub no_daftar: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub nama_masjid: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub alamat: String,
    /// Kilometres, string-encoded decimal.
    #[serde(default, deserialize_with = "string_or_number")]
    pub distance: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The directory is inconsistent about quoting numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Mosque {
    pub fn distance_km(&self) -> Option<f64> {
        self.distance.trim().parse::<f64>().ok().filter(|d| d.is_finite())
    }

    fn coordinate(&self, key: &str) -> Option<f64> {
        match self.extra.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn latitude(&self) -> Option<f64> {
        self.coordinate("latitud")
    }

    pub fn longitude(&self) -> Option<f64> {
        self.coordinate("longitud")
    }

    pub fn display_name(&self) -> String {
        title_case(&self.nama_masjid)
    }

    pub fn display_address(&self) -> String {
        title_case(&self.alamat)
    }
}

/// Sort by ascending distance (unparseable last), drop repeated registration
/// numbers keeping the nearest, and keep the first `limit`.
pub fn nearest_mosques(mosques: &[Mosque], limit: usize) -> Vec<&Mosque> {
    let mut sorted: Vec<&Mosque> = mosques.iter().collect();
    sorted.sort_by(|a, b| match (a.distance_km(), b.distance_km()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|m| seen.insert(m.no_daftar.as_str()))
        .take(limit)
        .collect()
}

/// `MASJID JAMEK SULTAN ABDUL SAMAD` -> `Masjid Jamek Sultan Abdul Samad`.
pub fn title_case(s: &str) -> String {
    s.to_lowercase()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mosque(no: &str, dist: &str) -> Mosque {
        Mosque {
            no_daftar: no.into(),
            nama_masjid: format!("MASJID {no}"),
            alamat: String::new(),
            distance: dist.into(),
            extra: Map::new(),
        }
    }

    #[test]
    fn test_parse_directory_payload() {
        let json = r#"{"locationData":[
            {"no_daftar":"W-001","nama_masjid":"MASJID NEGARA","alamat":"JALAN PERDANA",
             "distance":"1.2345","latitud":"3.1421","longitud":101.6918,"kapasiti":15000},
            {"no_daftar":42,"nama_masjid":"SURAU","distance":0.5}
        ]}"#;
        let resp: MosqueResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.location_data.len(), 2);

        let negara = &resp.location_data[0];
        assert_eq!(negara.distance_km(), Some(1.2345));
        assert_eq!(negara.latitude(), Some(3.1421));
        assert_eq!(negara.longitude(), Some(101.6918));
        assert_eq!(negara.extra.get("kapasiti"), Some(&Value::from(15000)));
        assert_eq!(negara.display_name(), "Masjid Negara");

        let surau = &resp.location_data[1];
        assert_eq!(surau.no_daftar, "42");
        assert_eq!(surau.distance_km(), Some(0.5));
    }

    #[test]
    fn test_extra_fields_survive_reserialization() {
        let json = r#"{"no_daftar":"A1","distance":"2.0","tel":"03-1234"}"#;
        let m: Mosque = serde_json::from_str(json).unwrap();
        let out = serde_json::to_value(&m).unwrap();
        assert_eq!(out["tel"], "03-1234");
        assert_eq!(out["no_daftar"], "A1");
    }

    #[test]
    fn test_missing_envelope_is_empty() {
        let resp: MosqueResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.location_data.is_empty());
    }

    #[test]
    fn test_nearest_sorts_dedupes_and_limits() {
        let list = vec![
            mosque("C", "3.0"),
            mosque("A", "1.0"),
            mosque("X", "n/a"),
            mosque("A", "0.9"),
            mosque("B", "2.0"),
            mosque("D", "4.0"),
            mosque("E", "5.0"),
            mosque("F", "6.0"),
        ];
        let nearest = nearest_mosques(&list, 5);
        let ids: Vec<&str> = nearest.iter().map(|m| m.no_daftar.as_str()).collect();
        assert_eq!(ids, ["A", "B", "C", "D", "E"]);
        assert_eq!(nearest[0].distance, "0.9");

        let all = nearest_mosques(&list, 10);
        assert_eq!(all.last().unwrap().no_daftar, "X");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(
            title_case("MASJID JAMEK SULTAN ABDUL SAMAD"),
            "Masjid Jamek Sultan Abdul Samad"
        );
        assert_eq!(title_case("jalan  tun perak"), "Jalan  Tun Perak");
        assert_eq!(title_case(""), "");
    }
}
