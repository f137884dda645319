//! Configuration, cached state, and path resolution.
//!
//! INI parser for the [location] and [settings] sections. The last fetched
//! getSolat payload is cached as JSON via serde and re-validated on load.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::schedule::{Schedule, MAX_UTC_OFFSET_SECS};
use crate::session::LocationFix;
use crate::solat::SolatResponse;

/// Cache files larger than this are treated as corrupt.
const MAX_CACHE_BYTES: usize = 1 << 20;

/// Resolved filesystem paths
#[derive(Clone, Debug)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub cache_file: PathBuf,
    pub pid_file: PathBuf,
}

impl Paths {
    /// `$SOLAT_CONFIG_DIR`, else `$HOME/.config/solat`.
    pub fn init() -> Result<Self, io::Error> {
        if let Some(dir) = std::env::var_os("SOLAT_CONFIG_DIR") {
            return Self::in_dir(PathBuf::from(dir));
        }

        let home = std::env::var("HOME").map_err(|_| {
            io::Error::new(io::ErrorKind::NotFound, "HOME not set")
        })?;
        Self::in_dir(PathBuf::from(home).join(".config").join("solat"))
    }

    pub fn in_dir(config_dir: PathBuf) -> Result<Self, io::Error> {
        fs::create_dir_all(&config_dir)?;

        Ok(Self {
            config_file: config_dir.join("config.ini"),
            cache_file: config_dir.join("solat_cache.json"),
            pid_file: config_dir.join("daemon.pid"),
            config_dir,
        })
    }
}

/// `[settings]` with built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub prayer_api: String,
    pub mosque_api: String,
    pub mosque_radius_km: u32,
    pub mosque_limit: usize,
    pub align_tolerance: f64,
    pub utc_offset_minutes: i32,
    pub zones_file: Option<PathBuf>,
    pub bearing_file: Option<PathBuf>,
    pub port: u16,
    pub http_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prayer_api: "https://api.waktusolat.app/v2/solat/".to_string(),
            mosque_api: "https://www.e-solat.gov.my/index.php?r=esolatApi/nearestMosque".to_string(),
            mosque_radius_km: 20,
            mosque_limit: 5,
            align_tolerance: crate::compass::DEFAULT_ALIGN_TOLERANCE,
            utc_offset_minutes: 480,
            zones_file: None,
            bearing_file: None,
            port: 8080,
            http_timeout_secs: 5,
        }
    }
}

impl Settings {
    pub fn utc_offset_secs(&self) -> i64 {
        self.utc_offset_minutes as i64 * 60
    }

    fn apply(&mut self, key: &str, value: &str) {
        fn parsed<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) {
            match value.parse() {
                Ok(v) => *slot = v,
                Err(_) => log::warn!("config: ignoring malformed {key} = {value:?}"),
            }
        }

        match key {
            "prayer_api" => self.prayer_api = value.to_string(),
            "mosque_api" => self.mosque_api = value.to_string(),
            "mosque_radius_km" => parsed(key, value, &mut self.mosque_radius_km),
            "mosque_limit" => parsed(key, value, &mut self.mosque_limit),
            "align_tolerance" => {
                let mut tol = self.align_tolerance;
                parsed(key, value, &mut tol);
                if tol.is_finite() && (0.0..=180.0).contains(&tol) {
                    self.align_tolerance = tol;
                } else {
                    log::warn!("config: align_tolerance {tol} outside [0, 180]");
                }
            }
            "utc_offset_minutes" => {
                let mut mins = self.utc_offset_minutes;
                parsed(key, value, &mut mins);
                if (i64::from(mins) * 60).abs() <= MAX_UTC_OFFSET_SECS {
                    self.utc_offset_minutes = mins;
                } else {
                    log::warn!("config: utc_offset_minutes {mins} outside ±14h");
                }
            }
            "zones_file" => self.zones_file = Some(PathBuf::from(value)),
            "bearing_file" => self.bearing_file = Some(PathBuf::from(value)),
            "port" => parsed(key, value, &mut self.port),
            "http_timeout_secs" => parsed(key, value, &mut self.http_timeout_secs),
            _ => {}
        }
    }
}

/// Everything `config.ini` holds.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub location: Option<LocationFix>,
    pub settings: Settings,
}

type Sections = HashMap<String, HashMap<String, String>>;

fn parse_ini(content: &str) -> Sections {
    let mut sections: Sections = HashMap::new();
    let mut current = String::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = name.trim().to_string();
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

fn location_from(section: Option<&HashMap<String, String>>) -> Option<LocationFix> {
    let section = section?;
    let lat: f64 = section.get("latitude")?.parse().ok()?;
    let lng: f64 = section.get("longitude")?.parse().ok()?;
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    let fetched_at = section
        .get("fetched_at")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    Some(LocationFix::new(lat, lng, fetched_at))
}

/// Load config. A missing file yields the defaults.
pub fn load(paths: &Paths) -> Result<Config, io::Error> {
    let content = match fs::read_to_string(&paths.config_file) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(e),
    };
    Ok(parse_config(&content))
}

fn parse_config(content: &str) -> Config {
    let sections = parse_ini(content);

    let mut settings = Settings::default();
    if let Some(section) = sections.get("settings") {
        for (key, value) in section {
            settings.apply(key, value);
        }
    }

    Config {
        location: location_from(sections.get("location")),
        settings,
    }
}

/// Load the cached location fix from INI config
pub fn load_location(paths: &Paths) -> Option<LocationFix> {
    load(paths).ok()?.location
}

/// Rewrite the [location] section, leaving every other section as it was.
pub fn save_location(paths: &Paths, fix: &LocationFix) -> Result<(), io::Error> {
    let existing = match fs::read_to_string(&paths.config_file) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut content = format!(
        "[location]\nlatitude = {:.6}\nlongitude = {:.6}\nfetched_at = {}\n",
        fix.lat, fix.lng, fix.fetched_at
    );

    let mut in_location = false;
    let mut rest = String::new();
    for line in existing.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_location = trimmed == "[location]";
        }
        if !in_location {
            rest.push_str(line);
            rest.push('\n');
        }
    }
    let rest = rest.trim_start_matches('\n');
    if !rest.is_empty() {
        content.push('\n');
        content.push_str(rest);
    }

    fs::write(&paths.config_file, content)
}

/// JSON structure for the payload cache (serde)
#[derive(Serialize, Deserialize)]
struct CacheJson {
    fetched_at: i64,
    latitude: f64,
    longitude: f64,
    response: SolatResponse,
}

/// The last fetched payload and where it was fetched for.
#[derive(Debug, Clone)]
pub struct CachedSolat {
    pub fix: LocationFix,
    pub response: SolatResponse,
    pub schedule: Schedule,
}

/// Load and re-validate the payload cache.
pub fn load_cache(paths: &Paths, utc_offset_secs: i64) -> Option<CachedSolat> {
    let content = fs::read_to_string(&paths.cache_file).ok()?;
    if content.len() > MAX_CACHE_BYTES {
        return None;
    }

    let cached: CacheJson = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("cache: {}: {e}", paths.cache_file.display());
            return None;
        }
    };
    let schedule = match cached.response.schedule() {
        Ok(s) => s.with_utc_offset(utc_offset_secs),
        Err(e) => {
            log::warn!("cache: discarding invalid schedule: {e}");
            return None;
        }
    };

    Some(CachedSolat {
        fix: LocationFix::new(cached.latitude, cached.longitude, cached.fetched_at),
        response: cached.response,
        schedule,
    })
}

/// Save the payload cache to JSON
pub fn save_cache(paths: &Paths, fix: &LocationFix, response: &SolatResponse) -> Result<(), io::Error> {
    let cached = CacheJson {
        fetched_at: fix.fetched_at,
        latitude: fix.lat,
        longitude: fix.lng,
        response: response.clone(),
    };
    let json = serde_json::to_string_pretty(&cached)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    fs::write(&paths.cache_file, json)
}

/// Dataset override paths are relative to the config directory.
pub fn resolve_data_path(paths: &Paths, file: Option<&Path>) -> Option<PathBuf> {
    file.map(|f| {
        if f.is_absolute() {
            f.to_path_buf()
        } else {
            paths.config_dir.join(f)
        }
    })
}

/// Check if daemon process is alive via PID file
pub fn check_daemon_alive(paths: &Paths) -> bool {
    let content = match fs::read_to_string(&paths.pid_file) {
        Ok(c) => c,
        Err(_) => return false,
    };
    let pid: i32 = match content.trim().parse() {
        Ok(p) => p,
        Err(_) => return false,
    };
    if pid <= 0 {
        return false;
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Write daemon PID to PID file
pub fn write_pid(paths: &Paths) -> Result<(), io::Error> {
    fs::write(&paths.pid_file, format!("{}\n", std::process::id()))
}

/// Remove daemon PID file
pub fn remove_pid(paths: &Paths) {
    let _ = fs::remove_file(&paths.pid_file);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::tests::sample_schedule;
    use crate::zone::ZoneRecord;
    use tempfile::TempDir;

    fn temp_paths() -> (TempDir, Paths) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::in_dir(dir.path().join("solat")).unwrap();
        (dir, paths)
    }

    #[test]
    fn test_missing_config_is_default() {
        let (_dir, paths) = temp_paths();
        let cfg = load(&paths).unwrap();
        assert!(cfg.location.is_none());
        assert_eq!(cfg.settings, Settings::default());
    }

    #[test]
    fn test_settings_overrides_and_bad_values() {
        let cfg = parse_config(
            "; comment\n[settings]\nport = 9090\nmosque_limit = ten\nalign_tolerance = 8.5\n\
             utc_offset_minutes = 420\nzones_file = zones.geojson\nunknown = 1\n",
        );
        assert_eq!(cfg.settings.port, 9090);
        assert_eq!(cfg.settings.mosque_limit, 5);
        assert_eq!(cfg.settings.align_tolerance, 8.5);
        assert_eq!(cfg.settings.utc_offset_secs(), 420 * 60);
        assert_eq!(cfg.settings.zones_file, Some(PathBuf::from("zones.geojson")));
    }

    #[test]
    fn test_out_of_range_tolerance_keeps_default() {
        let cfg = parse_config("[settings]\nalign_tolerance = 270\n");
        assert_eq!(cfg.settings.align_tolerance, Settings::default().align_tolerance);
    }

    #[test]
    fn test_out_of_range_utc_offset_keeps_default() {
        let cfg = parse_config("[settings]\nutc_offset_minutes = 100000\n");
        assert_eq!(cfg.settings.utc_offset_minutes, 480);
        assert_eq!(cfg.settings.utc_offset_secs(), 8 * 3600);

        let cfg = parse_config("[settings]\nutc_offset_minutes = 841\n");
        assert_eq!(cfg.settings.utc_offset_minutes, 480);

        let cfg = parse_config("[settings]\nutc_offset_minutes = -300\n");
        assert_eq!(cfg.settings.utc_offset_minutes, -300);
        let cfg = parse_config("[settings]\nutc_offset_minutes = 840\n");
        assert_eq!(cfg.settings.utc_offset_minutes, 840);
    }

    #[test]
    fn test_location_requires_finite_pair() {
        assert!(parse_config("[location]\nlatitude = 3.1\n").location.is_none());
        assert!(parse_config("[location]\nlatitude = NaN\nlongitude = 101.0\n")
            .location
            .is_none());
        let fix = parse_config("[location]\nlatitude = 3.1\nlongitude = 101.6\n")
            .location
            .unwrap();
        assert_eq!(fix, LocationFix::new(3.1, 101.6, 0));
    }

    #[test]
    fn test_save_location_preserves_settings() {
        let (_dir, paths) = temp_paths();
        fs::write(
            &paths.config_file,
            "[location]\nlatitude = 1.0\nlongitude = 2.0\n\n[settings]\nport = 9000\n",
        )
        .unwrap();

        let fix = LocationFix::new(3.139, 101.6869, 1_700_000_000);
        save_location(&paths, &fix).unwrap();

        let cfg = load(&paths).unwrap();
        assert_eq!(cfg.location, Some(fix));
        assert_eq!(cfg.settings.port, 9000);

        let text = fs::read_to_string(&paths.config_file).unwrap();
        assert_eq!(text.matches("[location]").count(), 1);
    }

    #[test]
    fn test_cache_round_trip_revalidates() {
        let (_dir, paths) = temp_paths();
        let schedule = sample_schedule(3);
        let response = SolatResponse {
            zone: ZoneRecord {
                code: "WLY01".into(),
                state: "Wilayah Persekutuan".into(),
                district: "Kuala Lumpur, Putrajaya".into(),
            },
            month: schedule.month().to_string(),
            updated_at: schedule.last_updated().map(str::to_string),
            bearing: 292.5,
            bearing_resolved: true,
            masjid: Vec::new(),
            prayer_times: schedule.days().to_vec(),
        };
        let fix = LocationFix::new(3.139, 101.6869, 1_704_067_200);
        save_cache(&paths, &fix, &response).unwrap();

        let cached = load_cache(&paths, 8 * 3600).unwrap();
        assert_eq!(cached.fix, fix);
        assert_eq!(cached.response, response);
        assert_eq!(cached.schedule.len(), 3);

        // A tampered month is rejected on load.
        let mut bad = response.clone();
        bad.prayer_times[1].fajr = bad.prayer_times[0].isha;
        save_cache(&paths, &fix, &bad).unwrap();
        assert!(load_cache(&paths, 8 * 3600).is_none());
    }

    #[test]
    fn test_garbage_cache_is_ignored() {
        let (_dir, paths) = temp_paths();
        fs::write(&paths.cache_file, "{not json").unwrap();
        assert!(load_cache(&paths, 0).is_none());
    }

    #[test]
    fn test_relative_data_paths() {
        let (_dir, paths) = temp_paths();
        assert_eq!(
            resolve_data_path(&paths, Some(Path::new("z.geojson"))),
            Some(paths.config_dir.join("z.geojson"))
        );
        assert_eq!(
            resolve_data_path(&paths, Some(Path::new("/tmp/z.geojson"))),
            Some(PathBuf::from("/tmp/z.geojson"))
        );
        assert_eq!(resolve_data_path(&paths, None), None);
    }

    #[test]
    fn test_pid_file() {
        let (_dir, paths) = temp_paths();
        assert!(!check_daemon_alive(&paths));
        write_pid(&paths).unwrap();
        assert!(check_daemon_alive(&paths));
        remove_pid(&paths);
        assert!(!check_daemon_alive(&paths));
    }
}
