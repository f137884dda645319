//! solat - Malaysian prayer-time clock and Qiblat compass
//!
//! Commands:
//!   --watch          Run the period clock (default)
//!   --status         Show zone, bearing, today's times and countdown
//!   --set-location   Set location (lat,lon)
//!   --refresh        Force a schedule and mosque fetch
//!   --day N          Show day N of the cached month
//!   --share          Print a shareable summary of today
//!   --mosques        List the nearest mosques
//!   --compass        Calibrate headings read from stdin
//!   --serve [PORT]   Serve GET /api/getSolat
//!   --help           Show usage

mod bearing;
mod compass;
mod config;
mod daemon;
mod fetch;
mod mosque;
mod period;
mod report;
mod schedule;
#[cfg(feature = "server")]
mod server;
mod session;
mod solat;
mod zone;

use anyhow::{anyhow, bail, Context, Result};
use std::io::BufRead;
use std::process;
use std::time::Instant;

use crate::bearing::BearingTable;
use crate::compass::{CalibrationEvaluator, CalibrationVerdict};
use crate::config::{CachedSolat, Config, Paths};
use crate::fetch::{Endpoints, HttpUpstream};
use crate::session::LocationFix;
use crate::solat::{parse_coordinates, SolatService};
use crate::zone::ZoneResolver;

enum Command {
    Watch,
    Status,
    SetLocation(String),
    Refresh,
    Day(Option<u32>),
    Share,
    Mosques,
    Compass,
    Serve(Option<u16>),
}

fn print_usage() {
    eprintln!("solat - Malaysian prayer-time clock and Qiblat compass");
    eprintln!();
    eprintln!("Usage: solat [COMMAND]");
    eprintln!();
    eprintln!("  --watch               Run the period clock (default)");
    eprintln!("  --status              Show zone, bearing, today's times and countdown");
    eprintln!("  --set-location LOC    Set location (LAT,LON)");
    eprintln!("  --refresh             Force a schedule and mosque fetch");
    eprintln!("  --day N | --today     Show day N of the cached month");
    eprintln!("  --share               Print a shareable summary of today");
    eprintln!("  --mosques             List the nearest mosques");
    eprintln!("  --compass             Calibrate headings from stdin (HEADING or MILLIS HEADING)");
    eprintln!("  --serve [PORT]        Serve GET /api/getSolat");
    eprintln!("  --help                Show this help");
    eprintln!();
    eprintln!("Config: $SOLAT_CONFIG_DIR or ~/.config/solat. Log level: RUST_LOG.");
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Command::Watch;
    }

    match args[1].as_str() {
        "--watch" | "watch" => Command::Watch,
        "--status" | "status" => Command::Status,
        "--set-location" | "set-location" => {
            if args.len() < 3 {
                eprintln!("--set-location requires a location argument");
                eprintln!("  Example: solat --set-location 3.1390,101.6869");
                process::exit(1);
            }
            Command::SetLocation(args[2].clone())
        }
        "--refresh" | "refresh" => Command::Refresh,
        "--today" | "today" => Command::Day(None),
        "--day" | "day" => {
            if args.len() < 3 {
                eprintln!("--day requires a day of month");
                eprintln!("  Example: solat --day 15");
                process::exit(1);
            }
            match args[2].parse() {
                Ok(n) => Command::Day(Some(n)),
                Err(_) => {
                    eprintln!("Invalid day: {}", args[2]);
                    process::exit(1);
                }
            }
        }
        "--share" | "share" => Command::Share,
        "--mosques" | "mosques" => Command::Mosques,
        "--compass" | "compass" => Command::Compass,
        "--serve" | "serve" => {
            let port = match args.get(2) {
                Some(p) => match p.parse() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        eprintln!("Invalid port: {}", p);
                        process::exit(1);
                    }
                },
                None => None,
            };
            Command::Serve(port)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = parse_args();

    let paths = match Paths::init() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize paths: {e}");
            process::exit(1);
        }
    };
    let config = match config::load(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to read {}: {e}", paths.config_file.display());
            process::exit(1);
        }
    };
    let app = App { paths, config };

    let result = match command {
        Command::Watch => cmd_watch(&app),
        Command::Status => cmd_status(&app),
        Command::SetLocation(location) => cmd_set_location(&app, &location),
        Command::Refresh => cmd_refresh(&app),
        Command::Day(day) => cmd_day(&app, day),
        Command::Share => cmd_share(&app),
        Command::Mosques => cmd_mosques(&app),
        Command::Compass => cmd_compass(&app),
        Command::Serve(port) => cmd_serve(&app, port),
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        process::exit(1);
    }
}

struct App {
    paths: Paths,
    config: Config,
}

impl App {
    fn offset(&self) -> i64 {
        self.config.settings.utc_offset_secs()
    }

    fn zones(&self) -> Result<ZoneResolver> {
        let path = config::resolve_data_path(&self.paths, self.config.settings.zones_file.as_deref());
        ZoneResolver::load(path.as_deref()).context("loading zone polygons")
    }

    fn bearings(&self) -> Result<BearingTable> {
        let path = config::resolve_data_path(&self.paths, self.config.settings.bearing_file.as_deref());
        BearingTable::load(path.as_deref()).context("loading Qiblat bearings")
    }

    fn service(&self) -> Result<SolatService<HttpUpstream>> {
        let zones = self.zones()?;
        let bearings = self.bearings()?;
        log::debug!("{} zone polygons loaded", zones.len());
        for code in zones.codes() {
            if !bearings.bearing_for(code).is_resolved() {
                log::warn!("zone {code} has no Qiblat bearing");
            }
        }
        let upstream = HttpUpstream::new(Endpoints::from_settings(&self.config.settings));
        Ok(SolatService::new(zones, bearings, upstream).with_utc_offset(self.offset()))
    }

    fn location(&self) -> Result<LocationFix> {
        self.config.location.ok_or_else(|| {
            anyhow!("No location configured. Use --set-location first.\n  Example: solat --set-location 3.1390,101.6869")
        })
    }

    fn cache(&self) -> Result<CachedSolat> {
        config::load_cache(&self.paths, self.offset())
            .ok_or_else(|| anyhow!("No cached prayer times. Run --refresh first."))
    }
}

fn cmd_watch(app: &App) -> Result<()> {
    daemon::run(&app.paths, app.service()?, app.config.settings.clone())
}

fn cmd_status(app: &App) -> Result<()> {
    let now = now_epoch();
    let offset = app.offset();

    if let Some(loc) = app.config.location {
        println!("Location: {:.4}, {:.4}", loc.lat, loc.lng);
    }
    let cached = app.cache()?;
    let zone = &cached.response.zone;
    println!("Zone: {} - {}, {}", zone.code, zone.district, zone.state);
    if cached.response.bearing_resolved {
        let label = app
            .bearings()
            .ok()
            .and_then(|t| t.record(&zone.code).map(|r| r.label.clone()))
            .filter(|l| !l.is_empty());
        match label {
            Some(label) => println!("Qiblat: {:.2}° ({label})", cached.response.bearing),
            None => println!("Qiblat: {:.2}°", cached.response.bearing),
        }
    } else {
        println!("Qiblat: unavailable for this zone");
    }
    println!("Date: {}", report::long_date(now, offset));

    let schedule = &cached.schedule;
    let Some(snap) = period::snapshot(now, schedule) else {
        println!();
        println!("Cached month ({}) does not cover today. Run --refresh.", cached.response.month);
        return Ok(());
    };
    let today = schedule.entry_for_day(snap.day_index)?;
    println!("Hijri: {}\n", report::hijri_long(&today.hijri));
    print!("{}", report::day_table(today, offset));
    println!();

    if !snap.period.is_known() {
        println!("Period: unknown (schedule incomplete)");
    } else {
        println!("Period: {}", snap.period);
    }
    if let (Some(next), Some(countdown)) = (snap.next, snap.countdown) {
        println!(
            "Next: {} at {} (in {})",
            next.prayer,
            report::clock_time(next.at, offset),
            countdown
        );
    }

    let updated = cached.response.updated_at.as_deref().unwrap_or("unknown");
    println!("\nSchedule: {} (updated {})", cached.response.month, updated);
    println!(
        "Watcher: {}",
        if config::check_daemon_alive(&app.paths) { "running" } else { "not running" }
    );
    Ok(())
}

fn cmd_set_location(app: &App, loc_str: &str) -> Result<()> {
    let (lat, lng) = match loc_str.split_once(',') {
        Some((lat, lng)) => parse_coordinates(Some(lat), Some(lng)),
        None => parse_coordinates(Some(loc_str), None),
    }
    .map_err(|_| anyhow!("Invalid format. Use: LAT,LON (e.g., 3.1390,101.6869)"))?;

    let zones = app.zones()?;
    let Some(zone) = zones.resolve(lat, lng) else {
        bail!("{:.4}, {:.4} is outside the covered zones. Maybe you are not in Malaysia?", lat, lng);
    };

    let fix = LocationFix::new(lat, lng, now_epoch());
    config::save_location(&app.paths, &fix).context("failed to save config")?;
    println!("Location set to: {:.4}, {:.4}", lat, lng);
    println!("Zone: {} - {}, {}", zone.code, zone.district, zone.state);
    Ok(())
}

fn cmd_refresh(app: &App) -> Result<()> {
    let loc = app.location()?;
    let service = app.service()?;

    println!("Fetching prayer times...");
    let (response, schedule) = service.get_solat(loc.lat, loc.lng)?;

    let fix = LocationFix::new(loc.lat, loc.lng, now_epoch());
    config::save_cache(&app.paths, &fix, &response).context("failed to write cache")?;

    println!("Zone: {} - {}", response.zone.code, response.zone.district);
    println!("Month: {} ({} days)", response.month, schedule.len());
    println!("Mosques nearby: {}", response.masjid.len());
    Ok(())
}

fn cmd_day(app: &App, day: Option<u32>) -> Result<()> {
    let cached = app.cache()?;
    let schedule = &cached.schedule;

    let index = match day {
        Some(0) => bail!("Day numbers start at 1."),
        Some(n) => (n - 1) as usize,
        None => schedule
            .day_index_at(now_epoch())
            .ok_or_else(|| anyhow!("Cached month ({}) does not cover today. Run --refresh.", schedule.month()))?,
    };
    let entry = schedule
        .entry_for_day(index)
        .with_context(|| format!("no day {} in {} (1-{})", index + 1, schedule.month(), schedule.len()))?;

    println!("{}", report::long_date(entry.fajr, app.offset()));
    println!("{}\n", report::hijri_long(&entry.hijri));
    print!("{}", report::day_table(entry, app.offset()));

    let prev = schedule.prev_day(index).ok().map(|i| format!("--day {}", i + 1));
    let next = schedule.next_day(index).ok().map(|i| format!("--day {}", i + 1));
    let nav: Vec<String> = [prev, next].into_iter().flatten().collect();
    if !nav.is_empty() {
        println!("\n({})", nav.join(", "));
    }
    Ok(())
}

fn cmd_share(app: &App) -> Result<()> {
    let cached = app.cache()?;
    let index = cached
        .schedule
        .day_index_at(now_epoch())
        .ok_or_else(|| anyhow!("Cached month does not cover today. Run --refresh."))?;
    let today = cached.schedule.entry_for_day(index)?;
    print!("{}", report::share_text(today, &cached.response.zone, app.offset()));
    Ok(())
}

fn cmd_mosques(app: &App) -> Result<()> {
    let cached = app.cache()?;
    let nearest = mosque::nearest_mosques(&cached.response.masjid, app.config.settings.mosque_limit);
    if nearest.is_empty() {
        println!("No mosques in the cached result.");
        return Ok(());
    }
    for (i, m) in nearest.iter().enumerate() {
        let dist = m
            .distance_km()
            .map(|d| format!("{d:.2} km"))
            .unwrap_or_else(|| "? km".to_string());
        println!("{}. {} ({})", i + 1, m.display_name(), dist);
        if !m.alamat.is_empty() {
            println!("   {}", m.display_address());
        }
        if !m.no_daftar.is_empty() {
            println!("   JAKIM registration: {}", m.no_daftar);
        }
        if let (Some(lat), Some(lng)) = (m.latitude(), m.longitude()) {
            println!("   {lat:.5}, {lng:.5}");
        }
    }
    Ok(())
}

fn cmd_compass(app: &App) -> Result<()> {
    let bearing = match app.cache() {
        Ok(c) if c.response.bearing_resolved => Some(c.response.bearing),
        _ => {
            let loc = app.location()?;
            let zone = app
                .zones()?
                .resolve(loc.lat, loc.lng)
                .ok_or_else(|| anyhow!("Saved location is outside the covered zones."))?;
            match app.bearings()?.bearing_for(&zone.code) {
                bearing::Bearing::Resolved(d) => Some(d),
                bearing::Bearing::Unresolved => None,
            }
        }
    };
    match bearing {
        Some(b) => println!("Qiblat bearing: {b:.2}°"),
        None => println!("Qiblat bearing unavailable, reporting calibration only"),
    }

    let tolerance = app.config.settings.align_tolerance;
    let started = Instant::now();
    let mut eval = CalibrationEvaluator::new();

    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim() == "reset" {
            eval.complete_calibration();
            println!("calibration reset");
            continue;
        }
        let Some((at_ms, heading)) = compass::parse_sample(&line) else {
            if !line.trim().is_empty() {
                eprintln!("skipping {line:?}");
            }
            continue;
        };
        let at_ms = at_ms.unwrap_or_else(|| started.elapsed().as_millis() as u64);

        match eval.push_reading(heading, at_ms) {
            CalibrationVerdict::Ignored | CalibrationVerdict::Throttled => {}
            CalibrationVerdict::Collecting { samples } => {
                println!("collecting {}/{}", samples, compass::MIN_SAMPLES);
            }
            CalibrationVerdict::Assessed(a) => {
                let mut line = format!("{:?} (variation {:.1}°)", a.confidence, a.average_variation);
                if a.confidence.needs_calibration() {
                    line.push_str(" - move the device in a figure-8");
                } else if let Some(b) = bearing {
                    let off = compass::angular_diff(b, a.latest);
                    if compass::is_aligned(b, a.latest, tolerance) {
                        line.push_str(&format!(" heading {:.0}°, facing Qiblat", a.latest));
                    } else {
                        line.push_str(&format!(" heading {:.0}°, {:.0}° off Qiblat", a.latest, off));
                    }
                }
                println!("{line}");
            }
        }
    }

    match (eval.trusted_heading(), eval.last_verdict()) {
        (Some(h), _) => println!("final heading {h:.0}° ({} samples)", eval.samples()),
        (None, Some(_)) => println!("no stable heading after {} samples", eval.samples()),
        (None, None) => println!("no readings"),
    }
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(app: &App, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(app.config.settings.port);
    server::run(port, app.service()?)
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_app: &App, _port: Option<u16>) -> Result<()> {
    bail!("built without the `server` feature")
}

// Time helpers

pub fn now_epoch() -> i64 {
    unsafe { libc::time(std::ptr::null_mut()) as i64 }
}
