//! Plain-text rendering of schedule rows.
//!
//! All wall-clock output uses the schedule's fixed UTC offset, never the
//! host timezone.

use std::fmt::Write;

use crate::schedule::{local_datetime, DayPrayerTimes, HijriDate, PrayerTime};
use crate::zone::ZoneRecord;

fn format_local(epoch: i64, utc_offset_secs: i64, fmt: &str) -> String {
    local_datetime(epoch, utc_offset_secs)
        .map(|dt| dt.format(fmt).to_string())
        .unwrap_or_else(|| epoch.to_string())
}

/// `5:55 AM`
pub fn clock_time(epoch: i64, utc_offset_secs: i64) -> String {
    format_local(epoch, utc_offset_secs, "%-I:%M %p")
}

/// `Monday, 01-01-2024`
pub fn long_date(epoch: i64, utc_offset_secs: i64) -> String {
    format_local(epoch, utc_offset_secs, "%A, %d-%m-%Y")
}

/// Hijri long form, falling back to the raw string.
pub fn hijri_long(hijri: &str) -> String {
    HijriDate::parse(hijri)
        .map(|h| h.to_string())
        .unwrap_or_else(|| hijri.to_string())
}

/// The six times of one day, one per line.
pub fn day_table(day: &DayPrayerTimes, utc_offset_secs: i64) -> String {
    let mut out = String::new();
    for (prayer, at) in day.times() {
        let _ = writeln!(out, "  {:<8} {:>8}", prayer.as_str(), clock_time(at, utc_offset_secs));
    }
    out
}

/// Shareable summary of one day: dates, zone, and the five obligatory prayers.
pub fn share_text(day: &DayPrayerTimes, zone: &ZoneRecord, utc_offset_secs: i64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Date: \t\t{}", long_date(day.fajr, utc_offset_secs));
    let _ = writeln!(out, "Hijri Date: \t{}", hijri_long(&day.hijri));
    let _ = writeln!(out, "Zone: \t\t{} ({})", zone.district, zone.code);
    out.push('\n');
    for prayer in PrayerTime::ALL {
        if prayer == PrayerTime::Syuruk {
            continue;
        }
        let _ = writeln!(out, "{}\t\t{}", clock_time(day.at(prayer), utc_offset_secs), prayer);
    }
    out
}
