//! Month prayer schedule.
//!
//! Normalizes the prayer-time API payload into a day-indexed sequence.
//! Index 0 is day 1 of the fetched month. Every timestamp is epoch seconds.
//! "Today" is derived from the schedule's own first day and its UTC offset,
//! never from the local wall clock.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Malaysia observes a single zone, UTC+8, without DST.
pub const DEFAULT_UTC_OFFSET_SECS: i64 = 8 * 3600;

/// Largest offset any civil timezone uses, UTC-14 to UTC+14.
pub const MAX_UTC_OFFSET_SECS: i64 = 14 * 3600;

/// `epoch` on the wall clock of a fixed UTC offset. `None` when the offset
/// is out of range or the instant is not representable.
pub fn local_datetime(epoch: i64, utc_offset_secs: i64) -> Option<DateTime<FixedOffset>> {
    let tz = FixedOffset::east_opt(i32::try_from(utc_offset_secs).ok()?)?;
    Some(DateTime::from_timestamp(epoch, 0)?.with_timezone(&tz))
}

const HIJRI_MONTHS: [&str; 12] = [
    "Muharram",
    "Safar",
    "Rabiul Awwal",
    "Rabiul Akhir",
    "Jamadil Awwal",
    "Jamadil Akhir",
    "Rejab",
    "Syaaban",
    "Ramadhan",
    "Syawwal",
    "Zulkaedah",
    "Zulhijjah",
];

/// Upstream month payload. Everything optional so that ingest can name the
/// missing piece instead of failing inside serde.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMonth {
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub month_number: Option<u32>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub prayers: Option<Vec<RawDay>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDay {
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub hijri: Option<String>,
    #[serde(default)]
    pub fajr: Option<i64>,
    #[serde(default)]
    pub syuruk: Option<i64>,
    #[serde(default)]
    pub dhuhr: Option<i64>,
    #[serde(default)]
    pub asr: Option<i64>,
    #[serde(default)]
    pub maghrib: Option<i64>,
    #[serde(default)]
    pub isha: Option<i64>,
}

/// The six daily prayer-time instants, in chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrayerTime {
    Fajr,
    Syuruk,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl PrayerTime {
    pub const ALL: [PrayerTime; 6] = [
        PrayerTime::Fajr,
        PrayerTime::Syuruk,
        PrayerTime::Dhuhr,
        PrayerTime::Asr,
        PrayerTime::Maghrib,
        PrayerTime::Isha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrayerTime::Fajr => "Fajr",
            PrayerTime::Syuruk => "Syuruk",
            PrayerTime::Dhuhr => "Dhuhr",
            PrayerTime::Asr => "Asr",
            PrayerTime::Maghrib => "Maghrib",
            PrayerTime::Isha => "Isha",
        }
    }

    fn field(&self) -> &'static str {
        match self {
            PrayerTime::Fajr => "fajr",
            PrayerTime::Syuruk => "syuruk",
            PrayerTime::Dhuhr => "dhuhr",
            PrayerTime::Asr => "asr",
            PrayerTime::Maghrib => "maghrib",
            PrayerTime::Isha => "isha",
        }
    }
}

impl fmt::Display for PrayerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated day: `fajr < syuruk < dhuhr < asr < maghrib < isha`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPrayerTimes {
    pub day: u32,
    pub hijri: String,
    pub fajr: i64,
    pub syuruk: i64,
    pub dhuhr: i64,
    pub asr: i64,
    pub maghrib: i64,
    pub isha: i64,
}

impl DayPrayerTimes {
    pub fn at(&self, time: PrayerTime) -> i64 {
        match time {
            PrayerTime::Fajr => self.fajr,
            PrayerTime::Syuruk => self.syuruk,
            PrayerTime::Dhuhr => self.dhuhr,
            PrayerTime::Asr => self.asr,
            PrayerTime::Maghrib => self.maghrib,
            PrayerTime::Isha => self.isha,
        }
    }

    pub fn times(&self) -> [(PrayerTime, i64); 6] {
        PrayerTime::ALL.map(|t| (t, self.at(t)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload has no `prayers` collection")]
    MissingPrayers,
    #[error("payload `prayers` collection is empty")]
    Empty,
    #[error("day {day}: missing `{field}`")]
    MissingField { day: usize, field: &'static str },
    #[error("day {day}: Hijri date {value:?} is not YYYY-MM-DD")]
    BadHijri { day: usize, value: String },
    #[error("day {day}: {later} is not after {earlier}")]
    OutOfOrder {
        day: usize,
        earlier: &'static str,
        later: &'static str,
    },
    #[error("day {day}: Fajr does not follow the previous day's Isha")]
    Overlap { day: usize },
    #[error("entry {index} is labelled day {label}")]
    DayMismatch { index: usize, label: u32 },
}

/// A day index outside the fetched month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("day index {index} is outside the fetched month (0..{len})")]
pub struct DayOutOfRange {
    pub index: i64,
    pub len: usize,
}

/// Hijri calendar date parsed from `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HijriDate {
    pub year: u32,
    pub month: u32,
    pub day: u32,
}

impl HijriDate {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('-');
        let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || y.len() != 4 || m.len() != 2 || d.len() != 2 {
            return None;
        }
        if ![y, m, d].iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())) {
            return None;
        }
        let date = Self {
            year: y.parse().ok()?,
            month: m.parse().ok()?,
            day: d.parse().ok()?,
        };
        if !(1..=12).contains(&date.month) || !(1..=30).contains(&date.day) {
            return None;
        }
        Some(date)
    }

    pub fn month_name(&self) -> &'static str {
        HIJRI_MONTHS[(self.month - 1) as usize]
    }
}

/// Long form, e.g. `19 Jamadil Akhir 1445H`.
impl fmt::Display for HijriDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}H", self.day, self.month_name(), self.year)
    }
}

fn require(value: Option<i64>, day: usize, field: &'static str) -> Result<i64, PayloadError> {
    value.ok_or(PayloadError::MissingField { day, field })
}

fn validate_day(index: usize, entry: &DayPrayerTimes, prev: Option<&DayPrayerTimes>) -> Result<(), PayloadError> {
    let day = index + 1;
    if entry.day as usize != day {
        return Err(PayloadError::DayMismatch {
            index,
            label: entry.day,
        });
    }
    if HijriDate::parse(&entry.hijri).is_none() {
        return Err(PayloadError::BadHijri {
            day,
            value: entry.hijri.clone(),
        });
    }
    for pair in PrayerTime::ALL.windows(2) {
        if entry.at(pair[1]) <= entry.at(pair[0]) {
            return Err(PayloadError::OutOfOrder {
                day,
                earlier: pair[0].field(),
                later: pair[1].field(),
            });
        }
    }
    if let Some(prev) = prev {
        if entry.fajr <= prev.isha {
            return Err(PayloadError::Overlap { day });
        }
    }
    Ok(())
}

fn validate_days(days: &[DayPrayerTimes]) -> Result<(), PayloadError> {
    if days.is_empty() {
        return Err(PayloadError::Empty);
    }
    for (i, entry) in days.iter().enumerate() {
        validate_day(i, entry, i.checked_sub(1).map(|p| &days[p]))?;
    }
    Ok(())
}

/// A validated month of prayer times.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    days: Vec<DayPrayerTimes>,
    month: String,
    last_updated: Option<String>,
    utc_offset_secs: i64,
}

impl Schedule {
    /// Validate and normalize an upstream payload.
    pub fn normalize(raw: RawMonth) -> Result<Self, PayloadError> {
        let prayers = raw.prayers.ok_or(PayloadError::MissingPrayers)?;

        let mut days = Vec::with_capacity(prayers.len());
        for (i, p) in prayers.into_iter().enumerate() {
            let day = i + 1;
            days.push(DayPrayerTimes {
                // Payloads without a day label are positional.
                day: p.day.unwrap_or(day as u32),
                hijri: p.hijri.ok_or(PayloadError::MissingField { day, field: "hijri" })?,
                fajr: require(p.fajr, day, "fajr")?,
                syuruk: require(p.syuruk, day, "syuruk")?,
                dhuhr: require(p.dhuhr, day, "dhuhr")?,
                asr: require(p.asr, day, "asr")?,
                maghrib: require(p.maghrib, day, "maghrib")?,
                isha: require(p.isha, day, "isha")?,
            });
        }
        validate_days(&days)?;

        Ok(Self {
            days,
            month: raw.month.unwrap_or_default(),
            last_updated: raw.last_updated,
            utc_offset_secs: DEFAULT_UTC_OFFSET_SECS,
        })
    }

    /// Rebuild from already-normalized days (e.g. a persisted payload),
    /// re-checking every invariant.
    pub fn from_days(
        days: Vec<DayPrayerTimes>,
        month: String,
        last_updated: Option<String>,
    ) -> Result<Self, PayloadError> {
        validate_days(&days)?;
        Ok(Self {
            days,
            month,
            last_updated,
            utc_offset_secs: DEFAULT_UTC_OFFSET_SECS,
        })
    }

    pub fn with_utc_offset(mut self, secs: i64) -> Self {
        self.utc_offset_secs = secs;
        self
    }

    pub fn days(&self) -> &[DayPrayerTimes] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn month(&self) -> &str {
        &self.month
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.last_updated.as_deref()
    }

    pub fn utc_offset_secs(&self) -> i64 {
        self.utc_offset_secs
    }

    pub fn entry_for_day(&self, index: usize) -> Result<&DayPrayerTimes, DayOutOfRange> {
        self.days.get(index).ok_or(DayOutOfRange {
            index: index as i64,
            len: self.days.len(),
        })
    }

    pub fn next_day(&self, index: usize) -> Result<usize, DayOutOfRange> {
        let next = index + 1;
        if next < self.days.len() {
            Ok(next)
        } else {
            Err(DayOutOfRange {
                index: next as i64,
                len: self.days.len(),
            })
        }
    }

    pub fn prev_day(&self, index: usize) -> Result<usize, DayOutOfRange> {
        match index.checked_sub(1) {
            Some(prev) if prev < self.days.len() => Ok(prev),
            _ => Err(DayOutOfRange {
                index: index as i64 - 1,
                len: self.days.len(),
            }),
        }
    }

    /// Local calendar day number (days since the epoch) of `epoch`.
    pub fn local_date(&self, epoch: i64) -> Option<NaiveDate> {
        local_datetime(epoch, self.utc_offset_secs).map(|dt| dt.date_naive())
    }

    /// Row of the month containing `now`, anchored on day 1's Fajr.
    /// `None` when `now` falls outside the fetched month.
    pub fn day_index_at(&self, now: i64) -> Option<usize> {
        let first = self.local_date(self.days.first()?.fajr)?;
        let offset = (self.local_date(now)? - first).num_days();
        let index = usize::try_from(offset).ok()?;
        (index < self.days.len()).then_some(index)
    }

    pub fn covers(&self, now: i64) -> bool {
        self.day_index_at(now).is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 2024-01-01 00:00 +08:00.
    pub(crate) const JAN1_MIDNIGHT: i64 = 1_704_038_400;

    pub(crate) const SECONDS_PER_DAY: i64 = 86_400;

    /// A synthetic month of `n` days with fixed local times
    /// 05:55, 07:10, 13:15, 16:35, 19:15, 20:30.
    pub(crate) fn sample_raw(n: u32) -> RawMonth {
        let prayers = (0..n)
            .map(|i| {
                let base = JAN1_MIDNIGHT + i as i64 * SECONDS_PER_DAY;
                RawDay {
                    day: Some(i + 1),
                    hijri: Some(format!("1445-06-{:02}", 19 + i.min(11))),
                    fajr: Some(base + 5 * 3600 + 55 * 60),
                    syuruk: Some(base + 7 * 3600 + 10 * 60),
                    dhuhr: Some(base + 13 * 3600 + 15 * 60),
                    asr: Some(base + 16 * 3600 + 35 * 60),
                    maghrib: Some(base + 19 * 3600 + 15 * 60),
                    isha: Some(base + 20 * 3600 + 30 * 60),
                }
            })
            .collect();
        RawMonth {
            zone: Some("WLY01".into()),
            year: Some(2024),
            month: Some("JAN".into()),
            month_number: Some(1),
            last_updated: Some("2024-01-01T00:00:00.000Z".into()),
            prayers: Some(prayers),
        }
    }

    pub(crate) fn sample_schedule(n: u32) -> Schedule {
        Schedule::normalize(sample_raw(n)).unwrap()
    }

    #[test]
    fn test_normalize_keeps_hijri_unchanged() {
        let raw = sample_raw(3);
        let original = raw.prayers.as_ref().unwrap()[0].hijri.clone().unwrap();
        let schedule = Schedule::normalize(raw).unwrap();
        assert_eq!(schedule.entry_for_day(0).unwrap().hijri, original);
        assert_eq!(schedule.month(), "JAN");
        assert_eq!(schedule.len(), 3);
    }

    #[test]
    fn test_parse_from_json() {
        let json = r#"{"zone":"SGR01","year":2024,"month":"JAN","month_number":1,
            "last_updated":"2024-01-01T00:00:00.000Z",
            "prayers":[{"day":1,"hijri":"1445-06-19","fajr":1704059700,"syuruk":1704064200,
            "dhuhr":1704086100,"asr":1704098100,"maghrib":1704107700,"isha":1704112200}]}"#;
        let raw: RawMonth = serde_json::from_str(json).unwrap();
        let schedule = Schedule::normalize(raw).unwrap();
        assert_eq!(schedule.entry_for_day(0).unwrap().hijri, "1445-06-19");
        assert_eq!(schedule.last_updated(), Some("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_missing_prayers_collection() {
        let raw: RawMonth = serde_json::from_str(r#"{"zone":"SGR01"}"#).unwrap();
        assert_eq!(Schedule::normalize(raw), Err(PayloadError::MissingPrayers));
    }

    #[test]
    fn test_empty_prayers_collection() {
        let raw: RawMonth = serde_json::from_str(r#"{"prayers":[]}"#).unwrap();
        assert_eq!(Schedule::normalize(raw), Err(PayloadError::Empty));
    }

    #[test]
    fn test_missing_field_names_day_and_field() {
        let mut raw = sample_raw(2);
        raw.prayers.as_mut().unwrap()[1].asr = None;
        assert_eq!(
            Schedule::normalize(raw),
            Err(PayloadError::MissingField { day: 2, field: "asr" })
        );
    }

    #[test]
    fn test_out_of_order_times_rejected() {
        let mut raw = sample_raw(1);
        let day = &mut raw.prayers.as_mut().unwrap()[0];
        day.dhuhr = day.syuruk;
        assert_eq!(
            Schedule::normalize(raw),
            Err(PayloadError::OutOfOrder {
                day: 1,
                earlier: "syuruk",
                later: "dhuhr"
            })
        );
    }

    #[test]
    fn test_overlapping_days_rejected() {
        let mut raw = sample_raw(2);
        let prayers = raw.prayers.as_mut().unwrap();
        prayers[1].fajr = prayers[0].isha;
        assert_eq!(Schedule::normalize(raw), Err(PayloadError::Overlap { day: 2 }));
    }

    #[test]
    fn test_bad_hijri_rejected() {
        for bad in ["1445-6-19", "1445-13-01", "1445-06-31", "14450619", "abcd-06-19"] {
            let mut raw = sample_raw(1);
            raw.prayers.as_mut().unwrap()[0].hijri = Some(bad.into());
            assert!(
                matches!(Schedule::normalize(raw), Err(PayloadError::BadHijri { .. })),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_day_label_mismatch_rejected() {
        let mut raw = sample_raw(2);
        raw.prayers.as_mut().unwrap()[1].day = Some(5);
        assert_eq!(
            Schedule::normalize(raw),
            Err(PayloadError::DayMismatch { index: 1, label: 5 })
        );
    }

    #[test]
    fn test_entry_for_day_out_of_range() {
        let s = sample_schedule(3);
        assert!(s.entry_for_day(2).is_ok());
        assert_eq!(s.entry_for_day(3), Err(DayOutOfRange { index: 3, len: 3 }));
    }

    #[test]
    fn test_navigation_bounds() {
        let s = sample_schedule(3);
        assert_eq!(s.next_day(0), Ok(1));
        assert_eq!(s.next_day(1), Ok(2));
        assert!(s.next_day(2).is_err());
        assert_eq!(s.prev_day(2), Ok(1));
        assert_eq!(s.prev_day(0), Err(DayOutOfRange { index: -1, len: 3 }));
    }

    #[test]
    fn test_day_index_anchored_on_first_day() {
        let s = sample_schedule(31);
        assert_eq!(s.day_index_at(JAN1_MIDNIGHT), Some(0));
        assert_eq!(s.day_index_at(JAN1_MIDNIGHT + 1), Some(0));
        assert_eq!(s.day_index_at(JAN1_MIDNIGHT + SECONDS_PER_DAY - 1), Some(0));
        assert_eq!(s.day_index_at(JAN1_MIDNIGHT + SECONDS_PER_DAY), Some(1));
        assert_eq!(s.day_index_at(JAN1_MIDNIGHT + 30 * SECONDS_PER_DAY + 100), Some(30));
        assert_eq!(s.day_index_at(JAN1_MIDNIGHT - 1), None);
        assert_eq!(s.day_index_at(JAN1_MIDNIGHT + 31 * SECONDS_PER_DAY), None);
        assert!(s.covers(JAN1_MIDNIGHT));
        assert!(!s.covers(JAN1_MIDNIGHT + 31 * SECONDS_PER_DAY));
    }

    #[test]
    fn test_local_date_follows_offset() {
        let s = sample_schedule(2);
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(s.local_date(JAN1_MIDNIGHT), Some(jan1));
        assert_eq!(s.local_date(JAN1_MIDNIGHT - 1), jan1.pred_opt());

        // Same instants read on UTC: every row shifts to the previous day.
        let utc = sample_schedule(2).with_utc_offset(0);
        assert_eq!(utc.local_date(JAN1_MIDNIGHT), jan1.pred_opt());
        assert_eq!(utc.day_index_at(JAN1_MIDNIGHT), Some(0));
        assert_eq!(local_datetime(JAN1_MIDNIGHT, 86_400), None);
    }

    #[test]
    fn test_from_days_revalidates() {
        let mut days = sample_schedule(2).days().to_vec();
        assert!(Schedule::from_days(days.clone(), "JAN".into(), None).is_ok());
        days[0].isha = days[0].maghrib;
        assert!(Schedule::from_days(days, "JAN".into(), None).is_err());
    }

    #[test]
    fn test_hijri_long_form() {
        let h = HijriDate::parse("1445-06-19").unwrap();
        assert_eq!(h.to_string(), "19 Jamadil Akhir 1445H");
        assert_eq!(HijriDate::parse("1446-09-01").unwrap().month_name(), "Ramadhan");
    }
}
