//! Prayer-period state machine and countdown.
//!
//! Windows are open below and closed above: at the exact instant of a prayer
//! time the previous period still holds.
//!
//!   Fajr    (fajr, syuruk]
//!   Dhuha   (syuruk, dhuhr]
//!   Zuhr    (dhuhr, asr]
//!   Asr     (asr, maghrib]
//!   Maghrib (maghrib, isha]
//!   Isha    (isha, next day's fajr]
//!
//! Everything here is a pure function of `(now, schedule)`, safe to call on
//! every tick and to re-derive after a missed one.

use serde::Serialize;
use std::fmt;

use crate::schedule::{DayPrayerTimes, PrayerTime, Schedule};

/// At least this long to go: no hurry.
pub const RELAXED_SECS: i64 = 3600;
/// Under this long to go (the clock still shows 15 minutes): imminent.
pub const IMMINENT_SECS: i64 = 16 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrayerPeriod {
    Fajr,
    Dhuha,
    Zuhr,
    Asr,
    Maghrib,
    Isha,
    /// No enclosing window, usually missing adjacent-day data.
    Unknown,
}

impl PrayerPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrayerPeriod::Fajr => "Fajr",
            PrayerPeriod::Dhuha => "Dhuha",
            PrayerPeriod::Zuhr => "Zuhr",
            PrayerPeriod::Asr => "Asr",
            PrayerPeriod::Maghrib => "Maghrib",
            PrayerPeriod::Isha => "Isha",
            PrayerPeriod::Unknown => "Unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != PrayerPeriod::Unknown
    }
}

impl fmt::Display for PrayerPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `now` against one day's times plus the neighbouring Isha/Fajr
/// cutoffs for the span across midnight.
pub fn classify(
    now: i64,
    today: &DayPrayerTimes,
    tomorrow_fajr: Option<i64>,
    yesterday_isha: Option<i64>,
) -> PrayerPeriod {
    let windows = [
        (today.fajr, today.syuruk, PrayerPeriod::Fajr),
        (today.syuruk, today.dhuhr, PrayerPeriod::Dhuha),
        (today.dhuhr, today.asr, PrayerPeriod::Zuhr),
        (today.asr, today.maghrib, PrayerPeriod::Asr),
        (today.maghrib, today.isha, PrayerPeriod::Maghrib),
    ];
    for (start, end, period) in windows {
        if now > start && now <= end {
            return period;
        }
    }

    if now > today.isha {
        return match tomorrow_fajr {
            Some(fajr) if now <= fajr => PrayerPeriod::Isha,
            _ => PrayerPeriod::Unknown,
        };
    }

    // At or before today's Fajr: still last night's Isha.
    match yesterday_isha {
        Some(isha) if now > isha => PrayerPeriod::Isha,
        _ => PrayerPeriod::Unknown,
    }
}

/// The next prayer-time instant strictly after `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextPrayer {
    pub prayer: PrayerTime,
    pub at: i64,
    /// True when the boundary comes from the following day's row.
    pub tomorrow: bool,
}

pub fn next_boundary(now: i64, today: &DayPrayerTimes, tomorrow_fajr: Option<i64>) -> Option<NextPrayer> {
    if let Some((prayer, at)) = today.times().into_iter().find(|&(_, at)| at > now) {
        return Some(NextPrayer {
            prayer,
            at,
            tomorrow: false,
        });
    }
    tomorrow_fajr.filter(|&at| at > now).map(|at| NextPrayer {
        prayer: PrayerTime::Fajr,
        at,
        tomorrow: true,
    })
}

/// Floor-truncated duration split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Countdown {
    pub fn total_secs(&self) -> i64 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }

    pub fn urgency(&self) -> Urgency {
        Urgency::from_secs(self.total_secs())
    }
}

/// `HH:MM:SS`, each field zero-padded to two digits.
impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

pub fn time_remaining(now: i64, next_boundary: i64) -> Countdown {
    let diff = (next_boundary - now).abs();
    Countdown {
        hours: diff / 3600,
        minutes: diff % 3600 / 60,
        seconds: diff % 60,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Urgency {
    Relaxed,
    Approaching,
    Imminent,
}

impl Urgency {
    pub fn from_secs(secs: i64) -> Self {
        if secs >= RELAXED_SECS {
            Urgency::Relaxed
        } else if secs < IMMINENT_SECS {
            Urgency::Imminent
        } else {
            Urgency::Approaching
        }
    }
}

/// Everything one tick needs to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub day_index: usize,
    pub period: PrayerPeriod,
    pub next: Option<NextPrayer>,
    pub countdown: Option<Countdown>,
}

/// Classify `now` against the fetched month. `None` when `now` is outside it.
pub fn snapshot(now: i64, schedule: &Schedule) -> Option<Snapshot> {
    let day_index = schedule.day_index_at(now)?;
    let today = schedule.entry_for_day(day_index).ok()?;

    let tomorrow_fajr = schedule
        .next_day(day_index)
        .ok()
        .and_then(|i| schedule.entry_for_day(i).ok())
        .map(|d| d.fajr);
    let yesterday_isha = schedule
        .prev_day(day_index)
        .ok()
        .and_then(|i| schedule.entry_for_day(i).ok())
        .map(|d| d.isha);

    let period = classify(now, today, tomorrow_fajr, yesterday_isha);
    let next = next_boundary(now, today, tomorrow_fajr);
    let countdown = next.map(|n| time_remaining(now, n.at));

    Some(Snapshot {
        day_index,
        period,
        next,
        countdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::tests::{sample_schedule, JAN1_MIDNIGHT};

    fn toy_day() -> DayPrayerTimes {
        DayPrayerTimes {
            day: 1,
            hijri: "1445-06-19".into(),
            fajr: 100,
            syuruk: 200,
            dhuhr: 300,
            asr: 400,
            maghrib: 500,
            isha: 600,
        }
    }

    #[test]
    fn test_classify_inside_windows() {
        let d = toy_day();
        assert_eq!(classify(150, &d, None, None), PrayerPeriod::Fajr);
        assert_eq!(classify(250, &d, None, None), PrayerPeriod::Dhuha);
        assert_eq!(classify(350, &d, None, None), PrayerPeriod::Zuhr);
        assert_eq!(classify(450, &d, None, None), PrayerPeriod::Asr);
        assert_eq!(classify(550, &d, None, None), PrayerPeriod::Maghrib);
    }

    #[test]
    fn test_exact_prayer_time_keeps_previous_period() {
        let d = toy_day();
        // At Fajr itself it is still last night's Isha.
        assert_eq!(classify(100, &d, None, Some(0)), PrayerPeriod::Isha);
        assert_ne!(classify(100, &d, None, Some(0)), PrayerPeriod::Fajr);
        assert_eq!(classify(101, &d, None, Some(0)), PrayerPeriod::Fajr);

        assert_eq!(classify(200, &d, None, None), PrayerPeriod::Fajr);
        assert_eq!(classify(300, &d, None, None), PrayerPeriod::Dhuha);
        assert_eq!(classify(400, &d, None, None), PrayerPeriod::Zuhr);
        assert_eq!(classify(500, &d, None, None), PrayerPeriod::Asr);
        assert_eq!(classify(600, &d, None, None), PrayerPeriod::Maghrib);
    }

    #[test]
    fn test_isha_spans_midnight() {
        let d = toy_day();
        assert_eq!(classify(601, &d, Some(1100), None), PrayerPeriod::Isha);
        assert_eq!(classify(1100, &d, Some(1100), None), PrayerPeriod::Isha);
        assert_eq!(classify(50, &d, None, Some(-400)), PrayerPeriod::Isha);
    }

    #[test]
    fn test_missing_neighbours_yield_unknown() {
        let d = toy_day();
        assert_eq!(classify(700, &d, None, None), PrayerPeriod::Unknown);
        assert_eq!(classify(50, &d, None, None), PrayerPeriod::Unknown);
        assert_eq!(classify(1200, &d, Some(1100), None), PrayerPeriod::Unknown);
        assert_eq!(classify(-500, &d, None, Some(-400)), PrayerPeriod::Unknown);
        assert!(!PrayerPeriod::Unknown.is_known());
    }

    #[test]
    fn test_next_boundary_strictly_after_now() {
        let d = toy_day();
        let n = next_boundary(100, &d, None).unwrap();
        assert_eq!((n.prayer, n.at, n.tomorrow), (PrayerTime::Syuruk, 200, false));
        let n = next_boundary(99, &d, None).unwrap();
        assert_eq!(n.prayer, PrayerTime::Fajr);
        let n = next_boundary(600, &d, Some(1100)).unwrap();
        assert_eq!((n.prayer, n.at, n.tomorrow), (PrayerTime::Fajr, 1100, true));
        assert_eq!(next_boundary(600, &d, None), None);
        assert_eq!(next_boundary(1100, &d, Some(1100)), None);
    }

    #[test]
    fn test_time_remaining_truncates() {
        let c = time_remaining(100, 3800);
        assert_eq!((c.hours, c.minutes, c.seconds), (1, 1, 40));
        assert_eq!(c.to_string(), "01:01:40");
        assert_eq!(time_remaining(0, 59).to_string(), "00:00:59");
        assert_eq!(time_remaining(0, 36_000 + 5).to_string(), "10:00:05");
    }

    #[test]
    fn test_urgency_thresholds() {
        assert_eq!(Urgency::from_secs(3600), Urgency::Relaxed);
        assert_eq!(Urgency::from_secs(3599), Urgency::Approaching);
        assert_eq!(Urgency::from_secs(960), Urgency::Approaching);
        // 15 minutes and 59 seconds still reads as "15 minutes" on the clock.
        assert_eq!(Urgency::from_secs(959), Urgency::Imminent);
        assert_eq!(Urgency::from_secs(900), Urgency::Imminent);
        assert_eq!(time_remaining(0, 60).urgency(), Urgency::Imminent);
    }

    #[test]
    fn test_snapshot_over_month() {
        let s = sample_schedule(3);
        let day2 = s.entry_for_day(1).unwrap().clone();

        // 14:00 on day 2.
        let now = JAN1_MIDNIGHT + 86_400 + 14 * 3600;
        let snap = snapshot(now, &s).unwrap();
        assert_eq!(snap.day_index, 1);
        assert_eq!(snap.period, PrayerPeriod::Zuhr);
        let next = snap.next.unwrap();
        assert_eq!(next.prayer, PrayerTime::Asr);
        assert_eq!(next.at, day2.asr);
        assert_eq!(snap.countdown.unwrap().to_string(), "02:35:00");

        // 02:00 on day 2 is still day 1's Isha.
        let snap = snapshot(JAN1_MIDNIGHT + 86_400 + 2 * 3600, &s).unwrap();
        assert_eq!(snap.period, PrayerPeriod::Isha);
        assert_eq!(snap.next.unwrap().prayer, PrayerTime::Fajr);

        // 23:00 on the last day has no next Fajr.
        let snap = snapshot(JAN1_MIDNIGHT + 2 * 86_400 + 23 * 3600, &s).unwrap();
        assert_eq!(snap.period, PrayerPeriod::Unknown);
        assert_eq!(snap.next, None);
        assert_eq!(snap.countdown, None);

        assert_eq!(snapshot(JAN1_MIDNIGHT + 3 * 86_400, &s), None);
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let s = sample_schedule(2);
        let now = JAN1_MIDNIGHT + 6 * 3600;
        assert_eq!(snapshot(now, &s), snapshot(now, &s));
    }
}
