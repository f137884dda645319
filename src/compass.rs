//! Compass calibration and Qiblat alignment.
//!
//! Keeps the last ten accepted headings and grades their short-term stability
//! by the mean minor-arc difference between consecutive samples. Only a
//! high-confidence window surfaces a heading to consumers.

use serde::Serialize;
use std::collections::VecDeque;

/// Readings kept for stability analysis.
pub const HISTORY_CAPACITY: usize = 10;

/// Readings required before any classification.
pub const MIN_SAMPLES: usize = 5;

/// Minimum spacing between accepted readings.
pub const THROTTLE_MS: u64 = 200;

/// Default `is_aligned` tolerance in degrees.
pub const DEFAULT_ALIGN_TOLERANCE: f64 = 5.0;

/// Minor-arc difference between two headings, in `[0, 180]`.
pub fn angular_diff(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Round to a whole degree and fold into `[0, 360)`.
pub fn normalize_heading(heading: f64) -> f64 {
    heading.round().rem_euclid(360.0)
}

pub fn is_aligned(bearing: f64, heading: f64, tolerance: f64) -> bool {
    angular_diff(bearing, heading) <= tolerance
}

/// One sensor line: `HEADING` or `MILLIS HEADING`.
pub fn parse_sample(line: &str) -> Option<(Option<u64>, f64)> {
    let mut fields = line.split_whitespace();
    let first = fields.next()?;
    match (fields.next(), fields.next()) {
        (None, _) => Some((None, first.parse().ok()?)),
        (Some(heading), None) => Some((Some(first.parse().ok()?), heading.parse().ok()?)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Confidence {
    Low,
    Medium,
    NeedsAdjustment,
    High,
}

impl Confidence {
    pub fn from_variation(avg: f64) -> Self {
        if avg > 30.0 {
            Confidence::Low
        } else if avg > 20.0 {
            Confidence::Medium
        } else if avg > 15.0 {
            Confidence::NeedsAdjustment
        } else {
            Confidence::High
        }
    }

    pub fn needs_calibration(&self) -> bool {
        *self != Confidence::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assessment {
    pub confidence: Confidence,
    pub average_variation: f64,
    pub latest: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CalibrationVerdict {
    /// Reading was NaN or infinite.
    Ignored,
    /// Arrived within the throttle window of the last accepted reading.
    Throttled,
    /// Accepted, but fewer than `MIN_SAMPLES` are held.
    Collecting { samples: usize },
    Assessed(Assessment),
}

impl CalibrationVerdict {
    /// The latest heading, only when stability is high.
    pub fn trusted_heading(&self) -> Option<f64> {
        match self {
            CalibrationVerdict::Assessed(a) if a.confidence == Confidence::High => Some(a.latest),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CalibrationEvaluator {
    history: VecDeque<f64>,
    last_accepted_ms: Option<u64>,
    last_verdict: Option<CalibrationVerdict>,
}

impl CalibrationEvaluator {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            ..Self::default()
        }
    }

    /// Feed one sensor event stamped with a monotonic millisecond clock.
    pub fn push_reading(&mut self, heading: f64, at_ms: u64) -> CalibrationVerdict {
        if !heading.is_finite() {
            return CalibrationVerdict::Ignored;
        }
        if let Some(last) = self.last_accepted_ms {
            if at_ms >= last && at_ms - last < THROTTLE_MS {
                return CalibrationVerdict::Throttled;
            }
        }
        self.last_accepted_ms = Some(at_ms);

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(normalize_heading(heading));

        let verdict = self.assess();
        self.last_verdict = Some(verdict);
        verdict
    }

    fn assess(&self) -> CalibrationVerdict {
        let n = self.history.len();
        if n < MIN_SAMPLES {
            return CalibrationVerdict::Collecting { samples: n };
        }

        let total: f64 = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| angular_diff(*a, *b))
            .sum();
        let average_variation = total / (n - 1) as f64;
        let latest = self.history.back().copied().unwrap_or_default();

        CalibrationVerdict::Assessed(Assessment {
            confidence: Confidence::from_variation(average_variation),
            average_variation,
            latest,
        })
    }

    pub fn samples(&self) -> usize {
        self.history.len()
    }

    pub fn last_verdict(&self) -> Option<CalibrationVerdict> {
        self.last_verdict
    }

    pub fn trusted_heading(&self) -> Option<f64> {
        self.last_verdict.and_then(|v| v.trusted_heading())
    }

    /// Calibration guide finished: start over from an empty window.
    pub fn complete_calibration(&mut self) {
        self.history.clear();
        self.last_accepted_ms = None;
        self.last_verdict = None;
    }
}
