//! Time-series normalization.
//!
//! Every timestamp entering the engine is converted to [`Timestamp`], integer
//! milliseconds since the Unix epoch, before anything else touches it. Feeds send
//! seconds, milliseconds, fractional seconds and several string formats.

use crate::shared::{error::SampleError, types::Bar};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, time::Duration};
use tracing::{debug, warn};

/// Numeric times at or above this magnitude are milliseconds, below are seconds.
/// 1e11 seconds is the year 5138, 1e11 milliseconds is 1973.
const MILLIS_THRESHOLD: f64 = 1e11;

/// Monotonic numeric time base: milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Align to the start of the interval containing this time.
    pub fn floor_to(self, interval: Duration) -> Self {
        let step = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1);
        Self(self.0 - self.0.rem_euclid(step))
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(time) => write!(f, "{}", time.format("%Y-%m-%d %H:%M:%S%.3f")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Any timestamp shape a feed may deliver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawTime {
    pub fn normalize(&self) -> Result<Timestamp, SampleError> {
        match self {
            RawTime::Int(value) => from_int(*value),
            RawTime::Float(value) => from_float(*value),
            RawTime::Text(text) => from_text(text),
        }
    }
}

fn from_int(value: i64) -> Result<Timestamp, SampleError> {
    if value < 0 {
        return Err(SampleError::InvalidTimestamp);
    }
    if value as f64 >= MILLIS_THRESHOLD {
        Ok(Timestamp(value))
    } else {
        Ok(Timestamp::from_secs(value))
    }
}

fn from_float(value: f64) -> Result<Timestamp, SampleError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SampleError::InvalidTimestamp);
    }
    if value >= MILLIS_THRESHOLD {
        Ok(Timestamp(value.round() as i64))
    } else {
        Ok(Timestamp((value * 1000.0).round() as i64))
    }
}

fn from_text(text: &str) -> Result<Timestamp, SampleError> {
    let text = text.trim();

    if let Ok(value) = text.parse::<i64>() {
        return from_int(value);
    }
    if let Ok(value) = text.parse::<f64>() {
        return from_float(value);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(Timestamp(time.timestamp_millis()));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Timestamp(time.and_utc().timestamp_millis()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Timestamp(midnight.and_utc().timestamp_millis()));
        }
    }

    Err(SampleError::InvalidTimestamp)
}

/// Parse a session reference date from `YYYY-MM-DD` or the date part of an RFC 3339 time.
pub fn parse_reference_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|t| t.date_naive()))
}

/// Validate, sort and de-duplicate a batch of bars whose order is not trusted.
///
/// Duplicate start times collapse to a single bar chosen by [`prefer_fresher`], so
/// any permutation of the same set yields the identical sequence.
/// Returns the normalized sequence and the number of rejected bars.
pub fn normalize_bars(bars: Vec<Bar>) -> (Vec<Bar>, usize) {
    let total = bars.len();
    let mut valid: Vec<Bar> = bars
        .into_iter()
        .filter_map(|bar| match bar.validated() {
            Ok(bar) => Some(bar),
            Err(error) => {
                warn!(start_time = %bar.start_time, %error, "dropping malformed bar");
                None
            }
        })
        .collect();
    let rejected = total - valid.len();

    valid.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| prefer_fresher(a, b)));

    let mut out: Vec<Bar> = Vec::with_capacity(valid.len());
    for bar in valid {
        match out.last_mut() {
            Some(last) if last.start_time == bar.start_time => {
                debug!(start_time = %bar.start_time, "collapsing duplicate bar");
                *last = bar;
            }
            _ => out.push(bar),
        }
    }

    (out, rejected)
}

/// Total order among bars sharing a start time: the bar that sorts last wins.
/// Greater volume wins (a more complete bar), remaining fields break ties.
fn prefer_fresher(a: &Bar, b: &Bar) -> Ordering {
    a.volume
        .total_cmp(&b.volume)
        .then_with(|| a.close.total_cmp(&b.close))
        .then_with(|| a.high.total_cmp(&b.high))
        .then_with(|| b.low.total_cmp(&a.low))
        .then_with(|| a.open.total_cmp(&b.open))
}
