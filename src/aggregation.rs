use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::{Error, bail};
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, TimeZone as _, Timelike as _, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::pm::Reading;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    fn truncate(&self, dt: DateTime<Tz>) -> NaiveDateTime {
        let local = dt.naive_local();
        match self {
            Granularity::Hour => local.date().and_hms_opt(local.hour(), 0, 0),
            Granularity::Day => local.date().and_hms_opt(0, 0, 0),
        }
        .unwrap_or(local)
    }

    fn label(&self, start: NaiveDateTime) -> String {
        match self {
            Granularity::Hour => start.format("%Y-%m-%d %H:00").to_string(),
            Granularity::Day => start.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            _ => bail!("unknown granularity: {s}"),
        }
    }
}

/// Inclusive time window. Open on a side whose bound is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| dt >= from) && self.to.is_none_or(|to| dt <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub bucket_label: String,

    pub bucket_start: DateTime<FixedOffset>,

    pub average_pm1: f64,

    pub average_pm10: f64,

    pub average_pm25: f64,

    pub count: usize,
}

#[derive(Debug, Default)]
struct Accumulator {
    pm1: f64,
    pm10: f64,
    pm2_5: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, reading: &Reading) {
        self.pm1 += reading.pm1;
        self.pm10 += reading.pm10;
        self.pm2_5 += reading.pm2_5;
        self.count += 1;
    }
}

/// Averages `readings` into hour or day buckets in `timezone`, oldest first.
///
/// Readings whose timestamp does not parse, or that fall outside `range`, do
/// not contribute to any bucket. Buckets are keyed by local wall-clock time,
/// so the hour repeated at a DST fall-back is a single hour bucket.
pub fn aggregate<'a, I>(readings: I, granularity: Granularity, timezone: Tz, range: TimeRange) -> Vec<Bucket>
where
    I: IntoIterator<Item = &'a Reading>,
{
    let mut buckets: BTreeMap<NaiveDateTime, Accumulator> = BTreeMap::new();
    let mut dropped = 0usize;

    for reading in readings {
        let Some(measured_at) = reading.measured_at(timezone) else {
            dropped += 1;
            continue;
        };
        if !range.contains(measured_at.with_timezone(&Utc)) {
            continue;
        }

        buckets
            .entry(granularity.truncate(measured_at))
            .or_default()
            .add(reading);
    }

    if dropped > 0 {
        tracing::warn!(dropped, "skipped readings with unparseable timestamps");
    }

    buckets
        .into_iter()
        .map(|(start, acc)| {
            let count = acc.count as f64;
            Bucket {
                bucket_label: granularity.label(start),
                bucket_start: resolve_start(start, timezone),
                average_pm1: acc.pm1 / count,
                average_pm10: acc.pm10 / count,
                average_pm25: acc.pm2_5 / count,
                count: acc.count,
            }
        })
        .collect()
}

/// Keeps readings that fall inside `range`. An unbounded range keeps
/// everything, including rows whose timestamp does not parse.
pub fn filter_range(readings: Vec<Reading>, timezone: Tz, range: TimeRange) -> Vec<Reading> {
    if range.is_unbounded() {
        return readings;
    }

    readings
        .into_iter()
        .filter(|r| {
            r.measured_at(timezone)
                .is_some_and(|dt| range.contains(dt.with_timezone(&Utc)))
        })
        .collect()
}

// A start skipped by a DST jump is reported as the same wall-clock time in UTC.
fn resolve_start(start: NaiveDateTime, timezone: Tz) -> DateTime<FixedOffset> {
    match timezone.from_local_datetime(&start) {
        LocalResult::Single(dt) => dt.fixed_offset(),
        LocalResult::Ambiguous(dt, _) => dt.fixed_offset(),
        LocalResult::None => Utc.from_utc_datetime(&start).fixed_offset(),
    }
}
