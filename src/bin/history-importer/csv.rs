use std::fs::File;

use anyhow::{Context as _, Result, anyhow};
use chrono_tz::Tz;
use csv::{Reader, StringRecord};
use pm_monitor::pm::{Reading, check_concentration, format_timestamp, parse_timestamp};

const TIMESTAMP_HEADERS: [&str; 4] = ["timestamp", "time", "date", "datetime"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    timestamp: usize,
    pm1: usize,
    pm2_5: usize,
    pm10: usize,
}

#[derive(Debug)]
pub struct CsvReadingIter {
    reader: Reader<File>,
    columns: Columns,
    device_id: String,
    location: String,
    timezone: Tz,
}

impl CsvReadingIter {
    pub fn new(file: File, device_id: String, location: String, timezone: Tz) -> Result<Self> {
        let mut reader = Reader::from_reader(file);
        let header = reader.headers().context("failed to read CSV header")?;
        let columns = detect_columns(header)?;

        Ok(Self {
            reader,
            columns,
            device_id,
            location,
            timezone,
        })
    }
}

impl Iterator for CsvReadingIter {
    type Item = Result<Reading>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.reader.records().next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };

        Some(parse_row(
            &row,
            self.columns,
            &self.device_id,
            &self.location,
            self.timezone,
        ))
    }
}

fn parse_row(
    row: &StringRecord,
    columns: Columns,
    device_id: &str,
    location: &str,
    timezone: Tz,
) -> Result<Reading> {
    let field = |index: usize| row.get(index).unwrap_or("").trim();

    let raw_timestamp = field(columns.timestamp);
    let measured_at = parse_timestamp(raw_timestamp, timezone)
        .ok_or_else(|| anyhow!("failed to parse timestamp: {raw_timestamp}"))?;

    let concentration = |index: usize, name: &str| -> Result<f64> {
        let raw = field(index);
        let value = raw
            .parse()
            .with_context(|| format!("failed to parse {name}: {raw}"))?;
        check_concentration(name, value).with_context(|| format!("bad row at {raw_timestamp}"))
    };

    Ok(Reading {
        device_id: device_id.to_string(),
        pm1: concentration(columns.pm1, "PM1")?,
        pm10: concentration(columns.pm10, "PM10")?,
        pm2_5: concentration(columns.pm2_5, "PM2.5")?,
        timestamp: format_timestamp(&measured_at),
        location: location.to_string(),
    })
}

fn detect_columns(header: &StringRecord) -> Result<Columns> {
    let normalized: Vec<String> = header
        .iter()
        .map(|h| {
            h.trim()
                .chars()
                .filter(|c| !matches!(c, ' ' | '_' | '.' | '-'))
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .collect();

    Ok(Columns {
        timestamp: position(&normalized, &TIMESTAMP_HEADERS)
            .ok_or_else(|| anyhow!("CSV has no timestamp column"))?,
        pm1: position(&normalized, &["pm1"]).ok_or_else(|| anyhow!("CSV has no PM1 column"))?,
        pm2_5: position(&normalized, &["pm25"])
            .ok_or_else(|| anyhow!("CSV has no PM2.5 column"))?,
        pm10: position(&normalized, &["pm10"]).ok_or_else(|| anyhow!("CSV has no PM10 column"))?,
    })
}

fn position(headers: &[String], names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| names.iter().any(|n| h == n))
}
