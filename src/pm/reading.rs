use anyhow::{Result, bail};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::pm::parse_timestamp;

/// One historical sample as stored in the history table.
///
/// `timestamp` is kept verbatim; rows imported from older deployments are not
/// guaranteed to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub device_id: String,

    pub pm1: f64,

    pub pm10: f64,

    #[serde(rename = "pm2_5")]
    pub pm2_5: f64,

    pub timestamp: String,

    pub location: String,
}

impl Reading {
    pub fn measured_at(&self, timezone: Tz) -> Option<DateTime<Tz>> {
        parse_timestamp(&self.timestamp, timezone)
    }
}

/// Accepts a PM concentration only when it is finite and non-negative.
pub fn check_concentration(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        bail!("{field} must be a non-negative number, got {value}");
    }

    Ok(value)
}
