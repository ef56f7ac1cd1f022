use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::pm::{
    DeviceMetadata, DeviceState, DeviceStatus, Reading, check_concentration, format_timestamp,
    parse_timestamp,
};

/// Body of `POST /api/readings`.
///
/// Sensor firmware in the field still posts `pmId`/`PM1`/`PM10`/`PM2_5`, so
/// those names are accepted next to the camelCase ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(alias = "pmId")]
    pub device_id: Option<String>,

    #[serde(alias = "PM1")]
    pub pm1: Option<f64>,

    #[serde(alias = "PM10")]
    pub pm10: Option<f64>,

    #[serde(rename = "pm2_5", alias = "PM2_5")]
    pub pm2_5: Option<f64>,

    pub timestamp: Option<String>,

    pub status: Option<String>,

    #[serde(flatten)]
    pub metadata: DeviceMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ingest {
    pub device_id: String,

    pub pm1: f64,

    pub pm10: f64,

    pub pm2_5: f64,

    pub timestamp: String,

    pub status: Option<DeviceStatus>,

    pub metadata: DeviceMetadata,
}

impl IngestRequest {
    pub fn validate(self, now: DateTime<Utc>, timezone: Tz) -> Result<Ingest> {
        let device_id = match self.device_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => bail!("deviceId is required"),
        };

        let pm1 = concentration("pm1", self.pm1)?;
        let pm10 = concentration("pm10", self.pm10)?;
        let pm2_5 = concentration("pm2_5", self.pm2_5)?;

        let timestamp = match self.timestamp.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let parsed = parse_timestamp(raw, timezone)
                    .ok_or_else(|| anyhow!("invalid timestamp: {raw}"))?;
                format_timestamp(&parsed)
            }
            _ => now.to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let status = self
            .status
            .as_deref()
            .map(str::parse::<DeviceStatus>)
            .transpose()
            .context("invalid status")?;

        Ok(Ingest {
            device_id,
            pm1,
            pm10,
            pm2_5,
            timestamp,
            status,
            metadata: self.metadata,
        })
    }
}

impl Ingest {
    /// The history row for this ingest, located where the device is after the
    /// upsert.
    pub fn reading_for(&self, device: &DeviceState) -> Reading {
        Reading {
            device_id: self.device_id.clone(),
            pm1: self.pm1,
            pm10: self.pm10,
            pm2_5: self.pm2_5,
            timestamp: self.timestamp.clone(),
            location: device.location.clone().unwrap_or_default(),
        }
    }

    /// Applies this ingest on top of `existing`, or creates a fresh device.
    pub fn merge_into(&self, existing: Option<DeviceState>) -> DeviceState {
        let mut device = existing.unwrap_or_else(|| DeviceState {
            device_id: self.device_id.clone(),
            pm1: 0.0,
            pm10: 0.0,
            pm2_5: 0.0,
            timestamp: String::new(),
            status: DeviceStatus::default(),
            address: None,
            location: None,
            ip: None,
        });

        device.pm1 = self.pm1;
        device.pm10 = self.pm10;
        device.pm2_5 = self.pm2_5;
        device.timestamp = self.timestamp.clone();
        if let Some(status) = self.status {
            device.status = status;
        }
        device.apply_metadata(&self.metadata);

        device
    }
}

fn concentration(field: &str, value: Option<f64>) -> Result<f64> {
    check_concentration(field, value.unwrap_or(0.0))
}
