use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    aggregation::{Granularity, TimeRange},
    pm::DeviceState,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResp {
    pub message: String,
}

impl MessageResp {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// Response body for POST /api/readings
#[derive(Debug, Serialize)]
pub struct IngestResp {
    pub message: String,
    pub data: DeviceState,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateReq {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(alias = "pmId")]
    pub device_id: Option<String>,
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
}

impl HistoryQuery {
    pub fn range(&self) -> TimeRange {
        time_range(self.from, self.to)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AveragesQuery {
    #[serde(alias = "pmId")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub granularity: Granularity,
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
}

impl AveragesQuery {
    pub fn range(&self) -> TimeRange {
        time_range(self.from, self.to)
    }
}

fn time_range(from: Option<DateTime<FixedOffset>>, to: Option<DateTime<FixedOffset>>) -> TimeRange {
    TimeRange {
        from: from.map(|dt| dt.with_timezone(&Utc)),
        to: to.map(|dt| dt.with_timezone(&Utc)),
    }
}
