use serde::{Deserialize, Serialize};

use crate::pm::DeviceStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub device_id: String,

    pub pm1: f64,

    pub pm10: f64,

    #[serde(rename = "pm2_5")]
    pub pm2_5: f64,

    pub timestamp: String,

    pub status: DeviceStatus,

    pub address: Option<String>,

    pub location: Option<String>,

    pub ip: Option<String>,
}

/// Fields a caller may change without sending a reading. `None` keeps the
/// stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    pub address: Option<String>,

    pub location: Option<String>,

    pub ip: Option<String>,
}

impl DeviceState {
    pub fn apply_metadata(&mut self, metadata: &DeviceMetadata) {
        if let Some(address) = &metadata.address {
            self.address = Some(address.clone());
        }
        if let Some(location) = &metadata.location {
            self.location = Some(location.clone());
        }
        if let Some(ip) = &metadata.ip {
            self.ip = Some(ip.clone());
        }
    }
}
