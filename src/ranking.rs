use serde::{Deserialize, Serialize};

use crate::pm::DeviceState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub source: String,

    pub timestamp: String,

    pub value: f64,

    pub location: Option<String>,
}

impl From<&DeviceState> for RankEntry {
    fn from(device: &DeviceState) -> Self {
        Self {
            source: device.device_id.clone(),
            timestamp: device.timestamp.clone(),
            value: device.pm2_5.round(),
            location: device.location.clone(),
        }
    }
}

/// Ranks the latest device readings together with an optional reference
/// reading, highest value first.
///
/// Entries with an empty source are left out, as are devices that have no
/// reading yet. Equal values keep their input order: devices as given, then
/// the reference.
pub fn rank(devices: &[DeviceState], reference: Option<RankEntry>) -> Vec<RankEntry> {
    let mut entries: Vec<RankEntry> = devices
        .iter()
        .filter(|device| !device.timestamp.is_empty())
        .map(RankEntry::from)
        .chain(reference)
        .filter(|entry| !entry.source.is_empty())
        .collect();

    entries.sort_by(|a, b| b.value.total_cmp(&a.value));

    entries
}
