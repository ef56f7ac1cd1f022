use std::{collections::BTreeMap, sync::Arc};

use chrono_tz::Tz;
use tokio::sync::RwLock;

use crate::{
    aggregation::{TimeRange, filter_range},
    ingest::Ingest,
    pm::{DeviceMetadata, DeviceState, DeviceStatus, Reading},
};

#[derive(Debug, Default)]
struct Inner {
    devices: BTreeMap<String, DeviceState>,
    history: Vec<Reading>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds history rows as-is, without touching device state.
    pub async fn extend_history(&self, readings: impl IntoIterator<Item = Reading>) {
        self.inner.write().await.history.extend(readings);
    }

    pub async fn record_ingest(&self, ingest: &Ingest) -> DeviceState {
        let mut inner = self.inner.write().await;

        let existing = inner.devices.remove(&ingest.device_id);
        let device = ingest.merge_into(existing);
        inner.history.push(ingest.reading_for(&device));
        inner
            .devices
            .insert(device.device_id.clone(), device.clone());

        device
    }

    pub async fn list_devices(&self) -> Vec<DeviceState> {
        self.inner.read().await.devices.values().cloned().collect()
    }

    pub async fn get_device(&self, device_id: &str) -> Option<DeviceState> {
        self.inner.read().await.devices.get(device_id).cloned()
    }

    pub async fn update_status(&self, device_id: &str, status: DeviceStatus) -> bool {
        let mut inner = self.inner.write().await;
        let Some(device) = inner.devices.get_mut(device_id) else {
            return false;
        };

        device.status = status;
        true
    }

    pub async fn update_metadata(
        &self,
        device_id: &str,
        metadata: &DeviceMetadata,
    ) -> Option<DeviceState> {
        let mut inner = self.inner.write().await;
        let device = inner.devices.get_mut(device_id)?;

        device.apply_metadata(metadata);
        Some(device.clone())
    }

    pub async fn delete_device(&self, device_id: &str) -> bool {
        self.inner.write().await.devices.remove(device_id).is_some()
    }

    pub async fn history(&self, device_id: Option<&str>, range: TimeRange, timezone: Tz) -> Vec<Reading> {
        let readings = self
            .inner
            .read()
            .await
            .history
            .iter()
            .filter(|r| device_id.is_none_or(|id| r.device_id == id))
            .cloned()
            .collect();

        filter_range(readings, timezone, range)
    }
}
