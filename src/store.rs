mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use chrono_tz::Tz;
use sqlx::PgPool;

use crate::{
    aggregation::TimeRange,
    db,
    ingest::Ingest,
    pm::{DeviceMetadata, DeviceState, DeviceStatus, Reading},
};

/// Where devices and history live. Postgres in production; the in-memory
/// variant backs the tests and database-less runs.
#[derive(Debug, Clone)]
pub enum Store {
    Postgres(PgPool),
    Memory(MemoryStore),
}

impl Store {
    pub fn kind(&self) -> &'static str {
        match self {
            Store::Postgres(_) => "postgres",
            Store::Memory(_) => "memory",
        }
    }

    pub async fn record_ingest(&self, ingest: &Ingest) -> Result<DeviceState> {
        match self {
            Store::Postgres(pool) => db::record_ingest(pool, ingest).await,
            Store::Memory(memory) => Ok(memory.record_ingest(ingest).await),
        }
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceState>> {
        match self {
            Store::Postgres(pool) => db::list_devices(pool).await,
            Store::Memory(memory) => Ok(memory.list_devices().await),
        }
    }

    pub async fn get_device(&self, device_id: &str) -> Result<Option<DeviceState>> {
        match self {
            Store::Postgres(pool) => db::get_device(pool, device_id).await,
            Store::Memory(memory) => Ok(memory.get_device(device_id).await),
        }
    }

    pub async fn update_status(&self, device_id: &str, status: DeviceStatus) -> Result<bool> {
        match self {
            Store::Postgres(pool) => db::update_status(pool, device_id, status).await,
            Store::Memory(memory) => Ok(memory.update_status(device_id, status).await),
        }
    }

    pub async fn update_metadata(
        &self,
        device_id: &str,
        metadata: &DeviceMetadata,
    ) -> Result<Option<DeviceState>> {
        match self {
            Store::Postgres(pool) => db::update_metadata(pool, device_id, metadata).await,
            Store::Memory(memory) => Ok(memory.update_metadata(device_id, metadata).await),
        }
    }

    pub async fn delete_device(&self, device_id: &str) -> Result<bool> {
        match self {
            Store::Postgres(pool) => db::delete_device(pool, device_id).await,
            Store::Memory(memory) => Ok(memory.delete_device(device_id).await),
        }
    }

    /// History of one device, or of all devices, restricted to `range`.
    /// `timezone` places naive timestamps on the timeline.
    pub async fn history(
        &self,
        device_id: Option<&str>,
        range: TimeRange,
        timezone: Tz,
    ) -> Result<Vec<Reading>> {
        match self {
            Store::Postgres(pool) => db::history(pool, device_id, range).await,
            Store::Memory(memory) => Ok(memory.history(device_id, range, timezone).await),
        }
    }
}
