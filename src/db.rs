use std::collections::{BTreeMap, btree_map::Entry};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::{FromRow, PgPool, Postgres, Transaction, postgres::PgPoolOptions};

use crate::{
    aggregation::TimeRange,
    ingest::Ingest,
    pm::{DeviceMetadata, DeviceState, DeviceStatus, Reading, parse_timestamp},
};

#[derive(Debug, FromRow)]
struct DeviceRow {
    pm_id: String,
    pm1: f64,
    pm10: f64,
    pm2_5: f64,
    measured_at: String,
    status: String,
    address: Option<String>,
    location: Option<String>,
    ip: Option<String>,
}

impl TryFrom<DeviceRow> for DeviceState {
    type Error = anyhow::Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let status: DeviceStatus = row
            .status
            .parse()
            .with_context(|| format!("bad status stored for device {}", row.pm_id))?;

        Ok(DeviceState {
            device_id: row.pm_id,
            pm1: row.pm1,
            pm10: row.pm10,
            pm2_5: row.pm2_5,
            timestamp: row.measured_at,
            status,
            address: row.address,
            location: row.location,
            ip: row.ip,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    pm_id: String,
    pm1: f64,
    pm10: f64,
    pm2_5: f64,
    measured_at: String,
    location: String,
}

impl From<HistoryRow> for Reading {
    fn from(row: HistoryRow) -> Self {
        Reading {
            device_id: row.pm_id,
            pm1: row.pm1,
            pm10: row.pm10,
            pm2_5: row.pm2_5,
            timestamp: row.measured_at,
            location: row.location,
        }
    }
}

const DEVICE_COLUMNS: &str = "pm_id, pm1, pm10, pm2_5, measured_at, status, address, location, ip";

/// Instant stored next to the `measured_at` text. Written timestamps always
/// carry an offset, so the zone only matters for legacy naive values.
fn recorded_at(timestamp: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(timestamp, Tz::UTC).map(|dt| dt.with_timezone(&Utc))
}

pub async fn new_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .connect(database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    Ok(pool)
}

pub async fn record_ingest(pool: &PgPool, ingest: &Ingest) -> Result<DeviceState> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let existing = sqlx::query_as::<_, DeviceRow>(&format!(
        "SELECT {DEVICE_COLUMNS} FROM pm_devices WHERE pm_id = $1 FOR UPDATE"
    ))
    .bind(&ingest.device_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to load device")?
    .map(DeviceState::try_from)
    .transpose()?;

    let device = ingest.merge_into(existing);
    upsert_device(&mut tx, &device).await?;

    let reading = ingest.reading_for(&device);
    sqlx::query(
        r#"
        INSERT INTO pm_history (pm_id, pm1, pm10, pm2_5, measured_at, recorded_at, location)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&reading.device_id)
    .bind(reading.pm1)
    .bind(reading.pm10)
    .bind(reading.pm2_5)
    .bind(&reading.timestamp)
    .bind(recorded_at(&reading.timestamp))
    .bind(&reading.location)
    .execute(&mut *tx)
    .await
    .context("failed to append history")?;

    tx.commit().await.context("failed to commit transaction")?;

    Ok(device)
}

async fn upsert_device(tx: &mut Transaction<'_, Postgres>, device: &DeviceState) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pm_devices (pm_id, pm1, pm10, pm2_5, measured_at, recorded_at, status, address, location, ip)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (pm_id) DO UPDATE SET
            pm1 = EXCLUDED.pm1,
            pm10 = EXCLUDED.pm10,
            pm2_5 = EXCLUDED.pm2_5,
            measured_at = EXCLUDED.measured_at,
            recorded_at = EXCLUDED.recorded_at,
            status = EXCLUDED.status,
            address = EXCLUDED.address,
            location = EXCLUDED.location,
            ip = EXCLUDED.ip
        "#,
    )
    .bind(&device.device_id)
    .bind(device.pm1)
    .bind(device.pm10)
    .bind(device.pm2_5)
    .bind(&device.timestamp)
    .bind(recorded_at(&device.timestamp))
    .bind(device.status.as_str())
    .bind(&device.address)
    .bind(&device.location)
    .bind(&device.ip)
    .execute(&mut **tx)
    .await
    .context("failed to upsert device")?;

    Ok(())
}

pub async fn list_devices(pool: &PgPool) -> Result<Vec<DeviceState>> {
    sqlx::query_as::<_, DeviceRow>(&format!(
        "SELECT {DEVICE_COLUMNS} FROM pm_devices ORDER BY pm_id"
    ))
    .fetch_all(pool)
    .await
    .context("failed to list devices")?
    .into_iter()
    .map(DeviceState::try_from)
    .collect()
}

pub async fn get_device(pool: &PgPool, device_id: &str) -> Result<Option<DeviceState>> {
    sqlx::query_as::<_, DeviceRow>(&format!(
        "SELECT {DEVICE_COLUMNS} FROM pm_devices WHERE pm_id = $1"
    ))
    .bind(device_id)
    .fetch_optional(pool)
    .await
    .context("failed to get device")?
    .map(DeviceState::try_from)
    .transpose()
}

pub async fn update_status(pool: &PgPool, device_id: &str, status: DeviceStatus) -> Result<bool> {
    let result = sqlx::query("UPDATE pm_devices SET status = $2 WHERE pm_id = $1")
        .bind(device_id)
        .bind(status.as_str())
        .execute(pool)
        .await
        .context("failed to update device status")?;

    Ok(result.rows_affected() > 0)
}

pub async fn update_metadata(
    pool: &PgPool,
    device_id: &str,
    metadata: &DeviceMetadata,
) -> Result<Option<DeviceState>> {
    sqlx::query_as::<_, DeviceRow>(&format!(
        r#"
        UPDATE pm_devices SET
            address = COALESCE($2, address),
            location = COALESCE($3, location),
            ip = COALESCE($4, ip)
        WHERE pm_id = $1
        RETURNING {DEVICE_COLUMNS}
        "#
    ))
    .bind(device_id)
    .bind(&metadata.address)
    .bind(&metadata.location)
    .bind(&metadata.ip)
    .fetch_optional(pool)
    .await
    .context("failed to update device")?
    .map(DeviceState::try_from)
    .transpose()
}

pub async fn delete_device(pool: &PgPool, device_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM pm_devices WHERE pm_id = $1")
        .bind(device_id)
        .execute(pool)
        .await
        .context("failed to delete device")?;

    Ok(result.rows_affected() > 0)
}

/// History rows in insertion order. A bounded `range` is applied to the
/// stored instant, so rows whose timestamp never parsed only appear in
/// unbounded queries.
pub async fn history(pool: &PgPool, device_id: Option<&str>, range: TimeRange) -> Result<Vec<Reading>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT pm_id, pm1, pm10, pm2_5, measured_at, location
        FROM pm_history
        WHERE ($1::TEXT IS NULL OR pm_id = $1)
          AND ($2::TIMESTAMPTZ IS NULL OR recorded_at >= $2)
          AND ($3::TIMESTAMPTZ IS NULL OR recorded_at <= $3)
        ORDER BY id
        "#,
    )
    .bind(device_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await
    .context("failed to fetch history")?;

    Ok(rows.into_iter().map(Reading::from).collect())
}

/// Appends imported readings and moves each device's latest-reading fields
/// forward when the batch holds something newer than what is stored.
pub async fn bulk_insert_history(pool: &PgPool, readings: &[Reading]) -> Result<()> {
    if readings.is_empty() {
        return Ok(());
    }

    let device_ids: Vec<&str> = readings.iter().map(|r| r.device_id.as_str()).collect();
    let pm1s: Vec<f64> = readings.iter().map(|r| r.pm1).collect();
    let pm10s: Vec<f64> = readings.iter().map(|r| r.pm10).collect();
    let pm2_5s: Vec<f64> = readings.iter().map(|r| r.pm2_5).collect();
    let measured_ats: Vec<&str> = readings.iter().map(|r| r.timestamp.as_str()).collect();
    let recorded_ats: Vec<Option<DateTime<Utc>>> =
        readings.iter().map(|r| recorded_at(&r.timestamp)).collect();
    let locations: Vec<&str> = readings.iter().map(|r| r.location.as_str()).collect();

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query(
        r#"
        INSERT INTO pm_devices (pm_id)
        SELECT DISTINCT * FROM UNNEST($1::TEXT[])
        ON CONFLICT (pm_id) DO NOTHING
        "#,
    )
    .bind(&device_ids)
    .execute(&mut *tx)
    .await
    .context("failed to create missing devices")?;

    for (reading, at) in latest_per_device(readings) {
        sqlx::query(
            r#"
            UPDATE pm_devices SET
                pm1 = $2,
                pm10 = $3,
                pm2_5 = $4,
                measured_at = $5,
                recorded_at = $6,
                location = COALESCE(NULLIF($7, ''), location)
            WHERE pm_id = $1 AND (recorded_at IS NULL OR recorded_at < $6)
            "#,
        )
        .bind(&reading.device_id)
        .bind(reading.pm1)
        .bind(reading.pm10)
        .bind(reading.pm2_5)
        .bind(&reading.timestamp)
        .bind(at)
        .bind(&reading.location)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to update latest reading of {}", reading.device_id))?;
    }

    sqlx::query(
        r#"
        INSERT INTO pm_history (pm_id, pm1, pm10, pm2_5, measured_at, recorded_at, location)
        SELECT * FROM UNNEST($1::TEXT[], $2::FLOAT8[], $3::FLOAT8[], $4::FLOAT8[], $5::TEXT[], $6::TIMESTAMPTZ[], $7::TEXT[])
        "#,
    )
    .bind(&device_ids)
    .bind(&pm1s)
    .bind(&pm10s)
    .bind(&pm2_5s)
    .bind(&measured_ats)
    .bind(&recorded_ats)
    .bind(&locations)
    .execute(&mut *tx)
    .await
    .context("failed to execute bulk insert query")?;

    tx.commit().await.context("failed to commit transaction")?;

    Ok(())
}

/// Newest reading per device; a later row wins a tie.
fn latest_per_device(readings: &[Reading]) -> Vec<(&Reading, DateTime<Utc>)> {
    let mut latest: BTreeMap<&str, (&Reading, DateTime<Utc>)> = BTreeMap::new();

    for reading in readings {
        let Some(at) = recorded_at(&reading.timestamp) else {
            continue;
        };

        match latest.entry(reading.device_id.as_str()) {
            Entry::Vacant(entry) => {
                entry.insert((reading, at));
            }
            Entry::Occupied(mut entry) => {
                if at >= entry.get().1 {
                    entry.insert((reading, at));
                }
            }
        }
    }

    latest.into_values().collect()
}
