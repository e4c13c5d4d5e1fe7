//! Database repository for aggregator persistence.
//!
//! All SQLite read/write logic lives here, split by concern:
//! sensors and cursor seeds in this file, time series in [`telemetry`],
//! key material in [`keys`], topology snapshots in [`topology`], and raw
//! events / operator alerts in [`alerts`].
//!
//! Every method is a single statement unless documented otherwise; the
//! store's per-statement atomicity and unique constraints are the only
//! concurrency backstop the pollers rely on.

mod alerts;
mod keys;
mod telemetry;
mod topology;

pub use telemetry::{DeviceFilter, SeriesFilter};
pub use topology::{SnapshotOutcome, TopologyScope};

use sqlx::SqlitePool;

use crate::types::{MetricKind, Sensor};

/// Repository for reading and writing aggregator state to SQLite.
pub struct AggregatorRepository {
    pool: SqlitePool,
}

impl AggregatorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- Sensor registry ----

    /// All registered sensors ordered by id.
    pub async fn list_sensors(&self) -> Result<Vec<Sensor>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT wids_sensor_id, wids_sensor_api FROM wids_sensors ORDER BY wids_sensor_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let sensors = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let id: String = row.try_get("wids_sensor_id").ok()?;
                let api: String = row.try_get("wids_sensor_api").ok()?;
                Some(Sensor { id, api })
            })
            .collect();

        Ok(sensors)
    }

    pub async fn find_sensor(&self, id: &str) -> Result<Option<Sensor>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT wids_sensor_id, wids_sensor_api FROM wids_sensors WHERE wids_sensor_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            use sqlx::Row;
            Some(Sensor {
                id: row.try_get("wids_sensor_id").ok()?,
                api: row.try_get("wids_sensor_api").ok()?,
            })
        }))
    }

    /// `true` when either the id or the API URL is already registered.
    pub async fn sensor_conflicts(&self, sensor: &Sensor) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM wids_sensors
             WHERE wids_sensor_id = ? OR wids_sensor_api = ?",
        )
        .bind(&sensor.id)
        .bind(&sensor.api)
        .fetch_one(&self.pool)
        .await?;

        use sqlx::Row;
        let count: i64 = row.try_get("cnt").unwrap_or(0);
        Ok(count > 0)
    }

    pub async fn insert_sensor(&self, sensor: &Sensor) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO wids_sensors (wids_sensor_id, wids_sensor_api) VALUES (?, ?)")
            .bind(&sensor.id)
            .bind(&sensor.api)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns `true` if a sensor was removed.
    pub async fn delete_sensor(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM wids_sensors WHERE wids_sensor_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- Cursor seeds ----

    /// Newest persisted timestamp of `kind` for `sensor_id`, if any.
    pub async fn max_timestamp(
        &self,
        kind: MetricKind,
        sensor_id: &str,
    ) -> Result<Option<f64>, sqlx::Error> {
        let sql = format!(
            "SELECT MAX(epoch_timestamp) AS max_ts FROM {} WHERE wids_sensor_id = ?",
            kind.table()
        );

        let row = sqlx::query(&sql).bind(sensor_id).fetch_one(&self.pool).await?;

        use sqlx::Row;
        Ok(row.try_get::<Option<f64>, _>("max_ts").ok().flatten())
    }
}

/// `true` if `err` is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}
