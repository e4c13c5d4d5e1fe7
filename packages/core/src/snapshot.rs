//! Snapshot replacement of sensor-scoped topology tables.
//!
//! A topology response is the sensor's full current state. The sensor's
//! previous rows are deleted and the response reinserted; nothing is merged
//! across polls. A failed fetch leaves the previous snapshot in place.

use std::sync::Arc;

use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::repository::{AggregatorRepository, SnapshotOutcome};
use crate::services::SensorApi;
use crate::types::{Sensor, TopologyRow, TopologyTable};

#[derive(Clone)]
pub struct SnapshotReplacer {
    api: Arc<dyn SensorApi>,
    repository: Arc<AggregatorRepository>,
    metrics: Arc<AppMetrics>,
}

impl SnapshotReplacer {
    pub fn new(
        api: Arc<dyn SensorApi>,
        repository: Arc<AggregatorRepository>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            api,
            repository,
            metrics,
        }
    }

    pub async fn replace(&self, sensor: &Sensor, table: TopologyTable) -> Result<SnapshotOutcome, AppError> {
        let entries = self.api.fetch_snapshot(sensor, table).await?;

        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            match TopologyRow::decode(table, entry) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    tracing::warn!(sensor = %sensor.id, %table, "Skipping malformed row: {}", err)
                }
            }
        }

        let outcome = self.repository.replace_snapshot(table, &sensor.id, &rows).await?;

        self.metrics
            .rows_inserted_total
            .with_label_values(&[table.table()])
            .inc_by(outcome.inserted as f64);
        self.metrics
            .rows_failed_total
            .with_label_values(&[table.table()])
            .inc_by(outcome.failed as f64);

        tracing::debug!(
            sensor = %sensor.id,
            %table,
            "Snapshot replaced ({} removed, {} stored)",
            outcome.deleted,
            outcome.inserted
        );

        Ok(outcome)
    }
}
