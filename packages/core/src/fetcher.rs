//! Cursor-based incremental fetch of per-sensor time series.
//!
//! Each call asks one sensor for one metric's entries newer than the stored
//! cursor, flattens them into [`TimeseriesRow`]s, inserts every row on its
//! own and then advances the cursor to the newest timestamp in the batch.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::cursor::SharedCursors;
use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::repository::AggregatorRepository;
use crate::services::SensorApi;
use crate::types::{de_epoch, MetricKind, Sensor, TimeseriesRow, UtilizationSample};

/// Per-network totals with nested per-device totals.
#[derive(Debug, Deserialize)]
struct CounterEntry {
    #[serde(rename = "epochTimestamp", deserialize_with = "de_epoch")]
    epoch_timestamp: f64,
    #[serde(rename = "panPacketCounters", alias = "panByteCounters", default)]
    networks: Vec<NetworkCounter>,
}

#[derive(Debug, Deserialize)]
struct NetworkCounter {
    srcpanid: String,
    counter: f64,
    #[serde(rename = "devicePacketCounters", alias = "deviceByteCounters", default)]
    devices: Vec<DeviceCounter>,
}

#[derive(Debug, Deserialize)]
struct DeviceCounter {
    srcshortaddr: String,
    counter: f64,
}

/// One per-device measurement.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(rename = "epochTimestamp", deserialize_with = "de_epoch")]
    epoch_timestamp: f64,
    srcpanid: String,
    srcshortaddr: String,
    #[serde(
        rename = "macSeqnum",
        alias = "beaconSeqnum",
        alias = "nwkSeqnum",
        alias = "nwkauxSeqnum",
        alias = "batteryPercentage"
    )]
    value: f64,
}

/// Outcome of one incremental fetch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchReport {
    /// Entries returned by the sensor.
    pub entries: usize,
    /// Entries that could not be decoded.
    pub skipped: usize,
    pub inserted: usize,
    pub failed: usize,
    /// Cursor after the fetch.
    pub cursor: Option<f64>,
}

/// Flatten one entry into rows sharing its timestamp.
fn decode_entry(
    kind: MetricKind,
    sensor_id: &str,
    entry: Value,
) -> Result<(f64, Vec<TimeseriesRow>), serde_json::Error> {
    if kind.is_hierarchical() {
        let entry: CounterEntry = serde_json::from_value(entry)?;
        let ts = entry.epoch_timestamp;
        let mut rows = Vec::new();
        for network in entry.networks {
            rows.push(TimeseriesRow {
                sensor_id: sensor_id.to_string(),
                timestamp: ts,
                src_pan_id: network.srcpanid.clone(),
                src_short_addr: None,
                value: network.counter,
            });
            for device in network.devices {
                rows.push(TimeseriesRow {
                    sensor_id: sensor_id.to_string(),
                    timestamp: ts,
                    src_pan_id: network.srcpanid.clone(),
                    src_short_addr: Some(device.srcshortaddr),
                    value: device.counter,
                });
            }
        }
        Ok((ts, rows))
    } else {
        let entry: FlatEntry = serde_json::from_value(entry)?;
        let row = TimeseriesRow {
            sensor_id: sensor_id.to_string(),
            timestamp: entry.epoch_timestamp,
            src_pan_id: entry.srcpanid,
            src_short_addr: Some(entry.srcshortaddr),
            value: entry.value,
        };
        Ok((entry.epoch_timestamp, vec![row]))
    }
}

#[derive(Clone)]
pub struct IncrementalFetcher {
    api: Arc<dyn SensorApi>,
    repository: Arc<AggregatorRepository>,
    cursors: SharedCursors,
    metrics: Arc<AppMetrics>,
}

impl IncrementalFetcher {
    pub fn new(
        api: Arc<dyn SensorApi>,
        repository: Arc<AggregatorRepository>,
        cursors: SharedCursors,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            api,
            repository,
            cursors,
            metrics,
        }
    }

    /// Fetch, persist and advance one `(sensor, kind)` cursor.
    ///
    /// The cursor moves to the maximum timestamp of the decoded batch unless
    /// the batch produced rows and every one of them was rejected.
    pub async fn fetch(&self, sensor: &Sensor, kind: MetricKind) -> Result<FetchReport, AppError> {
        let last = self.cursors.read().await.get(&sensor.id, kind);
        let entries = self.api.fetch_history(sensor, kind, last).await?;

        let mut report = FetchReport {
            entries: entries.len(),
            ..FetchReport::default()
        };
        let mut batch_max: Option<f64> = None;
        let mut attempted = 0usize;

        for entry in entries {
            let (ts, rows) = match decode_entry(kind, &sensor.id, entry) {
                Ok(decoded) => decoded,
                Err(err) => {
                    report.skipped += 1;
                    tracing::warn!(sensor = %sensor.id, %kind, "Skipping malformed entry: {}", err);
                    continue;
                }
            };
            batch_max = Some(batch_max.map_or(ts, |max| max.max(ts)));

            for row in rows {
                attempted += 1;
                match self.repository.insert_timeseries_row(kind, &row).await {
                    Ok(()) => report.inserted += 1,
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(sensor = %sensor.id, %kind, "Row rejected: {}", err);
                    }
                }
            }
        }

        self.metrics
            .rows_inserted_total
            .with_label_values(&[kind.table()])
            .inc_by(report.inserted as f64);
        self.metrics
            .rows_failed_total
            .with_label_values(&[kind.table()])
            .inc_by(report.failed as f64);

        let whole_batch_failed = attempted > 0 && report.inserted == 0;
        let mut cursors = self.cursors.write().await;
        if let (Some(max), false) = (batch_max, whole_batch_failed) {
            cursors.advance(&sensor.id, kind, max);
        }
        report.cursor = cursors.get(&sensor.id, kind);
        drop(cursors);

        if report.inserted > 0 {
            tracing::debug!(
                sensor = %sensor.id,
                %kind,
                "Stored {} rows (cursor {:?})",
                report.inserted,
                report.cursor
            );
        }

        Ok(report)
    }

    /// Store one utilization sample for `sensor`.
    pub async fn poll_utilization(&self, sensor: &Sensor) -> Result<(), AppError> {
        let raw = self.api.fetch_utilization(sensor).await?;
        let sample: UtilizationSample =
            serde_json::from_value(raw).map_err(|e| AppError::Parse(e.to_string()))?;

        self.repository.insert_utilization(&sensor.id, &sample).await?;
        self.metrics
            .rows_inserted_total
            .with_label_values(&["wids_utilization"])
            .inc();
        Ok(())
    }
}
