//! Per-sensor, per-metric watermarks.
//!
//! `CursorStore` maps `(sensor id, metric)` to the newest epoch timestamp
//! already persisted. Cursors only move forward: [`CursorStore::advance`]
//! ignores values that would lower a cursor, so batches that arrive out of
//! order can never cause history to be re-fetched.
//!
//! The store itself is not `Sync`; callers share it as [`SharedCursors`].
//! Each fan-out task only writes the entry for the sensor it owns.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::repository::AggregatorRepository;
use crate::types::{MetricKind, Sensor};

pub type SharedCursors = Arc<RwLock<CursorStore>>;

#[derive(Debug, Default)]
pub struct CursorStore {
    entries: HashMap<(String, MetricKind), f64>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCursors {
        Arc::new(RwLock::new(Self::new()))
    }

    /// `None` means no data has been seen: fetch the full history.
    pub fn get(&self, sensor_id: &str, kind: MetricKind) -> Option<f64> {
        self.entries.get(&(sensor_id.to_string(), kind)).copied()
    }

    /// Move the cursor to `timestamp` if that is newer. Returns `true` when
    /// the cursor changed.
    pub fn advance(&mut self, sensor_id: &str, kind: MetricKind, timestamp: f64) -> bool {
        if !timestamp.is_finite() {
            return false;
        }
        match self.entries.get_mut(&(sensor_id.to_string(), kind)) {
            Some(current) if *current >= timestamp => false,
            Some(current) => {
                *current = timestamp;
                true
            }
            None => {
                self.entries.insert((sensor_id.to_string(), kind), timestamp);
                true
            }
        }
    }

    /// Drop every cursor of a deregistered sensor.
    pub fn forget(&mut self, sensor_id: &str) {
        self.entries.retain(|(id, _), _| id != sensor_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Seed every history cursor of `sensor` from the newest persisted row.
pub async fn seed_cursors(
    repository: &AggregatorRepository,
    cursors: &SharedCursors,
    sensor: &Sensor,
) -> Result<(), sqlx::Error> {
    for kind in MetricKind::ALL {
        if let Some(max) = repository.max_timestamp(kind, &sensor.id).await? {
            cursors.write().await.advance(&sensor.id, kind, max);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use crate::types::TimeseriesRow;
    use proptest::prelude::*;

    #[test]
    fn missing_cursor_means_full_history() {
        let store = CursorStore::new();
        assert!(store.get("alpha", MetricKind::MacSeqnums).is_none());
    }

    #[test]
    fn advance_never_lowers_a_cursor() {
        let mut store = CursorStore::new();
        assert!(store.advance("alpha", MetricKind::MacSeqnums, 100.5));
        assert!(!store.advance("alpha", MetricKind::MacSeqnums, 99.0));
        assert!(!store.advance("alpha", MetricKind::MacSeqnums, f64::NAN));
        assert_eq!(store.get("alpha", MetricKind::MacSeqnums), Some(100.5));
    }

    #[test]
    fn cursors_are_independent_per_sensor_and_metric() {
        let mut store = CursorStore::new();
        store.advance("alpha", MetricKind::MacSeqnums, 10.0);
        store.advance("alpha", MetricKind::NwkSeqnums, 20.0);
        store.advance("beta", MetricKind::MacSeqnums, 30.0);

        assert_eq!(store.get("alpha", MetricKind::MacSeqnums), Some(10.0));
        assert_eq!(store.get("beta", MetricKind::MacSeqnums), Some(30.0));

        store.forget("alpha");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn seeding_uses_newest_persisted_timestamp() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = AggregatorRepository::new(pool);
        let sensor = Sensor::new("alpha", "http://10.0.0.1/api");

        for ts in [5.0, 42.25, 17.0] {
            let row = TimeseriesRow {
                sensor_id: "alpha".into(),
                timestamp: ts,
                src_pan_id: "0x99aa".into(),
                src_short_addr: Some("0x0001".into()),
                value: 1.0,
            };
            repo.insert_timeseries_row(MetricKind::BeaconSeqnums, &row).await.unwrap();
        }

        let cursors = CursorStore::shared();
        cursors.write().await.advance("alpha", MetricKind::MacSeqnums, 7.0);
        seed_cursors(&repo, &cursors, &sensor).await.unwrap();

        let store = cursors.read().await;
        assert_eq!(store.get("alpha", MetricKind::BeaconSeqnums), Some(42.25));
        assert_eq!(store.get("alpha", MetricKind::MacSeqnums), Some(7.0));
        assert!(store.get("alpha", MetricKind::PacketCounters).is_none());
    }

    proptest! {
        #[test]
        fn cursor_is_running_maximum(batches in proptest::collection::vec(0.0f64..1e10, 1..50)) {
            let mut store = CursorStore::new();
            let mut previous = None;
            for ts in &batches {
                store.advance("alpha", MetricKind::PacketCounters, *ts);
                let current = store.get("alpha", MetricKind::PacketCounters);
                if let (Some(prev), Some(cur)) = (previous, current) {
                    prop_assert!(cur >= prev);
                }
                previous = current;
            }
            let max = batches.iter().cloned().fold(f64::MIN, f64::max);
            prop_assert_eq!(store.get("alpha", MetricKind::PacketCounters), Some(max));
        }
    }
}
