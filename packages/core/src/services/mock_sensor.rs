//! In-process [`SensorApi`] used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};
use crate::services::provider::SensorApi;
use crate::types::{KeyKind, MetricKind, Sensor, TopologyTable};

#[derive(Default)]
struct State {
    history: HashMap<MetricKind, Vec<Value>>,
    utilization: Option<Value>,
    snapshots: HashMap<TopologyTable, Vec<Value>>,
    keys: HashMap<KeyKind, Vec<Value>>,
    pcaps: Vec<(String, Vec<u8>)>,
    failing: Vec<String>,
    history_queries: Vec<(String, MetricKind, Option<f64>)>,
    pushes: Vec<(String, KeyKind, Vec<String>)>,
}

/// Every configured sensor answers with the same data unless its id was
/// passed to [`MockSensor::failing_for`].
#[derive(Default)]
pub struct MockSensor {
    state: Mutex<State>,
}

impl MockSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(self, kind: MetricKind, entries: Vec<Value>) -> Self {
        self.state.lock().unwrap().history.insert(kind, entries);
        self
    }

    pub fn with_utilization(self, sample: Value) -> Self {
        self.state.lock().unwrap().utilization = Some(sample);
        self
    }

    pub fn with_snapshot(self, table: TopologyTable, rows: Vec<Value>) -> Self {
        self.set_snapshot(table, rows);
        self
    }

    pub fn with_keys(self, kind: KeyKind, keys: Vec<Value>) -> Self {
        self.state.lock().unwrap().keys.insert(kind, keys);
        self
    }

    pub fn with_pcap(self, name: &str, bytes: &[u8]) -> Self {
        self.state.lock().unwrap().pcaps.push((name.to_string(), bytes.to_vec()));
        self
    }

    /// Requests for `sensor_id` fail with a 503.
    pub fn failing_for(self, sensor_id: &str) -> Self {
        self.state.lock().unwrap().failing.push(sensor_id.to_string());
        self
    }

    pub fn set_snapshot(&self, table: TopologyTable, rows: Vec<Value>) {
        self.state.lock().unwrap().snapshots.insert(table, rows);
    }

    pub fn set_history(&self, kind: MetricKind, entries: Vec<Value>) {
        self.state.lock().unwrap().history.insert(kind, entries);
    }

    /// Keys currently held, as reported by `fetch_keys`.
    pub fn keys(&self, kind: KeyKind) -> Vec<Value> {
        self.state.lock().unwrap().keys.get(&kind).cloned().unwrap_or_default()
    }

    pub fn history_queries(&self) -> Vec<(String, MetricKind, Option<f64>)> {
        self.state.lock().unwrap().history_queries.clone()
    }

    pub fn pushes(&self) -> Vec<(String, KeyKind, Vec<String>)> {
        self.state.lock().unwrap().pushes.clone()
    }

    fn check(&self, sensor: &Sensor) -> ProviderResult<()> {
        if self.state.lock().unwrap().failing.contains(&sensor.id) {
            return Err(ProviderError::Status { status: 503 });
        }
        Ok(())
    }
}

#[async_trait]
impl SensorApi for MockSensor {
    async fn fetch_history(
        &self,
        sensor: &Sensor,
        kind: MetricKind,
        last: Option<f64>,
    ) -> ProviderResult<Vec<Value>> {
        self.check(sensor)?;
        let mut state = self.state.lock().unwrap();
        state.history_queries.push((sensor.id.clone(), kind, last));
        Ok(state.history.get(&kind).cloned().unwrap_or_default())
    }

    async fn fetch_utilization(&self, sensor: &Sensor) -> ProviderResult<Value> {
        self.check(sensor)?;
        self.state
            .lock()
            .unwrap()
            .utilization
            .clone()
            .ok_or_else(|| ProviderError::Status { status: 404 })
    }

    async fn fetch_snapshot(&self, sensor: &Sensor, table: TopologyTable) -> ProviderResult<Vec<Value>> {
        self.check(sensor)?;
        Ok(self.state.lock().unwrap().snapshots.get(&table).cloned().unwrap_or_default())
    }

    async fn fetch_keys(&self, sensor: &Sensor, kind: KeyKind) -> ProviderResult<Vec<Value>> {
        self.check(sensor)?;
        Ok(self.keys(kind))
    }

    async fn push_keys(&self, sensor: &Sensor, kind: KeyKind, keys: &[String]) -> ProviderResult<()> {
        self.check(sensor)?;
        let mut state = self.state.lock().unwrap();
        state.pushes.push((sensor.id.clone(), kind, keys.to_vec()));
        let held = state.keys.entry(kind).or_default();
        held.extend(keys.iter().cloned().map(Value::String));
        Ok(())
    }

    async fn list_pcap_files(&self, sensor: &Sensor) -> ProviderResult<Vec<String>> {
        self.check(sensor)?;
        Ok(self.state.lock().unwrap().pcaps.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn download_pcap(&self, sensor: &Sensor, name: &str) -> ProviderResult<Vec<u8>> {
        self.check(sensor)?;
        self.state
            .lock()
            .unwrap()
            .pcaps
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ProviderError::Status { status: 404 })
    }
}
