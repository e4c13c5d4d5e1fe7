//! Sensor API interface.
//!
//! Abstracts the HTTP contract every sensor node exposes so the pollers can
//! be exercised against an in-process mock.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderResult;
use crate::types::{KeyKind, MetricKind, Sensor, TopologyTable};

#[async_trait]
pub trait SensorApi: Send + Sync {
    /// Entries of a cursor-bearing metric newer than `last`, or the full
    /// history when `last` is `None`. Entry order is not guaranteed.
    async fn fetch_history(
        &self,
        sensor: &Sensor,
        kind: MetricKind,
        last: Option<f64>,
    ) -> ProviderResult<Vec<Value>>;

    /// Current resource usage sample.
    async fn fetch_utilization(&self, sensor: &Sensor) -> ProviderResult<Value>;

    /// Full current snapshot of one topology table.
    async fn fetch_snapshot(&self, sensor: &Sensor, table: TopologyTable)
        -> ProviderResult<Vec<Value>>;

    /// Raw key list as reported by the sensor. Entries are not validated.
    async fn fetch_keys(&self, sensor: &Sensor, kind: KeyKind) -> ProviderResult<Vec<Value>>;

    /// Push hex-encoded keys the sensor is missing.
    async fn push_keys(&self, sensor: &Sensor, kind: KeyKind, keys: &[String]) -> ProviderResult<()>;

    async fn list_pcap_files(&self, sensor: &Sensor) -> ProviderResult<Vec<String>>;

    async fn download_pcap(&self, sensor: &Sensor, name: &str) -> ProviderResult<Vec<u8>>;
}
