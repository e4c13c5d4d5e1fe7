//! reqwest-backed [`SensorApi`] implementation.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};
use crate::services::provider::SensorApi;
use crate::types::{KeyKind, MetricKind, Sensor, TopologyTable};

/// HTTP client for the sensor node API. Cheap to clone; the underlying
/// connection pool is shared.
#[derive(Clone, Default)]
pub struct SensorClient {
    http: Client,
}

impl SensorClient {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    async fn get(&self, url: &str, query: Option<(&str, f64)>) -> ProviderResult<Response> {
        let mut request = self.http.get(url);
        if let Some(pair) = query {
            request = request.query(&[pair]);
        }

        let response = request.send().await.map_err(|e| ProviderError::NetworkError {
            message: format!("GET {} failed: {}", url, e),
        })?;

        check_status(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: Option<(&str, f64)>) -> ProviderResult<T> {
        self.get(url, query)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ProviderError::FormatError {
                message: format!("Failed to parse response from {}: {}", url, e),
            })
    }
}

fn check_status(response: Response) -> ProviderResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ProviderError::Status {
            status: response.status().as_u16(),
        })
    }
}

#[async_trait]
impl SensorApi for SensorClient {
    async fn fetch_history(
        &self,
        sensor: &Sensor,
        kind: MetricKind,
        last: Option<f64>,
    ) -> ProviderResult<Vec<Value>> {
        let url = sensor.endpoint(kind.path());
        self.get_json(&url, last.map(|ts| ("last", ts))).await
    }

    async fn fetch_utilization(&self, sensor: &Sensor) -> ProviderResult<Value> {
        self.get_json(&sensor.endpoint("utilization"), None).await
    }

    async fn fetch_snapshot(
        &self,
        sensor: &Sensor,
        table: TopologyTable,
    ) -> ProviderResult<Vec<Value>> {
        self.get_json(&sensor.endpoint(table.path()), None).await
    }

    async fn fetch_keys(&self, sensor: &Sensor, kind: KeyKind) -> ProviderResult<Vec<Value>> {
        self.get_json(&sensor.endpoint(kind.path()), None).await
    }

    async fn push_keys(&self, sensor: &Sensor, kind: KeyKind, keys: &[String]) -> ProviderResult<()> {
        let url = sensor.endpoint(kind.path());
        let response = self
            .http
            .post(&url)
            .json(keys)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError {
                message: format!("POST {} failed: {}", url, e),
            })?;

        check_status(response).map(|_| ())
    }

    async fn list_pcap_files(&self, sensor: &Sensor) -> ProviderResult<Vec<String>> {
        self.get_json(&sensor.endpoint("pcap-files"), None).await
    }

    async fn download_pcap(&self, sensor: &Sensor, name: &str) -> ProviderResult<Vec<u8>> {
        let url = sensor.endpoint(&format!("download/{}", name));
        let bytes = self
            .get(&url, None)
            .await?
            .bytes()
            .await
            .map_err(|e| ProviderError::NetworkError {
                message: format!("Failed to read body from {}: {}", url, e),
            })?;
        Ok(bytes.to_vec())
    }
}
