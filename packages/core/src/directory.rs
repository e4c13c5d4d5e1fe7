//! In-memory view of the sensor registry.
//!
//! Pollers read a cloned snapshot at the start of every tick; only the
//! registry endpoints (and startup) call [`SensorDirectory::refresh`].

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::repository::AggregatorRepository;
use crate::types::Sensor;

#[derive(Clone, Default)]
pub struct SensorDirectory {
    sensors: Arc<RwLock<Vec<Sensor>>>,
}

impl SensorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached list with the store's current registry.
    pub async fn refresh(&self, repository: &AggregatorRepository) -> Result<usize, sqlx::Error> {
        let sensors = repository.list_sensors().await?;
        let count = sensors.len();
        *self.sensors.write().await = sensors;
        tracing::debug!("Sensor directory refreshed ({} sensors)", count);
        Ok(count)
    }

    /// Sensors known at this instant, ordered by id.
    pub async fn snapshot(&self) -> Vec<Sensor> {
        self.sensors.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Sensor> {
        self.sensors.read().await.iter().find(|s| s.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sensors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sensors.read().await.is_empty()
    }
}
