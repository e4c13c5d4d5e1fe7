//! Bidirectional reconciliation of append-only key sets.
//!
//! Every tick, for each sensor and key kind: keys the sensor reports that
//! the aggregator lacks are stored centrally ("pull"), then keys the
//! aggregator holds that the sensor did not report are posted back
//! ("push"). Keys are never removed on either side, so all parties converge
//! on the union of every key ever observed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::repository::AggregatorRepository;
use crate::services::SensorApi;
use crate::types::{KeyKind, KeyMaterial, Sensor};

/// In-memory mirror of the stored key sets, shared by every reconcile task.
#[derive(Clone, Default)]
pub struct KeyRing {
    sets: Arc<RwLock<HashMap<KeyKind, BTreeSet<KeyMaterial>>>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring holding every stored key.
    pub async fn load(repository: &AggregatorRepository) -> Result<Self, sqlx::Error> {
        let ring = Self::new();
        for kind in KeyKind::ALL {
            ring.reload(repository, kind).await?;
        }
        Ok(ring)
    }

    /// Replace the cached set of `kind` with the store's contents.
    pub async fn reload(&self, repository: &AggregatorRepository, kind: KeyKind) -> Result<usize, sqlx::Error> {
        let keys: BTreeSet<KeyMaterial> = repository.list_keys(kind).await?.into_iter().collect();
        let count = keys.len();
        self.sets.write().await.insert(kind, keys);
        Ok(count)
    }

    pub async fn snapshot(&self, kind: KeyKind) -> BTreeSet<KeyMaterial> {
        self.sets.read().await.get(&kind).cloned().unwrap_or_default()
    }

    pub async fn contains(&self, kind: KeyKind, key: &KeyMaterial) -> bool {
        self.sets
            .read()
            .await
            .get(&kind)
            .map(|set| set.contains(key))
            .unwrap_or(false)
    }
}

/// Parse a sensor's key list. Entries that are not 32-digit hex strings are
/// dropped; the second element counts them.
fn parse_remote_keys(raw: Vec<Value>) -> (HashSet<KeyMaterial>, usize) {
    let mut keys = HashSet::with_capacity(raw.len());
    let mut invalid = 0;
    for value in raw {
        match value.as_str().map(str::parse::<KeyMaterial>) {
            Some(Ok(key)) => {
                keys.insert(key);
            }
            _ => invalid += 1,
        }
    }
    (keys, invalid)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Valid keys the sensor reported.
    pub remote: usize,
    pub invalid: usize,
    pub pulled: usize,
    pub pushed: usize,
}

#[derive(Clone)]
pub struct SetReconciler {
    api: Arc<dyn SensorApi>,
    repository: Arc<AggregatorRepository>,
    keyring: KeyRing,
    metrics: Arc<AppMetrics>,
}

impl SetReconciler {
    pub fn new(
        api: Arc<dyn SensorApi>,
        repository: Arc<AggregatorRepository>,
        keyring: KeyRing,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            api,
            repository,
            keyring,
            metrics,
        }
    }

    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    /// One pull-then-push round against `sensor` for `kind`.
    pub async fn reconcile(&self, sensor: &Sensor, kind: KeyKind) -> Result<ReconcileReport, AppError> {
        let raw = self.api.fetch_keys(sensor, kind).await?;
        let (remote, invalid) = parse_remote_keys(raw);
        if invalid > 0 {
            tracing::debug!(sensor = %sensor.id, %kind, "Dropped {} invalid keys", invalid);
        }

        let mut report = ReconcileReport {
            remote: remote.len(),
            invalid,
            ..ReconcileReport::default()
        };

        // Pull
        let mut missing_locally = Vec::new();
        for key in &remote {
            if !self.keyring.contains(kind, key).await {
                missing_locally.push(*key);
            }
        }
        if !missing_locally.is_empty() {
            for key in &missing_locally {
                match self.repository.insert_key(kind, key).await {
                    Ok(true) => report.pulled += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(sensor = %sensor.id, %kind, "Failed to store key: {}", err)
                    }
                }
            }
            self.keyring.reload(&self.repository, kind).await?;
            self.metrics
                .keys_pulled_total
                .with_label_values(&[kind.path()])
                .inc_by(report.pulled as f64);
        }

        // Push
        let missing_remotely: Vec<String> = self
            .keyring
            .snapshot(kind)
            .await
            .iter()
            .filter(|key| !remote.contains(*key))
            .map(KeyMaterial::to_hex)
            .collect();
        if !missing_remotely.is_empty() {
            self.api.push_keys(sensor, kind, &missing_remotely).await?;
            report.pushed = missing_remotely.len();
            self.metrics
                .keys_pushed_total
                .with_label_values(&[kind.path()])
                .inc_by(report.pushed as f64);
        }

        if report.pulled > 0 || report.pushed > 0 {
            tracing::info!(
                sensor = %sensor.id,
                %kind,
                "Reconciled keys: {} pulled, {} pushed",
                report.pulled,
                report.pushed
            );
        }

        Ok(report)
    }
}
