//! Raw event inspection.
//!
//! Each pass claims every uninspected event (the store's conditional update
//! decides which pass wins a row), turns the claimed events into alert
//! candidates and collapses repeats of the same message within the pass.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::repository::AggregatorRepository;
use crate::types::{format_alert_id, AlertCandidate, RawEvent};

pub fn alert_message(event: &RawEvent) -> String {
    format!("sensor {} detected: {}", event.sensor_id, event.description)
}

/// Build candidates from events ordered by timestamp.
///
/// The first event of each message is kept. A later event with the same
/// message is kept only when it falls outside `cooldown_seconds` of the last
/// kept one. Ids are `HG<epoch>E<n>` with `n` counting kept candidates.
pub fn build_candidates(events: &[RawEvent], cooldown_seconds: f64, epoch: i64) -> Vec<AlertCandidate> {
    let mut last_kept: HashMap<String, f64> = HashMap::new();
    let mut candidates = Vec::new();

    for event in events {
        let message = alert_message(event);
        if let Some(last) = last_kept.get(&message) {
            if event.timestamp <= last + cooldown_seconds {
                continue;
            }
        }
        last_kept.insert(message.clone(), event.timestamp);
        candidates.push(AlertCandidate {
            alert_id: format_alert_id(epoch, candidates.len() as i64),
            message,
            timestamp: event.timestamp,
        });
    }

    candidates
}

#[derive(Clone)]
pub struct EventInspector {
    repository: Arc<AggregatorRepository>,
    metrics: Arc<AppMetrics>,
    cooldown_seconds: f64,
    // Epoch used for the previous pass's ids.
    last_epoch: Arc<Mutex<i64>>,
}

impl EventInspector {
    pub fn new(repository: Arc<AggregatorRepository>, metrics: Arc<AppMetrics>, cooldown_seconds: f64) -> Self {
        Self {
            repository,
            metrics,
            cooldown_seconds,
            last_epoch: Arc::new(Mutex::new(0)),
        }
    }

    /// An id epoch above both this inspector's last one and every epoch
    /// already stored, so a restart or a second inspector within the same
    /// second does not reuse ids.
    async fn next_epoch(&self) -> Result<i64, sqlx::Error> {
        let mut last = self.last_epoch.lock().await;
        let stored = self.repository.max_alert_epoch().await?.unwrap_or(0);
        let epoch = Utc::now().timestamp().max(*last + 1).max(stored + 1);
        *last = epoch;
        Ok(epoch)
    }

    /// Claim all uninspected events and return the alert candidates they
    /// produce. Events another pass claimed first are ignored.
    pub async fn inspect(&self) -> Result<Vec<AlertCandidate>, AppError> {
        let events = self.repository.list_uninspected_events().await?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut claimed = Vec::with_capacity(events.len());
        for event in events {
            match self.repository.mark_event_inspected(event.row_id).await {
                Ok(true) => claimed.push(event),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(row_id = event.row_id, "Failed to claim event: {}", err)
                }
            }
        }
        self.metrics.events_inspected_total.inc_by(claimed.len() as f64);

        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        let epoch = self.next_epoch().await?;
        let candidates = build_candidates(&claimed, self.cooldown_seconds, epoch);
        tracing::debug!(
            "Inspected {} events, {} alert candidates",
            claimed.len(),
            candidates.len()
        );
        Ok(candidates)
    }
}
