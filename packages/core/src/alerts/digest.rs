//! Consolidated alert digest.
//!
//! Every send gathers *all* unnotified alerts, not only the ones created by
//! the triggering pass, so alerts from a failed send are retried by the next
//! trigger. Alerts are flagged notified only after every configured
//! transport accepted the digest.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::alerts::notifier::Notifier;
use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::repository::AggregatorRepository;
use crate::types::Alert;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    pub alert_ids: Vec<String>,
}

impl Digest {
    /// One line per alert, in the order given.
    pub fn compose(alerts: &[Alert], now_epoch: i64) -> Self {
        let body = alerts
            .iter()
            .map(|alert| format!("[{}] {}\n", alert.alert_id, alert.message))
            .collect();

        Self {
            subject: format!("[WIDS] Alert digest {}", now_epoch),
            body,
            alert_ids: alerts.iter().map(|a| a.alert_id.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestOutcome {
    /// No transport configured; alerts stay unnotified.
    Disabled,
    NothingPending,
    Delivered(usize),
}

#[derive(Clone)]
pub struct DigestSender {
    repository: Arc<AggregatorRepository>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
    metrics: Arc<AppMetrics>,
    // Serialises sends so overlapping triggers never mail the same batch twice.
    send_lock: Arc<Mutex<()>>,
}

impl DigestSender {
    pub fn new(
        repository: Arc<AggregatorRepository>,
        notifiers: Vec<Arc<dyn Notifier>>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            repository,
            notifiers: Arc::new(notifiers),
            metrics,
            send_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.notifiers.is_empty()
    }

    /// Send one digest of every pending alert.
    pub async fn deliver_pending(&self) -> Result<DigestOutcome, AppError> {
        if !self.is_configured() {
            return Ok(DigestOutcome::Disabled);
        }

        let _guard = self.send_lock.lock().await;

        let pending = self.repository.list_unnotified_alerts().await?;
        if pending.is_empty() {
            return Ok(DigestOutcome::NothingPending);
        }

        let digest = Digest::compose(&pending, Utc::now().timestamp());
        for notifier in self.notifiers.iter() {
            if let Err(err) = notifier.send(&digest).await {
                self.metrics.digest_failures_total.inc();
                tracing::warn!(
                    transport = notifier.name(),
                    "Digest of {} alerts not delivered: {}",
                    pending.len(),
                    err
                );
                return Err(err.into());
            }
        }

        for alert_id in &digest.alert_ids {
            self.repository.mark_alert_notified(alert_id).await?;
        }
        self.metrics.digests_sent_total.inc();
        tracing::info!("Alert digest delivered ({} alerts)", digest.alert_ids.len());

        Ok(DigestOutcome::Delivered(digest.alert_ids.len()))
    }
}
