//! Cooldown-gated alert creation.
//!
//! A candidate becomes an alert unless an alert with the exact same message
//! already exists whose timestamp is within `cooldown` seconds before it.
//! Candidates are checked one at a time against the store, so alerts created
//! earlier in the same pass count as prior alerts for later candidates.

use std::sync::Arc;

use crate::alerts::digest::DigestSender;
use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::repository::{is_unique_violation, AggregatorRepository};
use crate::types::{format_alert_id, parse_alert_id, AlertCandidate};

/// Attempts at finding a free id when a candidate's id is already taken.
const ID_RETRIES: usize = 8;

/// `true` when a candidate at `candidate_ts` should become a new alert given
/// the newest existing alert with the same message.
pub fn should_create(prior_ts: Option<f64>, candidate_ts: f64, cooldown_seconds: f64) -> bool {
    match prior_ts {
        None => true,
        Some(prior) => candidate_ts > prior + cooldown_seconds,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupReport {
    pub created: usize,
    pub suppressed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct AlertDeduplicator {
    repository: Arc<AggregatorRepository>,
    digest: DigestSender,
    metrics: Arc<AppMetrics>,
    cooldown_seconds: f64,
}

impl AlertDeduplicator {
    pub fn new(
        repository: Arc<AggregatorRepository>,
        digest: DigestSender,
        metrics: Arc<AppMetrics>,
        cooldown_seconds: f64,
    ) -> Self {
        Self {
            repository,
            digest,
            metrics,
            cooldown_seconds,
        }
    }

    /// Create alerts for the candidates outside their cooldown window and,
    /// if any were created, send a digest of everything still unnotified.
    pub async fn process(&self, candidates: &[AlertCandidate]) -> Result<DedupReport, AppError> {
        let mut report = DedupReport::default();

        for candidate in candidates {
            let prior = self.repository.max_alert_timestamp(&candidate.message).await?;
            if !should_create(prior, candidate.timestamp, self.cooldown_seconds) {
                report.suppressed += 1;
                continue;
            }

            match self.insert_with_free_id(candidate).await {
                Ok(alert_id) => {
                    report.created += 1;
                    tracing::info!(alert_id = %alert_id, "Alert raised: {}", candidate.message);
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(alert_id = %candidate.alert_id, "Failed to store alert: {}", err);
                }
            }
        }

        self.metrics.alerts_created_total.inc_by(report.created as f64);

        if report.created > 0 {
            if let Err(err) = self.digest.deliver_pending().await {
                tracing::warn!("Alert digest deferred: {}", err);
            }
        }

        Ok(report)
    }
}

impl AlertDeduplicator {
    /// Insert `candidate`, moving it to the next free index of its epoch if
    /// another inspector already used its id. Returns the stored id.
    async fn insert_with_free_id(&self, candidate: &AlertCandidate) -> Result<String, sqlx::Error> {
        let mut attempt = candidate.clone();
        let mut retries = 0;
        loop {
            match self.repository.insert_alert(&attempt).await {
                Ok(()) => return Ok(attempt.alert_id),
                Err(err) if is_unique_violation(&err) && retries < ID_RETRIES => {
                    let Some((epoch, _)) = parse_alert_id(&attempt.alert_id) else {
                        return Err(err);
                    };
                    let next = self.repository.max_alert_index(epoch).await?.map_or(0, |n| n + 1);
                    tracing::debug!(
                        taken = %attempt.alert_id,
                        "Alert id already in use, retrying as index {}",
                        next
                    );
                    attempt.alert_id = format_alert_id(epoch, next);
                    retries += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
