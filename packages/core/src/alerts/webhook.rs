//! Webhook digest delivery.
//!
//! POSTs the digest as JSON to a single configured URL. Any non-2xx status
//! counts as a failed delivery, so the included alerts stay unnotified.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::alerts::digest::Digest;
use crate::alerts::notifier::Notifier;
use crate::error::NotifyError;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    alert_ids: &'a [String],
}

pub struct WebhookNotifier {
    url: String,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, digest: &Digest) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            subject: &digest.subject,
            body: &digest.body,
            alert_ids: &digest.alert_ids,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("POST {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "Webhook {} returned HTTP {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
