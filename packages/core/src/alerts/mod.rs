//! Operator alerts: cooldown-gated creation and digest delivery.

pub mod dedup;
pub mod digest;
pub mod notifier;
pub mod webhook;

pub use dedup::AlertDeduplicator;
pub use digest::{Digest, DigestOutcome, DigestSender};
pub use notifier::{Notifier, SmtpNotifier};
pub use webhook::WebhookNotifier;
