//! Notifier port.
//!
//! Fire-and-forget from the engine's perspective: a notification failure is
//! logged and never aborts a workflow transition. Every call carries an
//! idempotency key so the transport can deduplicate retries after a crash.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::model::Contact;
use crate::notify::Rendered;

/// Deduplication key for one user-visible message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NotificationKey {
    pub group_id: Uuid,
    pub interest_id: Uuid,
    pub template_id: &'static str,
    /// Distinguishes repeated sends of the same template for different
    /// occasions (e.g. re-initiation after a merge).
    pub occasion: String,
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Delivers a rendered message; returns a receipt id for logging.
    async fn notify(
        &self,
        recipient: &Contact,
        rendered: &Rendered,
        key: &NotificationKey,
    ) -> Result<String>;
}

/// Logs messages instead of delivering them. The startup default until a
/// real transport is wired in.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &Contact,
        rendered: &Rendered,
        key: &NotificationKey,
    ) -> Result<String> {
        let receipt = Uuid::new_v4().to_string();
        tracing::info!(
            template = rendered.template_id,
            recipient = %recipient.email,
            group_id = %key.group_id,
            receipt = %receipt,
            "notification dispatched"
        );
        Ok(receipt)
    }
}

/// Records every send; used by tests to assert on notification traffic.
/// Deduplicates by key the way a real transport is expected to.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKey, String, String)>>,
    fail_all: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_all(&self, fail: bool) {
        *self.fail_all.lock() = fail;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent_to(&self, email: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, recipient, _)| recipient == email)
            .map(|(k, _, _)| k.template_id.to_string())
            .collect()
    }

    pub fn count_template(&self, template_id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(k, _, _)| k.template_id == template_id)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient: &Contact,
        rendered: &Rendered,
        key: &NotificationKey,
    ) -> Result<String> {
        if *self.fail_all.lock() {
            anyhow::bail!("notifier transport down");
        }

        let mut sent = self.sent.lock();
        if sent.iter().any(|(k, _, _)| k == key) {
            // Duplicate delivery attempt; the key already went out.
            return Ok("duplicate".to_string());
        }

        sent.push((
            key.clone(),
            recipient.email.clone(),
            rendered.subject.clone(),
        ));
        Ok(Uuid::new_v4().to_string())
    }
}
