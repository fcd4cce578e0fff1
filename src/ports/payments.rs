//! Payments port.
//!
//! The workflow engine is generic over a concrete provider selected at
//! startup; there is no runtime provider registry. Idempotency is part of
//! the contract: repeated `process` or `refund` calls for the same intent or
//! transaction return the recorded outcome without charging again.

use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: f64,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PaymentResult {
    Succeeded { tx_id: String },
    Failed { reason: String },
}

#[async_trait]
pub trait Payments: Send + Sync + 'static {
    /// Creates (or returns, for a repeated idempotency key) a payment
    /// intent for the given amount.
    async fn create_intent(
        &self,
        amount: f64,
        currency: &str,
        idempotency_key: &str,
        metadata: &serde_json::Value,
    ) -> Result<PaymentIntent>;

    /// Captures a previously created intent.
    async fn process(&self, intent_id: &str) -> Result<PaymentResult>;

    /// Refunds a captured transaction.
    async fn refund(&self, tx_id: &str, amount: f64, reason: &str) -> Result<PaymentResult>;

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool;
}

#[derive(Default)]
struct MockLedger {
    /// idempotency key -> intent id
    intents_by_key: HashMap<String, String>,
    intents: HashMap<String, PaymentIntent>,
    /// intent id -> capture outcome
    captures: HashMap<String, PaymentResult>,
    /// tx id -> refund outcome
    refunds: HashMap<String, PaymentResult>,
}

/// Deterministic in-memory provider for development and tests. Failures are
/// injected explicitly rather than rolled randomly.
#[derive(Default)]
pub struct MockPayments {
    ledger: Mutex<MockLedger>,
    fail_capture: Mutex<bool>,
    /// Countdown of refund calls that will fail before refunds succeed again.
    fail_refunds_remaining: Mutex<u32>,
}

impl MockPayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent captures fail until reset.
    pub fn set_fail_capture(&self, fail: bool) {
        *self.fail_capture.lock() = fail;
    }

    /// Makes the next `n` refund calls fail.
    pub fn fail_next_refunds(&self, n: u32) {
        *self.fail_refunds_remaining.lock() = n;
    }

    pub fn intent_count(&self) -> usize {
        self.ledger.lock().intents.len()
    }

    pub fn refund_count(&self) -> usize {
        self.ledger
            .lock()
            .refunds
            .values()
            .filter(|r| matches!(r, PaymentResult::Succeeded { .. }))
            .count()
    }
}

#[async_trait]
impl Payments for MockPayments {
    async fn create_intent(
        &self,
        amount: f64,
        currency: &str,
        idempotency_key: &str,
        _metadata: &serde_json::Value,
    ) -> Result<PaymentIntent> {
        let mut ledger = self.ledger.lock();

        if let Some(id) = ledger.intents_by_key.get(idempotency_key) {
            return Ok(ledger.intents[id].clone());
        }

        let id = format!("pi_mock_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: format!("{id}_secret_{}", Uuid::new_v4().simple()),
            amount,
            currency: currency.to_string(),
        };

        ledger
            .intents_by_key
            .insert(idempotency_key.to_string(), id.clone());
        ledger.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn process(&self, intent_id: &str) -> Result<PaymentResult> {
        let mut ledger = self.ledger.lock();

        if !ledger.intents.contains_key(intent_id) {
            bail!("unknown payment intent: {intent_id}");
        }

        // Idempotent capture: a repeated process returns the prior outcome.
        if let Some(prior) = ledger.captures.get(intent_id) {
            return Ok(prior.clone());
        }

        let outcome = if *self.fail_capture.lock() {
            PaymentResult::Failed {
                reason: "card_declined".to_string(),
            }
        } else {
            PaymentResult::Succeeded {
                tx_id: format!("txn_mock_{}", Uuid::new_v4().simple()),
            }
        };

        ledger.captures.insert(intent_id.to_string(), outcome.clone());
        Ok(outcome)
    }

    async fn refund(&self, tx_id: &str, _amount: f64, _reason: &str) -> Result<PaymentResult> {
        let mut ledger = self.ledger.lock();

        // Idempotent refund: only a recorded success short-circuits; a prior
        // failure may be retried.
        if let Some(PaymentResult::Succeeded { tx_id: refund_id }) = ledger.refunds.get(tx_id) {
            return Ok(PaymentResult::Succeeded {
                tx_id: refund_id.clone(),
            });
        }

        {
            let mut remaining = self.fail_refunds_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                let outcome = PaymentResult::Failed {
                    reason: "provider_unavailable".to_string(),
                };
                ledger.refunds.insert(tx_id.to_string(), outcome.clone());
                return Ok(outcome);
            }
        }

        let outcome = PaymentResult::Succeeded {
            tx_id: format!("re_mock_{}", Uuid::new_v4().simple()),
        };
        ledger.refunds.insert(tx_id.to_string(), outcome.clone());
        Ok(outcome)
    }

    fn verify_webhook(&self, _payload: &[u8], signature: &str) -> bool {
        !signature.is_empty()
    }
}
