use crate::error::{PayoutError, Result};
use crate::ledger::{AccountInfo, ConfirmOutcome, LedgerClient, SubmitOutcome};
use crate::models::Payment;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Deterministic scripted ledger for tests and the mock deployment mode.
///
/// Outcomes are popped from per-operation queues; an empty queue yields
/// Accepted / Confirmed. The account's next sequence advances on every
/// accepted submission, the way a real ledger consumes sequence numbers.
pub struct MockLedgerClient {
    inner: RwLock<MockInner>,
    latency: Duration,
}

struct MockInner {
    next_sequence: i64,
    submit_script: VecDeque<std::result::Result<SubmitOutcome, String>>,
    confirm_script: VecDeque<ConfirmOutcome>,
    submissions: Vec<Vec<u8>>,
    account_info_calls: u64,
}

impl MockLedgerClient {
    pub fn new(next_sequence: i64) -> Self {
        Self {
            inner: RwLock::new(MockInner {
                next_sequence,
                submit_script: VecDeque::new(),
                confirm_script: VecDeque::new(),
                submissions: Vec::new(),
                account_info_calls: 0,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Adds simulated network latency to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn set_next_sequence(&self, next_sequence: i64) {
        self.inner.write().await.next_sequence = next_sequence;
    }

    pub async fn push_submit_outcome(&self, outcome: SubmitOutcome) {
        self.inner.write().await.submit_script.push_back(Ok(outcome));
    }

    /// Scripts an unclassified client failure on the next submission.
    pub async fn push_submit_failure(&self, reason: &str) {
        self.inner
            .write()
            .await
            .submit_script
            .push_back(Err(reason.to_string()));
    }

    pub async fn push_confirm_outcome(&self, outcome: ConfirmOutcome) {
        self.inner.write().await.confirm_script.push_back(outcome);
    }

    /// Artifacts accepted so far, in submission order.
    pub async fn submissions(&self) -> Vec<Vec<u8>> {
        self.inner.read().await.submissions.clone()
    }

    pub async fn account_info_calls(&self) -> u64 {
        self.inner.read().await.account_info_calls
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            let jitter = 1.0 + (rand::random::<f64>() - 0.5) * 0.2;
            tokio::time::sleep(self.latency.mul_f64(jitter)).await;
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn account_info(&self, address: &str) -> Result<AccountInfo> {
        self.simulate_latency().await;
        let mut inner = self.inner.write().await;
        inner.account_info_calls += 1;
        info!(address, next_sequence = inner.next_sequence, "mock account info");
        Ok(AccountInfo {
            next_sequence: inner.next_sequence,
        })
    }

    async fn submit(&self, artifact: &[u8]) -> Result<SubmitOutcome> {
        self.simulate_latency().await;
        let mut inner = self.inner.write().await;
        let outcome = match inner.submit_script.pop_front() {
            Some(Ok(outcome)) => outcome,
            Some(Err(reason)) => return Err(PayoutError::Internal(reason)),
            None => SubmitOutcome::Accepted,
        };
        if outcome == SubmitOutcome::Accepted {
            inner.submissions.push(artifact.to_vec());
            inner.next_sequence += 1;
        }
        Ok(outcome)
    }

    async fn confirm(&self, _payment: &Payment) -> Result<ConfirmOutcome> {
        self.simulate_latency().await;
        let mut inner = self.inner.write().await;
        Ok(inner
            .confirm_script
            .pop_front()
            .unwrap_or(ConfirmOutcome::Confirmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepted_advances_sequence() {
        let ledger = MockLedgerClient::new(42);
        assert_eq!(ledger.account_info("rFunding").await.unwrap().next_sequence, 42);

        assert_eq!(ledger.submit(b"tx").await.unwrap(), SubmitOutcome::Accepted);
        assert_eq!(ledger.account_info("rFunding").await.unwrap().next_sequence, 43);
        assert_eq!(ledger.submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_pop_in_order() {
        let ledger = MockLedgerClient::new(1);
        ledger
            .push_submit_outcome(SubmitOutcome::Resign("sequence-stale".to_string()))
            .await;

        assert!(matches!(
            ledger.submit(b"tx1").await.unwrap(),
            SubmitOutcome::Resign(_)
        ));
        // Queue drained: back to the default.
        assert_eq!(ledger.submit(b"tx2").await.unwrap(), SubmitOutcome::Accepted);
        // A resigned submission consumes no sequence.
        assert_eq!(ledger.account_info("rFunding").await.unwrap().next_sequence, 2);
    }
}
