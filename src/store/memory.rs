use crate::error::{PayoutError, Result};
use crate::models::{NewPayment, Payment, PaymentState};
use crate::store::PayoutStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// In-memory store used by the test suite and the mock deployment mode.
///
/// Mirrors the Postgres store's transition semantics exactly, including the
/// atomicity of `clear_signed_from` (a single write-lock scope).
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, Payment>,
    // One-shot failure injection for mid-batch signing tests.
    fail_mark_signed_on: Option<i64>,
    writes: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                rows: BTreeMap::new(),
                fail_mark_signed_on: None,
                writes: 0,
            }),
        }
    }

    /// Makes the next `mark_signed` call for the given id fail, once.
    pub async fn fail_mark_signed_on(&self, id: i64) {
        self.inner.write().await.fail_mark_signed_on = Some(id);
    }

    /// Number of committed mutations, for no-side-effect assertions.
    pub async fn write_count(&self) -> u64 {
        self.inner.read().await.writes
    }

    pub async fn dump(&self) -> Vec<Payment> {
        self.inner.read().await.rows.values().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn row_mut(&mut self, id: i64) -> Result<&mut Payment> {
        self.rows
            .get_mut(&id)
            .ok_or(PayoutError::PaymentNotFound(id))
    }
}

#[async_trait]
impl PayoutStore for MemoryStore {
    async fn insert_pending(&self, payment: NewPayment) -> Result<i64> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.rows.insert(
            id,
            Payment {
                id,
                reference: payment.reference,
                destination: payment.destination,
                amount: payment.amount,
                memo: payment.memo,
                state: PaymentState::Pending,
                sequence: None,
                signed_artifact: None,
                error_kind: None,
                fatal: false,
                created_at: Utc::now(),
                submitted_at: None,
                confirmed_at: None,
            },
        );
        inner.writes += 1;
        Ok(id)
    }

    async fn get_payment(&self, id: i64) -> Result<Option<Payment>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn list_unsigned(&self, limit: i64) -> Result<Vec<Payment>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .filter(|p| p.state == PaymentState::Pending)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_signed_unsubmitted(&self) -> Result<Vec<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .filter(|p| p.state == PaymentState::Signed)
            .cloned()
            .collect())
    }

    async fn list_submitted_unconfirmed(&self) -> Result<Vec<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .filter(|p| p.state == PaymentState::Submitted)
            .cloned()
            .collect())
    }

    async fn mark_signed(&self, id: i64, sequence: i64, artifact: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.fail_mark_signed_on == Some(id) {
            inner.fail_mark_signed_on = None;
            return Err(PayoutError::Internal(format!(
                "injected mark_signed failure on payment {}",
                id
            )));
        }
        let row = inner.row_mut(id)?;
        if row.state != PaymentState::Pending {
            return Err(PayoutError::InvalidTransition {
                payment_id: id,
                detail: format!("mark_signed from {}", row.state),
            });
        }
        row.state = PaymentState::Signed;
        row.sequence = Some(sequence);
        row.signed_artifact = Some(artifact);
        inner.writes += 1;
        Ok(())
    }

    async fn mark_submitted(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let row = inner.row_mut(id)?;
        if row.state != PaymentState::Signed {
            return Err(PayoutError::InvalidTransition {
                payment_id: id,
                detail: format!("mark_submitted from {}", row.state),
            });
        }
        row.state = PaymentState::Submitted;
        row.submitted_at = Some(Utc::now());
        inner.writes += 1;
        Ok(())
    }

    async fn mark_confirmed(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let row = inner.row_mut(id)?;
        if row.state != PaymentState::Submitted {
            return Err(PayoutError::InvalidTransition {
                payment_id: id,
                detail: format!("mark_confirmed from {}", row.state),
            });
        }
        row.state = PaymentState::Confirmed;
        row.confirmed_at = Some(Utc::now());
        inner.writes += 1;
        Ok(())
    }

    async fn mark_error(&self, id: i64, kind: &str, fatal: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let row = inner.row_mut(id)?;
        let terminal = matches!(
            row.state,
            PaymentState::Confirmed | PaymentState::Aborted
        ) || (row.state == PaymentState::Error && row.fatal);
        if terminal {
            return Err(PayoutError::InvalidTransition {
                payment_id: id,
                detail: format!("mark_error from terminal {}", row.state),
            });
        }
        row.state = PaymentState::Error;
        row.error_kind = Some(kind.to_string());
        row.fatal = fatal;
        inner.writes += 1;
        Ok(())
    }

    async fn mark_aborted(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let row = inner.row_mut(id)?;
        if matches!(row.state, PaymentState::Confirmed | PaymentState::Aborted) {
            return Err(PayoutError::InvalidTransition {
                payment_id: id,
                detail: format!("mark_aborted from {}", row.state),
            });
        }
        row.state = PaymentState::Aborted;
        inner.writes += 1;
        Ok(())
    }

    async fn is_aborted(&self, id: i64) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .get(&id)
            .map(|p| p.state == PaymentState::Aborted)
            .unwrap_or(false))
    }

    async fn highest_sequence(&self) -> Result<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.values().filter_map(|p| p.sequence).max())
    }

    async fn clear_signed_from(&self, id: i64) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut cleared = 0;
        for row in inner.rows.range_mut(id..).map(|(_, row)| row) {
            if matches!(row.state, PaymentState::Signed | PaymentState::Submitted) {
                row.state = PaymentState::Pending;
                row.sequence = None;
                row.signed_artifact = None;
                row.submitted_at = None;
                cleared += 1;
            }
        }
        if cleared > 0 {
            inner.writes += 1;
        }
        Ok(cleared)
    }
}
