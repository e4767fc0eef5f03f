use crate::error::{PayoutError, Result};
use crate::ledger::{ConfirmOutcome, LedgerClient, SubmitOutcome};
use crate::store::PayoutStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reject codes the ledger raises before a sequence number is consumed.
///
/// A reject outside this set is treated as sequence-invalidating and triggers
/// resign recovery for the trailing window.
pub const NON_INVALIDATING_REJECTS: &[&str] = &[
    "malformed-transaction",
    "destination-not-found",
    "destination-policy",
    "amount-below-minimum",
];

/// True when a permanent reject kills the sequence chain behind the row.
pub fn reject_invalidates_sequence(reason: &str) -> bool {
    let code = reason.split(':').next().unwrap_or(reason).trim();
    !NON_INVALIDATING_REJECTS.contains(&code)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    pub submitted: usize,
    pub confirmed: usize,
}

/// Drains signed rows onto the ledger and reconciles submitted rows against
/// the ledger's confirmation truth.
pub struct Submitter {
    store: Arc<dyn PayoutStore>,
    ledger: Arc<dyn LedgerClient>,
}

impl Submitter {
    pub fn new(store: Arc<dyn PayoutStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    /// Runs the confirmation sweep, then transmits every signed-unsubmitted
    /// row in id order. Stops the batch on the first outcome that invalidates
    /// it (transient fault, resign, lost transaction).
    pub async fn submit_transactions(&self) -> Result<SubmitStats> {
        let confirmed = self.confirm_submitted().await?;
        let submitted = self.submit_signed().await?;

        if submitted > 0 || confirmed > 0 {
            info!(submitted, confirmed, "submission pass complete");
        }
        Ok(SubmitStats {
            submitted,
            confirmed,
        })
    }

    async fn confirm_submitted(&self) -> Result<usize> {
        let rows = self.store.list_submitted_unconfirmed().await?;
        let mut confirmed = 0;

        for payment in rows {
            let outcome = self.ledger.confirm(&payment).await.map_err(|err| {
                attach_row(err, payment.id, "confirmation probe failed")
            })?;
            match outcome {
                ConfirmOutcome::Confirmed => {
                    self.store.mark_confirmed(payment.id).await?;
                    confirmed += 1;
                    debug!(payment_id = payment.id, "payment confirmed");
                }
                ConfirmOutcome::StillPending => {}
                ConfirmOutcome::Lost => {
                    warn!(payment_id = payment.id, "submitted transaction lost by the ledger");
                    return Err(PayoutError::ResignRequired {
                        payment_id: payment.id,
                        reason: "submitted transaction lost by the ledger".to_string(),
                        demote_offender: true,
                    });
                }
            }
        }
        Ok(confirmed)
    }

    async fn submit_signed(&self) -> Result<usize> {
        let rows = self.store.list_signed_unsubmitted().await?;
        let mut submitted = 0;

        for payment in rows {
            let artifact = payment.signed_artifact.as_deref().ok_or_else(|| {
                PayoutError::InvalidTransition {
                    payment_id: payment.id,
                    detail: "signed row without an artifact".to_string(),
                }
            })?;

            let outcome = self.ledger.submit(artifact).await.map_err(|err| {
                attach_row(err, payment.id, "ledger submission failed")
            })?;

            match outcome {
                SubmitOutcome::Accepted => {
                    self.store.mark_submitted(payment.id).await?;
                    submitted += 1;
                    debug!(payment_id = payment.id, sequence = payment.sequence, "payment submitted");
                }
                SubmitOutcome::TransientNetwork(reason) => {
                    // Row stays Signed; the whole batch retries next tick.
                    return Err(PayoutError::TransientNetwork(reason));
                }
                SubmitOutcome::Resign(reason) => {
                    return Err(PayoutError::ResignRequired {
                        payment_id: payment.id,
                        reason,
                        demote_offender: true,
                    });
                }
                SubmitOutcome::PermanentReject(reason) => {
                    warn!(payment_id = payment.id, reason = %reason, "payment permanently rejected");
                    self.store.mark_error(payment.id, &reason, false).await?;
                    if reject_invalidates_sequence(&reason) {
                        // The offender stays in Error; only the rows behind
                        // it are demoted.
                        return Err(PayoutError::ResignRequired {
                            payment_id: payment.id,
                            reason,
                            demote_offender: false,
                        });
                    }
                }
            }
        }
        Ok(submitted)
    }
}

/// Unclassified client failures wedge the pipeline; keep the row they hit so
/// the operator can abort it.
fn attach_row(err: PayoutError, payment_id: i64, context: &str) -> PayoutError {
    match err {
        PayoutError::TransientNetwork(_) | PayoutError::ResignRequired { .. } => err,
        other => PayoutError::Fatal {
            payment_id: Some(payment_id),
            reason: format!("{}: {}", context, other),
        },
    }
}
