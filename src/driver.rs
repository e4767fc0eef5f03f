use crate::config::Config;
use crate::error::{PayoutError, Result};
use crate::ledger::LedgerClient;
use crate::signer::Signer;
use crate::store::PayoutStore;
use crate::submitter::Submitter;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub signed: usize,
    pub submitted: usize,
    pub confirmed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick holds the guard; nothing was touched.
    Busy,
    Completed(TickStats),
    /// A classified error was recovered (transient swallowed or resign
    /// recovery ran); progress resumes next tick.
    Recovered,
}

#[derive(Debug, Clone)]
struct FatalState {
    payment_id: Option<i64>,
    reason: String,
}

struct TickState {
    signer: Signer,
    fatal: Option<FatalState>,
}

/// Orchestrates one pipeline tick: fatal-error check, sequence init, quota,
/// signing, submission, and classification of whatever went wrong.
///
/// Exactly one driver instance may run against a funding account; a second
/// instance corrupts the sequence invariant. Enforcement is left to the
/// deployment.
pub struct Driver {
    store: Arc<dyn PayoutStore>,
    ledger: Arc<dyn LedgerClient>,
    submitter: Submitter,
    funding_address: String,
    max_in_flight: i64,
    state: Mutex<TickState>,
}

impl Driver {
    pub fn new(
        store: Arc<dyn PayoutStore>,
        ledger: Arc<dyn LedgerClient>,
        config: &Config,
    ) -> Result<Self> {
        let signer = Signer::new(store.clone(), &config.funding)?;
        let submitter = Submitter::new(store.clone(), ledger.clone());

        Ok(Self {
            store,
            ledger,
            submitter,
            funding_address: config.funding.address.clone(),
            max_in_flight: config.pipeline.max_in_flight,
            state: Mutex::new(TickState {
                signer,
                fatal: None,
            }),
        })
    }

    /// Current sequence cursor, primarily for observability and tests.
    pub async fn sequence_cursor(&self) -> Option<i64> {
        self.state.lock().await.signer.sequence()
    }

    /// Runs one tick. Re-entrant calls return `Busy` immediately with no
    /// side effect; the guard is released on every exit path by scope.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("tick already in progress");
                return Ok(TickOutcome::Busy);
            }
        };

        match self.check_fatal(&mut state).await {
            Ok(None) => {}
            Ok(Some(aborted_id)) => {
                match self.resign_from(&mut state, aborted_id + 1).await {
                    Ok(()) => {}
                    Err(PayoutError::TransientNetwork(reason)) => {
                        // The unwedging resign already demoted the rows; the
                        // cursor refresh retries next tick.
                        warn!(reason = %reason, "sequence refresh deferred to next tick");
                        return Ok(TickOutcome::Recovered);
                    }
                    Err(err) => return self.promote_fatal(&mut state, err).await,
                }
            }
            Err(err) => return Err(err),
        }

        match self.run_pipeline(&mut state).await {
            Ok(stats) => Ok(TickOutcome::Completed(stats)),
            Err(PayoutError::TransientNetwork(reason)) => {
                warn!(reason = %reason, "transient fault, retrying next tick");
                Ok(TickOutcome::Recovered)
            }
            Err(PayoutError::ResignRequired {
                payment_id,
                reason,
                demote_offender,
            }) => {
                warn!(payment_id, reason = %reason, "resign required");
                let from_id = if demote_offender {
                    payment_id
                } else {
                    payment_id + 1
                };
                match self.resign_from(&mut state, from_id).await {
                    Ok(()) => Ok(TickOutcome::Recovered),
                    Err(PayoutError::TransientNetwork(reason)) => {
                        // Rows are demoted and the cursor is invalidated;
                        // sequence init re-derives it next tick.
                        warn!(reason = %reason, "sequence refresh deferred to next tick");
                        Ok(TickOutcome::Recovered)
                    }
                    Err(err) => self.promote_fatal(&mut state, err).await,
                }
            }
            Err(err) => self.promote_fatal(&mut state, err).await,
        }
    }

    /// Entering a tick with the fatal slot set: if the operator has aborted
    /// the offending row, clear the slot and hand the row back so the tick
    /// can resign the trailing window; otherwise re-surface the fatal error
    /// and make no progress. A store fault while probing leaves the slot
    /// armed.
    async fn check_fatal(&self, state: &mut TickState) -> Result<Option<i64>> {
        let Some(fatal) = state.fatal.clone() else {
            return Ok(None);
        };

        if let Some(payment_id) = fatal.payment_id {
            if self.store.is_aborted(payment_id).await? {
                info!(payment_id, "offending payment aborted by operator, resuming");
                state.fatal = None;
                return Ok(Some(payment_id));
            }
        }

        Err(PayoutError::Fatal {
            payment_id: fatal.payment_id,
            reason: fatal.reason,
        })
    }

    async fn run_pipeline(&self, state: &mut TickState) -> Result<TickStats> {
        self.ensure_sequence(state).await?;

        let in_flight = self.store.list_submitted_unconfirmed().await?.len() as i64;
        let quota = self.max_in_flight - in_flight;

        let signed = if quota > 0 {
            state.signer.sign_transactions(quota).await?
        } else {
            debug!(in_flight, "in-flight quota exhausted, skipping signing");
            0
        };

        let stats = self.submitter.submit_transactions().await?;

        Ok(TickStats {
            signed,
            submitted: stats.submitted,
            confirmed: stats.confirmed,
        })
    }

    /// Re-derives the sequence cursor when empty: from the store's highest
    /// stamped sequence, or from the ledger when no row holds one.
    async fn ensure_sequence(&self, state: &mut TickState) -> Result<()> {
        if state.signer.sequence().is_some() {
            return Ok(());
        }

        match self.store.highest_sequence().await? {
            Some(highest) => {
                info!(sequence = highest + 1, "sequence cursor restored from store");
                state.signer.set_sequence(highest + 1);
            }
            None => {
                let info = self.ledger.account_info(&self.funding_address).await?;
                info!(sequence = info.next_sequence, "sequence cursor initialized from ledger");
                state.signer.set_sequence(info.next_sequence);
            }
        }
        Ok(())
    }

    /// Demotes every signed/submitted row with id >= `from_id` back to
    /// Pending and replaces the cursor with the ledger's fresh view. The
    /// cursor is invalidated before the fetch so a failure can never leave a
    /// stale cursor behind.
    async fn resign_from(&self, state: &mut TickState, from_id: i64) -> Result<()> {
        let cleared = self.store.clear_signed_from(from_id).await?;
        state.signer.clear_sequence();
        info!(from_id, cleared, "demoted trailing window for resign");

        let info = self.ledger.account_info(&self.funding_address).await?;
        state.signer.set_sequence(info.next_sequence);
        Ok(())
    }

    /// Unclassified errors wedge the pipeline until the operator aborts the
    /// associated row.
    async fn promote_fatal(&self, state: &mut TickState, err: PayoutError) -> Result<TickOutcome> {
        let payment_id = err.payment_id();
        let reason = match &err {
            PayoutError::Fatal { reason, .. } => reason.clone(),
            other => other.to_string(),
        };

        if let Some(id) = payment_id {
            if let Err(mark_err) = self.store.mark_error(id, &reason, true).await {
                error!(payment_id = id, error = %mark_err, "failed to record fatal error on row");
            }
        }

        error!(payment_id, reason = %reason, "unrecoverable error, pipeline wedged");
        state.fatal = Some(FatalState { payment_id, reason: reason.clone() });
        Err(PayoutError::Fatal { payment_id, reason })
    }
}
