//! Property-based tests for the pipeline's sequence invariants.
//!
//! Verified properties:
//! - Sequence numbers on rows in state >= Signed are strictly increasing
//!   with row id, for any history of ticks.
//! - A row never carries two distinct committed sequence numbers without an
//!   intervening demotion to Pending.
//! - Mid-batch signing failures never introduce sequence gaps.
//! - A tick with nothing to do commits nothing.

use payout_engine::config::{
    Config, DatabaseConfig, FundingConfig, FundingSecret, LedgerConfig, PipelineConfig,
};
use payout_engine::driver::Driver;
use payout_engine::ledger::{MockLedgerClient, SubmitOutcome};
use payout_engine::models::{Amount, NewPayment, Payment, PaymentState};
use payout_engine::payments::{CreatePaymentRequest, PaymentService};
use payout_engine::signer::Signer;
use payout_engine::store::{MemoryStore, PayoutStore};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const FUNDING: &str = "rFundingAccount111111111111";
const DEST: &str = "rDestination1111111111111";

fn test_config() -> Config {
    Config {
        funding: FundingConfig {
            address: FUNDING.to_string(),
            secret: FundingSecret::new(hex::encode([1u8; 32])),
        },
        pipeline: PipelineConfig {
            max_in_flight: 10,
            poll_interval_ms: 1000,
        },
        database: DatabaseConfig {
            url: "postgresql://unused".to_string(),
            max_connections: 1,
        },
        ledger: LedgerConfig {
            url: "http://unused".to_string(),
            request_timeout_ms: 1000,
            mock_enabled: true,
            mock_latency_ms: 0,
            mock_start_sequence: 1,
        },
    }
}

/// Scripted per-submission behavior for a tick run.
#[derive(Debug, Clone)]
enum Script {
    Accept,
    Resign,
    Transient,
}

fn script_strategy() -> impl Strategy<Value = Script> {
    prop_oneof![
        3 => Just(Script::Accept),
        1 => Just(Script::Resign),
        1 => Just(Script::Transient),
    ]
}

fn assert_sequences_strictly_increasing(rows: &[Payment]) {
    let mut in_flight: Vec<&Payment> = rows
        .iter()
        .filter(|p| {
            matches!(
                p.state,
                PaymentState::Signed | PaymentState::Submitted | PaymentState::Confirmed
            )
        })
        .collect();
    in_flight.sort_by_key(|p| p.id);

    let mut previous: Option<(i64, i64)> = None;
    for row in in_flight {
        let sequence = row
            .sequence
            .unwrap_or_else(|| panic!("row {} in state {} without sequence", row.id, row.state));
        if let Some((prev_id, prev_sequence)) = previous {
            assert!(
                sequence > prev_sequence,
                "row {} (seq {}) does not follow row {} (seq {})",
                row.id,
                sequence,
                prev_id,
                prev_sequence
            );
        }
        previous = Some((row.id, sequence));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// For any mix of payments and submission outcomes, rows at or past
    /// Signed always carry strictly increasing sequences in id order, and no
    /// row changes its committed sequence without passing through Pending.
    #[test]
    fn prop_sequence_discipline_under_mixed_outcomes(
        payment_count in 1usize..8,
        scripts in prop::collection::vec(script_strategy(), 0..24),
        ticks in 2usize..6,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = Arc::new(MemoryStore::new());
            let ledger = Arc::new(MockLedgerClient::new(1));
            let driver =
                Driver::new(store.clone(), ledger.clone(), &test_config()).unwrap();
            let service = PaymentService::new(store.clone());

            for i in 0..payment_count {
                service
                    .create_payment(CreatePaymentRequest {
                        destination: DEST.to_string(),
                        amount: Amount::Native(Decimal::from(i as i64 + 1)),
                        memo: None,
                    })
                    .await
                    .unwrap();
            }
            for script in &scripts {
                let outcome = match script {
                    Script::Accept => SubmitOutcome::Accepted,
                    Script::Resign => SubmitOutcome::Resign("sequence-stale".to_string()),
                    Script::Transient => {
                        SubmitOutcome::TransientNetwork("connection reset".to_string())
                    }
                };
                ledger.push_submit_outcome(outcome).await;
            }

            // Last observed committed sequence per row; a change is legal
            // only after the row was seen demoted (sequence cleared).
            let mut committed: HashMap<i64, i64> = HashMap::new();

            for _ in 0..ticks {
                driver.tick().await.unwrap();

                let rows = store.dump().await;
                assert_sequences_strictly_increasing(&rows);

                for row in &rows {
                    match row.sequence {
                        Some(sequence) => {
                            if let Some(&prev) = committed.get(&row.id) {
                                assert_eq!(
                                    prev, sequence,
                                    "row {} changed sequence {} -> {} without demotion",
                                    row.id, prev, sequence
                                );
                            }
                            committed.insert(row.id, sequence);
                        }
                        None => {
                            committed.remove(&row.id);
                        }
                    }
                }
            }
        });
    }

    /// Mid-batch store failure on row k: rows before k keep consecutive
    /// sequences, rows from k on stay Pending, and the cursor points at the
    /// first unassigned sequence.
    #[test]
    fn prop_no_gaps_under_mid_batch_failure(
        payment_count in 2usize..10,
        fail_index in 0usize..10,
        start_sequence in 1i64..1_000_000,
    ) {
        let fail_index = fail_index % payment_count;
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = Arc::new(MemoryStore::new());
            let mut ids = Vec::new();
            for i in 0..payment_count {
                let id = store
                    .insert_pending(NewPayment {
                        reference: Uuid::new_v4(),
                        destination: DEST.to_string(),
                        amount: Amount::Native(Decimal::from(i as i64 + 1)),
                        memo: None,
                    })
                    .await
                    .unwrap();
                ids.push(id);
            }
            store.fail_mark_signed_on(ids[fail_index]).await;

            let config = test_config();
            let mut signer = Signer::new(store.clone(), &config.funding).unwrap();
            signer.set_sequence(start_sequence);

            let result = signer.sign_transactions(payment_count as i64).await;
            prop_assert!(result.is_err());
            prop_assert_eq!(signer.sequence(), Some(start_sequence + fail_index as i64));

            for (i, &id) in ids.iter().enumerate() {
                let row = store.get_payment(id).await.unwrap().unwrap();
                if i < fail_index {
                    prop_assert_eq!(row.state, PaymentState::Signed);
                    prop_assert_eq!(row.sequence, Some(start_sequence + i as i64));
                } else {
                    prop_assert_eq!(row.state, PaymentState::Pending);
                    prop_assert_eq!(row.sequence, None);
                }
            }
            Ok(())
        })?;
    }

    /// A tick over a store holding only terminal rows commits nothing.
    #[test]
    fn prop_idle_tick_is_idempotent(terminal_rows in 0usize..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = Arc::new(MemoryStore::new());
            let ledger = Arc::new(MockLedgerClient::new(1));
            let driver =
                Driver::new(store.clone(), ledger.clone(), &test_config()).unwrap();

            for i in 0..terminal_rows {
                let id = store
                    .insert_pending(NewPayment {
                        reference: Uuid::new_v4(),
                        destination: DEST.to_string(),
                        amount: Amount::Native(Decimal::ONE),
                        memo: None,
                    })
                    .await
                    .unwrap();
                store.mark_signed(id, 100 + i as i64, vec![1]).await.unwrap();
                store.mark_submitted(id).await.unwrap();
                store.mark_confirmed(id).await.unwrap();
            }

            let writes_before = store.write_count().await;
            driver.tick().await.unwrap();
            assert_eq!(store.write_count().await, writes_before);
        });
    }
}
