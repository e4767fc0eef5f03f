pub mod mock;
pub mod rpc;

use crate::error::Result;
use crate::models::Payment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use mock::MockLedgerClient;
pub use rpc::RpcLedgerClient;

/// The ledger's view of a funding account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub next_sequence: i64,
}

/// Classified result of transmitting a signed artifact.
///
/// The concrete client owns the mapping from raw ledger responses to these
/// variants; everything downstream reasons only in these terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The ledger took the artifact; its sequence number is consumed.
    Accepted,
    /// Temporary transport fault; the artifact stays valid and is retried.
    TransientNetwork(String),
    /// The ledger will never accept this sequenced artifact; the sequence
    /// chain behind it is dead.
    Resign(String),
    /// Definitive rejection unrelated to sequencing, recorded on the row.
    PermanentReject(String),
}

/// Classified result of a confirmation probe for a Submitted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    StillPending,
    /// The ledger has no trace of the transaction; it will never confirm.
    Lost,
}

/// Opaque interface to the distributed ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn account_info(&self, address: &str) -> Result<AccountInfo>;

    async fn submit(&self, artifact: &[u8]) -> Result<SubmitOutcome>;

    async fn confirm(&self, payment: &Payment) -> Result<ConfirmOutcome>;
}
