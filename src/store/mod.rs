pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::models::{NewPayment, Payment};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Durable persistence contract for payout rows and lifecycle transitions.
///
/// Every operation is atomic; the transition methods fail with
/// `InvalidTransition` when the row is not in the required source state, so a
/// caller can never corrupt the lifecycle by racing a stale read. Listing
/// queries return rows ordered by id ascending.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Creates a payment in state Pending and returns its ordering id.
    async fn insert_pending(&self, payment: NewPayment) -> Result<i64>;

    async fn get_payment(&self, id: i64) -> Result<Option<Payment>>;

    /// Up to `limit` lowest-id Pending rows.
    async fn list_unsigned(&self, limit: i64) -> Result<Vec<Payment>>;

    /// Rows in state Signed (artifact present, not yet transmitted).
    async fn list_signed_unsubmitted(&self) -> Result<Vec<Payment>>;

    /// Rows in state Submitted.
    async fn list_submitted_unconfirmed(&self) -> Result<Vec<Payment>>;

    /// Pending -> Signed, stamping the sequence number and artifact.
    async fn mark_signed(&self, id: i64, sequence: i64, artifact: Vec<u8>) -> Result<()>;

    /// Signed -> Submitted.
    async fn mark_submitted(&self, id: i64) -> Result<()>;

    /// Submitted -> Confirmed.
    async fn mark_confirmed(&self, id: i64) -> Result<()>;

    /// Any non-terminal -> Error(kind, fatal).
    async fn mark_error(&self, id: i64, kind: &str, fatal: bool) -> Result<()>;

    /// Operator action: any state except Confirmed -> Aborted. Allowed out of
    /// Error(fatal) because abort is the escape hatch that unwedges the
    /// pipeline.
    async fn mark_aborted(&self, id: i64) -> Result<()>;

    async fn is_aborted(&self, id: i64) -> Result<bool>;

    /// Max stamped sequence across rows that still hold one (Signed,
    /// Submitted, Confirmed, and Error rows whose sequence was never cleared).
    async fn highest_sequence(&self) -> Result<Option<i64>>;

    /// Atomically demotes every Signed/Submitted row with row id >= `id` back
    /// to Pending, clearing sequence, artifact and submitted_at. Returns the
    /// number of demoted rows.
    async fn clear_signed_from(&self, id: i64) -> Result<u64>;
}
