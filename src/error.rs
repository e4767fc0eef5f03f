use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Resign required for payment {payment_id}: {reason}")]
    ResignRequired {
        payment_id: i64,
        reason: String,
        demote_offender: bool,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state transition for payment {payment_id}: {detail}")]
    InvalidTransition { payment_id: i64, detail: String },

    #[error("Payment not found: {0}")]
    PaymentNotFound(i64),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Fatal pipeline error: {reason}")]
    Fatal {
        payment_id: Option<i64>,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PayoutError {
    /// Row the error is associated with, if any. Fatal promotion uses this to
    /// record the error on the offending payment.
    pub fn payment_id(&self) -> Option<i64> {
        match self {
            PayoutError::ResignRequired { payment_id, .. }
            | PayoutError::InvalidTransition { payment_id, .. }
            | PayoutError::PaymentNotFound(payment_id) => Some(*payment_id),
            PayoutError::Fatal { payment_id, .. } => *payment_id,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PayoutError>;
