use crate::error::PayoutError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a payout row.
///
/// Pending -> Signed -> Submitted -> Confirmed is the forward path; resign
/// recovery demotes Signed/Submitted rows back to Pending. Error and Aborted
/// sit off-path; Confirmed and Error(fatal) only leave via operator abort.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    Signed,
    Submitted,
    Confirmed,
    Error,
    Aborted,
}

impl FromStr for PaymentState {
    type Err = PayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(PaymentState::Pending),
            "SIGNED" => Ok(PaymentState::Signed),
            "SUBMITTED" => Ok(PaymentState::Submitted),
            "CONFIRMED" => Ok(PaymentState::Confirmed),
            "ERROR" => Ok(PaymentState::Error),
            "ABORTED" => Ok(PaymentState::Aborted),
            _ => Err(PayoutError::Internal(format!("Unknown payment state: {}", s))),
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PaymentState::Pending => write!(f, "PENDING"),
            PaymentState::Signed => write!(f, "SIGNED"),
            PaymentState::Submitted => write!(f, "SUBMITTED"),
            PaymentState::Confirmed => write!(f, "CONFIRMED"),
            PaymentState::Error => write!(f, "ERROR"),
            PaymentState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Transfer amount: a scalar in the ledger's native asset, or an issued-asset
/// tuple. Serialized untagged so the creation surface accepts either a bare
/// number or an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Amount {
    Native(Decimal),
    Issued {
        value: Decimal,
        currency: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        issuer: Option<String>,
    },
}

impl Amount {
    pub fn value(&self) -> Decimal {
        match self {
            Amount::Native(value) => *value,
            Amount::Issued { value, .. } => *value,
        }
    }

    pub fn currency(&self) -> Option<&str> {
        match self {
            Amount::Native(_) => None,
            Amount::Issued { currency, .. } => Some(currency.as_str()),
        }
    }

    pub fn issuer(&self) -> Option<&str> {
        match self {
            Amount::Native(_) => None,
            Amount::Issued { issuer, .. } => issuer.as_deref(),
        }
    }
}

/// One intended transfer, as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub reference: Uuid,
    pub destination: String,
    pub amount: Amount,
    pub memo: Option<String>,
    pub state: PaymentState,
    pub sequence: Option<i64>,
    pub signed_artifact: Option<Vec<u8>>,
    pub error_kind: Option<String>,
    pub fatal: bool,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// True for states that consume a sequence number the ledger has not yet
    /// confirmed.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, PaymentState::Signed | PaymentState::Submitted)
    }
}

/// Insert payload for a validated payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub reference: Uuid,
    pub destination: String,
    pub amount: Amount,
    pub memo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            PaymentState::Pending,
            PaymentState::Signed,
            PaymentState::Submitted,
            PaymentState::Confirmed,
            PaymentState::Error,
            PaymentState::Aborted,
        ] {
            let parsed: PaymentState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }

        assert!("NOT_A_STATE".parse::<PaymentState>().is_err());
    }

    #[test]
    fn test_amount_untagged_forms() {
        let native: Amount = serde_json::from_str("\"10.50\"").unwrap();
        assert_eq!(native, Amount::Native(Decimal::new(1050, 2)));

        let issued: Amount = serde_json::from_str(
            r#"{"value": "25", "currency": "USD", "issuer": "rrrrrrrrrrrrrrrrrrrrrhoLvTp"}"#,
        )
        .unwrap();
        assert_eq!(issued.value(), Decimal::from(25));
        assert_eq!(issued.currency(), Some("USD"));
        assert!(issued.issuer().is_some());
    }

    #[test]
    fn test_amount_accessors_native() {
        let amount = Amount::Native(Decimal::from(7));
        assert_eq!(amount.value(), Decimal::from(7));
        assert_eq!(amount.currency(), None);
        assert_eq!(amount.issuer(), None);
    }
}
