use crate::error::{PayoutError, Result};
use crate::models::{Amount, NewPayment, Payment};
use crate::store::PayoutStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

const ADDRESS_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Well-formedness check for a ledger address: base58 alphabet, 25-35 chars.
pub fn is_valid_address(address: &str) -> bool {
    (25..=35).contains(&address.len())
        && address.chars().all(|c| ADDRESS_ALPHABET.contains(c))
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 25, max = 35))]
    pub destination: String,
    pub amount: Amount,
    #[validate(length(max = 256))]
    pub memo: Option<String>,
}

/// Client-facing creation and abort surface. Validation happens here,
/// synchronously; nothing invalid ever reaches the pipeline.
pub struct PaymentService {
    store: Arc<dyn PayoutStore>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn PayoutStore>) -> Self {
        Self { store }
    }

    pub async fn create_payment(&self, request: CreatePaymentRequest) -> Result<i64> {
        request
            .validate()
            .map_err(|e| PayoutError::Validation(e.to_string()))?;

        if !is_valid_address(&request.destination) {
            return Err(PayoutError::Validation(format!(
                "invalid destination address: {}",
                request.destination
            )));
        }
        validate_amount(&request.amount)?;

        let reference = Uuid::new_v4();
        let id = self
            .store
            .insert_pending(NewPayment {
                reference,
                destination: request.destination,
                amount: request.amount,
                memo: request.memo,
            })
            .await?;

        info!(payment_id = id, %reference, "payment queued");
        Ok(id)
    }

    /// Operator action: transitions a non-terminal row to Aborted. The
    /// driver notices on its next tick and resigns the trailing window.
    pub async fn abort_payment(&self, id: i64) -> Result<()> {
        self.store.mark_aborted(id).await?;
        info!(payment_id = id, "payment aborted by operator");
        Ok(())
    }

    pub async fn get_payment(&self, id: i64) -> Result<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or(PayoutError::PaymentNotFound(id))
    }
}

fn validate_amount(amount: &Amount) -> Result<()> {
    if amount.value() <= Decimal::ZERO {
        return Err(PayoutError::Validation(format!(
            "amount must be positive, got {}",
            amount.value()
        )));
    }

    if let Amount::Issued { currency, issuer, .. } = amount {
        let currency_ok = (3..=20).contains(&currency.len())
            && currency.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !currency_ok {
            return Err(PayoutError::Validation(format!(
                "invalid currency code: {}",
                currency
            )));
        }
        if let Some(issuer) = issuer {
            if !is_valid_address(issuer) {
                return Err(PayoutError::Validation(format!(
                    "invalid issuer address: {}",
                    issuer
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentState;
    use crate::store::MemoryStore;

    const DEST: &str = "rDestination1111111111111";

    fn service() -> PaymentService {
        PaymentService::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(DEST));
        assert!(!is_valid_address("short"));
        assert!(!is_valid_address("rContains0AndOAndIAndlChars0OIl00"));
        assert!(!is_valid_address(&"r".repeat(40)));
    }

    #[tokio::test]
    async fn test_create_native_payment() {
        let service = service();
        let id = service
            .create_payment(CreatePaymentRequest {
                destination: DEST.to_string(),
                amount: Amount::Native(Decimal::from(10)),
                memo: Some("invoice 7".to_string()),
            })
            .await
            .unwrap();

        let payment = service.get_payment(id).await.unwrap();
        assert_eq!(payment.state, PaymentState::Pending);
        assert_eq!(payment.amount.value(), Decimal::from(10));
    }

    #[tokio::test]
    async fn test_rejects_bad_destination() {
        let service = service();
        let err = service
            .create_payment(CreatePaymentRequest {
                destination: "not-an-address".to_string(),
                amount: Amount::Native(Decimal::from(10)),
                memo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PayoutError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let service = service();
        for value in [Decimal::ZERO, Decimal::from(-5)] {
            let err = service
                .create_payment(CreatePaymentRequest {
                    destination: DEST.to_string(),
                    amount: Amount::Native(value),
                    memo: None,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, PayoutError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_issued_amount() {
        let service = service();

        let err = service
            .create_payment(CreatePaymentRequest {
                destination: DEST.to_string(),
                amount: Amount::Issued {
                    value: Decimal::from(5),
                    currency: "usd".to_string(),
                    issuer: None,
                },
                memo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PayoutError::Validation(_)));

        let err = service
            .create_payment(CreatePaymentRequest {
                destination: DEST.to_string(),
                amount: Amount::Issued {
                    value: Decimal::from(5),
                    currency: "USD".to_string(),
                    issuer: Some("bogus".to_string()),
                },
                memo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PayoutError::Validation(_)));
    }

    #[tokio::test]
    async fn test_abort_payment() {
        let service = service();
        let id = service
            .create_payment(CreatePaymentRequest {
                destination: DEST.to_string(),
                amount: Amount::Native(Decimal::ONE),
                memo: None,
            })
            .await
            .unwrap();

        service.abort_payment(id).await.unwrap();
        let payment = service.get_payment(id).await.unwrap();
        assert_eq!(payment.state, PaymentState::Aborted);
    }
}
