use crate::config::FundingConfig;
use crate::error::{PayoutError, Result};
use crate::models::{Amount, Payment};
use crate::store::PayoutStore;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Canonical description of one transfer, the bytes the signature covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningPayload {
    pub account: String,
    pub destination: String,
    pub amount: Amount,
    pub memo: Option<String>,
    pub sequence: i64,
}

/// The opaque artifact stored on a Signed row: the payload plus the funding
/// key's signature over its SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub payload: SigningPayload,
    pub public_key: String,
    pub signature: String,
}

impl SignedEnvelope {
    pub fn decode(artifact: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(artifact)?)
    }

    pub fn verify(&self) -> Result<()> {
        let payload_bytes = serde_json::to_vec(&self.payload)?;
        let digest = Sha256::digest(&payload_bytes);

        let public_key: [u8; 32] = hex::decode(&self.public_key)
            .ok()
            .and_then(|b| b.as_slice().try_into().ok())
            .ok_or_else(|| PayoutError::Signing("malformed public key".to_string()))?;
        let signature: [u8; 64] = hex::decode(&self.signature)
            .ok()
            .and_then(|b| b.as_slice().try_into().ok())
            .ok_or_else(|| PayoutError::Signing("malformed signature".to_string()))?;

        let verifying_key = VerifyingKey::from_bytes(&public_key)
            .map_err(|e| PayoutError::Signing(format!("invalid public key: {}", e)))?;
        verifying_key
            .verify(digest.as_slice(), &Signature::from_bytes(&signature))
            .map_err(|e| PayoutError::Signing(format!("verification failed: {}", e)))
    }
}

/// Owns the funding account's next-sequence cursor and turns Pending rows
/// into signed artifacts.
///
/// The cursor is authoritative only while the driver holds its tick guard; on
/// restart (or after it is cleared by resign recovery) it is re-derived from
/// the store or the ledger.
pub struct Signer {
    store: Arc<dyn PayoutStore>,
    signing_key: SigningKey,
    funding_address: String,
    next_sequence: Option<i64>,
}

impl Signer {
    pub fn new(store: Arc<dyn PayoutStore>, funding: &FundingConfig) -> Result<Self> {
        let seed = funding.secret.seed().map_err(PayoutError::Config)?;
        Ok(Self {
            store,
            signing_key: SigningKey::from_bytes(&seed),
            funding_address: funding.address.clone(),
            next_sequence: None,
        })
    }

    pub fn sequence(&self) -> Option<i64> {
        self.next_sequence
    }

    pub fn set_sequence(&mut self, sequence: i64) {
        debug!(sequence, "sequence cursor set");
        self.next_sequence = Some(sequence);
    }

    pub fn clear_sequence(&mut self) {
        self.next_sequence = None;
    }

    /// Signs up to `limit` Pending rows in id order, stamping consecutive
    /// sequence numbers from the cursor.
    ///
    /// A per-row failure stops the batch and surfaces the error; the cursor
    /// then points at the first unassigned sequence, so no gap can appear
    /// between successfully signed rows.
    pub async fn sign_transactions(&mut self, limit: i64) -> Result<usize> {
        if limit <= 0 {
            return Ok(0);
        }

        let rows = self.store.list_unsigned(limit).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut next = self.next_sequence.ok_or_else(|| {
            PayoutError::Internal("signing attempted before sequence init".to_string())
        })?;

        let mut signed = 0;
        for payment in rows {
            let artifact = self.build_artifact(&payment, next)?;
            self.store.mark_signed(payment.id, next, artifact).await?;
            next += 1;
            self.next_sequence = Some(next);
            signed += 1;
            debug!(payment_id = payment.id, sequence = next - 1, "payment signed");
        }

        info!(signed, next_sequence = next, "signing batch complete");
        Ok(signed)
    }

    fn build_artifact(&self, payment: &Payment, sequence: i64) -> Result<Vec<u8>> {
        let payload = SigningPayload {
            account: self.funding_address.clone(),
            destination: payment.destination.clone(),
            amount: payment.amount.clone(),
            memo: payment.memo.clone(),
            sequence,
        };
        let payload_bytes = serde_json::to_vec(&payload)?;
        let digest = Sha256::digest(&payload_bytes);
        let signature = self.signing_key.sign(digest.as_slice());

        let envelope = SignedEnvelope {
            payload,
            public_key: hex::encode(self.signing_key.verifying_key().to_bytes()),
            signature: hex::encode(signature.to_bytes()),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}
