use crate::error::{PayoutError, Result};
use crate::ledger::{AccountInfo, ConfirmOutcome, LedgerClient, SubmitOutcome};
use crate::models::Payment;
use crate::submitter::NON_INVALIDATING_REJECTS;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP/JSON client for a ledger gateway.
///
/// Expected surface:
///   GET  /v1/accounts/{address}        -> { "next_sequence": i64 }
///   POST /v1/transactions              -> { "result": code, "message"?: str }
///   GET  /v1/transactions/{reference}  -> { "status": str }
/// where `reference` is the SHA-256 of the artifact bytes, hex-encoded.
pub struct RpcLedgerClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    artifact: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    result: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxStatusResponse {
    status: String,
}

impl RpcLedgerClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn artifact_reference(artifact: &[u8]) -> String {
        hex::encode(Sha256::digest(artifact))
    }
}

/// Maps a ledger engine result code onto a submit outcome.
///
/// Fail-closed on sequence integrity: an unrecognized definitive code is
/// treated as Resign, never as an isolated reject.
fn classify_submit_code(code: &str, message: Option<&str>) -> SubmitOutcome {
    let reason = match message {
        Some(message) => format!("{}: {}", code, message),
        None => code.to_string(),
    };
    match code {
        "accepted" | "queued" => SubmitOutcome::Accepted,
        "busy" | "overloaded" => SubmitOutcome::TransientNetwork(reason),
        c if c.starts_with("sequence-") => SubmitOutcome::Resign(reason),
        c if NON_INVALIDATING_REJECTS.contains(&c) => SubmitOutcome::PermanentReject(reason),
        _ => SubmitOutcome::Resign(reason),
    }
}

fn transient(context: &str, err: &reqwest::Error) -> PayoutError {
    PayoutError::TransientNetwork(format!("{}: {}", context, err))
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn account_info(&self, address: &str) -> Result<AccountInfo> {
        let url = format!("{}/v1/accounts/{}", self.base_url, address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transient("account_info", &e))?;

        if response.status().is_server_error() {
            return Err(PayoutError::TransientNetwork(format!(
                "account_info: ledger returned {}",
                response.status()
            )));
        }
        let response = response.error_for_status()?;
        let info: AccountInfo = response.json().await?;

        debug!(address, next_sequence = info.next_sequence, "fetched account info");
        Ok(info)
    }

    async fn submit(&self, artifact: &[u8]) -> Result<SubmitOutcome> {
        let url = format!("{}/v1/transactions", self.base_url);
        let artifact_hex = hex::encode(artifact);
        let request = SubmitRequest {
            artifact: &artifact_hex,
        };

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "transport fault during submission");
                return Ok(SubmitOutcome::TransientNetwork(err.to_string()));
            }
        };

        if response.status().is_server_error() {
            return Ok(SubmitOutcome::TransientNetwork(format!(
                "ledger returned {}",
                response.status()
            )));
        }

        let body: SubmitResponse = response.json().await?;
        Ok(classify_submit_code(&body.result, body.message.as_deref()))
    }

    async fn confirm(&self, payment: &Payment) -> Result<ConfirmOutcome> {
        let artifact = payment.signed_artifact.as_deref().ok_or_else(|| {
            PayoutError::InvalidTransition {
                payment_id: payment.id,
                detail: "confirmation probe without a signed artifact".to_string(),
            }
        })?;
        let reference = Self::artifact_reference(artifact);
        let url = format!("{}/v1/transactions/{}", self.base_url, reference);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transient("confirm", &e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ConfirmOutcome::Lost);
        }
        if response.status().is_server_error() {
            return Err(PayoutError::TransientNetwork(format!(
                "confirm: ledger returned {}",
                response.status()
            )));
        }

        let body: TxStatusResponse = response.error_for_status()?.json().await?;
        match body.status.as_str() {
            "confirmed" | "validated" => Ok(ConfirmOutcome::Confirmed),
            "pending" | "queued" => Ok(ConfirmOutcome::StillPending),
            _ => Ok(ConfirmOutcome::Lost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_codes() {
        assert_eq!(classify_submit_code("accepted", None), SubmitOutcome::Accepted);
        assert_eq!(classify_submit_code("queued", None), SubmitOutcome::Accepted);
    }

    #[test]
    fn test_sequence_codes_resign() {
        assert!(matches!(
            classify_submit_code("sequence-stale", Some("behind the account")),
            SubmitOutcome::Resign(_)
        ));
        assert!(matches!(
            classify_submit_code("sequence-gap", None),
            SubmitOutcome::Resign(_)
        ));
    }

    #[test]
    fn test_known_rejects_stay_isolated() {
        assert!(matches!(
            classify_submit_code("destination-policy", None),
            SubmitOutcome::PermanentReject(_)
        ));
    }

    #[test]
    fn test_unknown_codes_fail_closed() {
        assert!(matches!(
            classify_submit_code("weird-new-code", None),
            SubmitOutcome::Resign(_)
        ));
    }

    #[test]
    fn test_artifact_reference_is_stable() {
        let a = RpcLedgerClient::artifact_reference(b"payload");
        let b = RpcLedgerClient::artifact_reference(b"payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
