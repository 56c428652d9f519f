//! Facilitator request and result types, and normalisation of response bodies.
//!
//! Facilitators disagree on field names. Every response body passes through one of the
//! `normalize_*` functions here so the rest of the crate sees a single result shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payment::{AcceptSpec, NetworkTag, PaymentRequestData};

/// Where and in what asset a payment must settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOptions {
    /// Settlement network.
    pub network: NetworkTag,
    /// Asset tag.
    pub asset: String,
    /// Expected recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_to: Option<String>,
    /// SPL token mint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
    /// Token decimals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl VerifyOptions {
    /// Options for a native asset payment.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn new(network: NetworkTag, asset: impl Into<String>) -> Self {
        Self { network, asset: asset.into(), pay_to: None, token_mint: None, decimals: None }
    }

    /// Sets the expected recipient.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn with_pay_to(mut self, pay_to: impl Into<String>) -> Self {
        self.pay_to = Some(pay_to.into());
        self
    }
}

impl From<&AcceptSpec> for VerifyOptions {
    fn from(spec: &AcceptSpec) -> Self {
        Self {
            network: spec.network.clone(),
            asset: spec.asset.clone(),
            pay_to: Some(spec.pay_to.clone()).filter(|p| !p.is_empty()),
            token_mint: spec.token_mint.clone(),
            decimals: spec.decimals,
        }
    }
}

/// Body of `POST /verify` and `POST /settle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest<'a> {
    /// The payment request serialised as a JSON string.
    pub payment_request: String,
    /// Verify options flattened beside it.
    #[serde(flatten)]
    pub options: &'a VerifyOptions,
}

impl<'a> FacilitatorRequest<'a> {
    /// Builds the body for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serialization`](crate::BridgeError::Serialization) if the
    /// request cannot be serialised.
    pub fn new(request: &PaymentRequestData, options: &'a VerifyOptions) -> crate::Result<Self> {
        Ok(Self { payment_request: request.serialize()?, options })
    }
}

/// Verdict of `verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// `true` if the facilitator accepted the payment.
    pub is_valid: bool,
    /// Reason for rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    /// Accepted payment.
    #[must_use]
    pub const fn valid() -> Self {
        Self { is_valid: true, error: None }
    }

    /// Rejected payment.
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(error.into()) }
    }
}

/// Settlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Settled on chain.
    Settled,
    /// Not settled.
    Error,
}

/// Outcome of `settle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Settlement state.
    pub status: SettlementStatus,
    /// Settlement transaction id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_signature: Option<String>,
    /// Reason for failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettlementResult {
    /// Settled with `transaction_signature`.
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn settled(transaction_signature: impl Into<String>) -> Self {
        Self {
            status: SettlementStatus::Settled,
            transaction_signature: Some(transaction_signature.into()),
            error: None,
        }
    }

    /// Failed settlement.
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn failed(error: impl Into<String>) -> Self {
        Self { status: SettlementStatus::Error, transaction_signature: None, error: Some(error.into()) }
    }

    /// Returns `true` if the payment settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.status == SettlementStatus::Settled
    }
}

/// Facilitator liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// `true` if the facilitator answered.
    pub healthy: bool,
    /// Facilitator identity, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator: Option<String>,
    /// Facilitator-reported time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Reason the probe failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Paths tried, in order, for a settlement transaction id.
const TRANSACTION_PATHS: &[&[&str]] = &[
    &["transactionSignature"],
    &["tx"],
    &["signature"],
    &["result", "tx"],
    &["data", "transactionSignature"],
    &["data", "tx"],
];

fn lookup<'v>(body: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(body, |value, key| value.get(key))
}

fn non_empty_str<'v>(body: &'v Value, path: &[&str]) -> Option<&'v str> {
    lookup(body, path).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `error`, then `message`, from an error body.
pub(crate) fn error_message(body: &Value) -> Option<String> {
    non_empty_str(body, &["error"]).or_else(|| non_empty_str(body, &["message"])).map(str::to_owned)
}

/// Normalises a `/verify` response: any of `isValid`, `valid` or `success` set to `true`
/// accepts the payment.
#[must_use]
pub fn normalize_verify(body: &Value) -> VerificationResult {
    let accepted = ["isValid", "valid", "success"]
        .iter()
        .any(|key| body.get(key).and_then(Value::as_bool) == Some(true));
    if accepted {
        VerificationResult::valid()
    } else {
        VerificationResult::invalid(
            non_empty_str(body, &["error"]).unwrap_or("Invalid payment"),
        )
    }
}

/// Normalises a `/settle` response. A body without a transaction id is a failed
/// settlement.
#[must_use]
pub fn normalize_settle(body: &Value) -> SettlementResult {
    TRANSACTION_PATHS
        .iter()
        .find_map(|path| non_empty_str(body, path))
        .map_or_else(
            || SettlementResult::failed(non_empty_str(body, &["error"]).unwrap_or("Settlement failed")),
            SettlementResult::settled,
        )
}

/// Normalises a `/health` response, reading `data.facilitator` and `data.timestamp`.
#[must_use]
pub fn normalize_health(body: &Value) -> HealthCheckResult {
    let field = |name: &str| lookup(body, &["data", name]).and_then(value_text);
    HealthCheckResult {
        healthy: true,
        facilitator: field("facilitator"),
        timestamp: field("timestamp"),
        error: None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_verify_accepts_any_truthy_flag() {
        for body in [json!({"isValid": true}), json!({"valid": true}), json!({"success": true})] {
            assert_eq!(normalize_verify(&body), VerificationResult::valid(), "{body}");
        }
    }

    #[test]
    fn test_verify_rejection_reason() {
        assert_eq!(
            normalize_verify(&json!({"isValid": false, "error": "amount too low"})),
            VerificationResult::invalid("amount too low")
        );
        assert_eq!(normalize_verify(&json!({"valid": "true"})), VerificationResult::invalid("Invalid payment"));
        assert_eq!(normalize_verify(&json!({})), VerificationResult::invalid("Invalid payment"));
    }

    #[test]
    fn test_settle_extracts_transaction_from_any_shape() {
        let shapes = [
            json!({"transactionSignature": "t1"}),
            json!({"tx": "t1"}),
            json!({"signature": "t1"}),
            json!({"result": {"tx": "t1"}}),
            json!({"data": {"transactionSignature": "t1"}}),
            json!({"data": {"tx": "t1"}}),
        ];
        for body in &shapes {
            assert_eq!(normalize_settle(body), SettlementResult::settled("t1"), "{body}");
        }
    }

    #[test]
    fn test_settle_prefers_top_level_field() {
        let body = json!({"tx": "", "signature": "top", "data": {"tx": "nested"}});
        assert_eq!(normalize_settle(&body).transaction_signature.as_deref(), Some("top"));
    }

    #[test]
    fn test_settle_without_transaction_fails() {
        let result = normalize_settle(&json!({"status": "ok"}));
        assert!(!result.is_settled());
        assert_eq!(result.error.as_deref(), Some("Settlement failed"));

        let result = normalize_settle(&json!({"error": "insufficient funds"}));
        assert_eq!(result.error.as_deref(), Some("insufficient funds"));
    }

    #[test]
    fn test_health_reads_nested_data() {
        let body = json!({"data": {"facilitator": "pay.example", "timestamp": "2024-01-01T00:00:00Z"}});
        let health = normalize_health(&body);
        assert!(health.healthy);
        assert_eq!(health.facilitator.as_deref(), Some("pay.example"));
        assert_eq!(health.timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));

        let bare = normalize_health(&json!({"status": "ok"}));
        assert!(bare.healthy);
        assert_eq!(bare.facilitator, None);
    }

    #[test]
    fn test_error_message_precedence() {
        assert_eq!(error_message(&json!({"error": "e", "message": "m"})).as_deref(), Some("e"));
        assert_eq!(error_message(&json!({"message": "m"})).as_deref(), Some("m"));
        assert_eq!(error_message(&json!({"error": {"code": 1}})), None);
    }

    #[test]
    fn test_request_body_flattens_options() {
        let options = VerifyOptions::new(NetworkTag::SolanaDevnet, "SOL").with_pay_to("payee");
        let request = FacilitatorRequest { payment_request: "{}".to_owned(), options: &options };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"paymentRequest": "{}", "network": "solana-devnet", "asset": "SOL", "payTo": "payee"})
        );
    }
}
