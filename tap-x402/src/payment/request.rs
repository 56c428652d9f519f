//! Client payment requests.
//!
//! A client builds a [`PaymentRequestPayload`], signs it with its wallet (outside this
//! crate), and sends the resulting [`PaymentRequestData`] in the `X-PAYMENT` header,
//! either as raw JSON or base64-encoded JSON.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BridgeError, Result},
    tap::{Clock, SystemClock, random_nonce},
};

/// Header carrying a serialised [`PaymentRequestData`].
pub const PAYMENT_HEADER: &str = "x-payment";

/// Default lifetime of a payment request.
pub const DEFAULT_PAYMENT_TTL: Duration = Duration::from_secs(5 * 60);

/// The part of a payment request the client signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestPayload {
    /// Amount in base units.
    pub amount: String,
    /// Recipient address.
    pub recipient: String,
    /// Identifier of the resource being paid for.
    pub resource_id: String,
    /// URL of the resource being paid for.
    pub resource_url: String,
    /// Random hex nonce.
    pub nonce: String,
    /// Creation time, unix seconds.
    pub timestamp: u64,
    /// Expiry time, unix seconds.
    pub expiry: u64,
}

impl PaymentRequestPayload {
    /// Returns `true` once `now_secs` is past the expiry.
    #[must_use]
    pub const fn is_expired(&self, now_secs: u64) -> bool {
        now_secs > self.expiry
    }
}

/// A signed payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestData {
    /// Signed payload.
    pub payload: PaymentRequestPayload,
    /// Client signature over the payload.
    pub signature: String,
    /// Client public key.
    pub client_public_key: String,
    /// Pre-signed settlement transaction, when the client supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_transaction: Option<String>,
}

impl PaymentRequestData {
    /// Serialises the request as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serialization`] if serialisation fails.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a request from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serialization`] if `json` is not a payment request.
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decodes an `X-PAYMENT` header value holding either JSON or base64 of JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidRequest`] if the value is neither.
    ///
    /// # Examples
    ///
    /// ```
    /// use base64::Engine as _;
    /// use tap_x402::payment::{PaymentRequestData, attach_signature, create_payment_payload};
    ///
    /// let payload = create_payment_payload("1000", "payee", "tool:x", "https://api.example.com/x");
    /// let request = attach_signature(payload, "sig", "client-key", None);
    /// let json = request.serialize()?;
    ///
    /// let encoded = base64::engine::general_purpose::STANDARD.encode(&json);
    /// assert_eq!(PaymentRequestData::from_header(&encoded)?, request);
    /// assert_eq!(PaymentRequestData::from_header(&json)?, request);
    /// # Ok::<(), tap_x402::BridgeError>(())
    /// ```
    pub fn from_header(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.starts_with('{') {
            return Self::parse(value)
                .map_err(|e| BridgeError::InvalidRequest(format!("invalid payment header: {e}")));
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(value))
            .map_err(|e| BridgeError::InvalidRequest(format!("payment header is not base64: {e}")))?;
        serde_json::from_slice(&decoded)
            .map_err(|e| BridgeError::InvalidRequest(format!("invalid payment header: {e}")))
    }
}

/// Creates a payload stamped now, with a fresh nonce and the default lifetime.
#[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
pub fn create_payment_payload(
    amount: impl Into<String>,
    recipient: impl Into<String>,
    resource_id: impl Into<String>,
    resource_url: impl Into<String>,
) -> PaymentRequestPayload {
    create_payment_payload_at(
        amount,
        recipient,
        resource_id,
        resource_url,
        DEFAULT_PAYMENT_TTL,
        SystemClock.now_ms(),
    )
}

/// Creates a payload stamped at `now_ms` that expires after `ttl`.
///
/// Both times are truncated to whole seconds.
#[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
pub fn create_payment_payload_at(
    amount: impl Into<String>,
    recipient: impl Into<String>,
    resource_id: impl Into<String>,
    resource_url: impl Into<String>,
    ttl: Duration,
    now_ms: u64,
) -> PaymentRequestPayload {
    let timestamp = now_ms / 1000;
    PaymentRequestPayload {
        amount: amount.into(),
        recipient: recipient.into(),
        resource_id: resource_id.into(),
        resource_url: resource_url.into(),
        nonce: random_nonce(),
        timestamp,
        expiry: timestamp.saturating_add(ttl.as_secs()),
    }
}

/// Wraps a payload with the client's signature.
#[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
pub fn attach_signature(
    payload: PaymentRequestPayload,
    signature: impl Into<String>,
    client_public_key: impl Into<String>,
    signed_transaction: Option<String>,
) -> PaymentRequestData {
    PaymentRequestData {
        payload,
        signature: signature.into(),
        client_public_key: client_public_key.into(),
        signed_transaction: signed_transaction.filter(|tx| !tx.is_empty()),
    }
}
