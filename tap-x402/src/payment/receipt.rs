//! Payment receipts.

use serde::{Deserialize, Serialize};

use crate::payment::PaymentRequestData;

/// Record of a payment that was verified and settled for one resource.
///
/// Serialised in camelCase; `transactionSignature` is omitted when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// Nonce of the payment request.
    pub nonce: String,
    /// Amount in base units.
    pub amount: String,
    /// Recipient address.
    pub recipient: String,
    /// Identifier of the paid resource.
    pub resource_id: String,
    /// Settlement transaction id, when the payment was settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_signature: Option<String>,
    /// Issuance time in unix milliseconds.
    #[serde(default)]
    pub timestamp: u64,
}

impl PaymentReceipt {
    /// Builds a receipt from a payment request and its settlement transaction.
    ///
    /// The timestamp is left at zero; commitment functions stamp it.
    #[must_use]
    pub fn from_request(request: &PaymentRequestData, transaction_signature: Option<String>) -> Self {
        let payload = &request.payload;
        Self {
            nonce: payload.nonce.clone(),
            amount: payload.amount.clone(),
            recipient: payload.recipient.clone(),
            resource_id: payload.resource_id.clone(),
            transaction_signature,
            timestamp: 0,
        }
    }
}
