//! Content-addressed commitments.
//!
//! A commitment is the lowercase hex SHA-256 of a canonical representation. It is an
//! equality handle passed downstream, not a proof by itself.
//!
//! Receipts are hashed over canonical JSON: object keys sorted at every depth and no
//! insignificant whitespace. Two receipts with equal content and different field order
//! therefore hash identically.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{
    error::Result,
    payment::PaymentReceipt,
    tap::{Clock, SystemClock},
};

/// Lowercase hex SHA-256 of `input`.
///
/// # Examples
///
/// ```
/// use tap_x402::commitment::sha256_hex;
///
/// assert_eq!(
///     sha256_hex("abc"),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Commitment to a verified TAP header pair: `sha256_hex(signature_input + "|" + signature)`.
#[must_use]
pub fn tap_commitment(signature_input: &str, signature: &str) -> String {
    sha256_hex(&format!("{signature_input}|{signature}"))
}

/// Serialises `value` as canonical JSON with keys sorted at every depth.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tap_x402::commitment::canonical_json;
///
/// let value = json!({"b": 1, "a": {"d": [true, null], "c": "x"}});
/// assert_eq!(canonical_json(&value), r#"{"a":{"c":"x","d":[true,null]},"b":1}"#);
/// ```
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hashes a receipt-like value.
///
/// A value that serialises to a JSON string is hashed as that raw string, unchanged.
/// Anything else is hashed over its canonical JSON.
///
/// # Errors
///
/// Returns [`BridgeError::Serialization`](crate::BridgeError::Serialization) if `receipt`
/// cannot be represented as JSON.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tap_x402::commitment::{hash_receipt, sha256_hex};
///
/// let a = hash_receipt(&json!({"nonce": "n1", "amount": "100"}))?;
/// let b = hash_receipt(&json!({"amount": "100", "nonce": "n1"}))?;
/// assert_eq!(a, b);
///
/// assert_eq!(hash_receipt("already-serialised")?, sha256_hex("already-serialised"));
/// # Ok::<(), tap_x402::BridgeError>(())
/// ```
pub fn hash_receipt<T: Serialize + ?Sized>(receipt: &T) -> Result<String> {
    let value = serde_json::to_value(receipt)?;
    Ok(match value {
        Value::String(raw) => sha256_hex(&raw),
        other => sha256_hex(&canonical_json(&other)),
    })
}

/// Stamps `receipt.timestamp` with the current time (unix milliseconds) and hashes it.
///
/// Each call observes a new timestamp, so the result identifies one issuance of the
/// receipt. Use [`compute_commitment_from_receipt_at`] for a reproducible value.
///
/// # Errors
///
/// See [`hash_receipt`].
pub fn compute_commitment_from_receipt(receipt: &PaymentReceipt) -> Result<String> {
    compute_commitment_from_receipt_at(receipt, SystemClock.now_ms())
}

/// Stamps `receipt.timestamp` with `now_ms` and hashes it.
///
/// # Errors
///
/// See [`hash_receipt`].
pub fn compute_commitment_from_receipt_at(receipt: &PaymentReceipt, now_ms: u64) -> Result<String> {
    let stamped = PaymentReceipt { timestamp: now_ms, ..receipt.clone() };
    hash_receipt(&stamped)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn receipt() -> PaymentReceipt {
        PaymentReceipt {
            nonce: "n-1".to_owned(),
            amount: "1000000".to_owned(),
            recipient: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_owned(),
            resource_id: "tool:weather".to_owned(),
            transaction_signature: Some("5VERv8NMvzbJ".to_owned()),
            timestamp: 0,
        }
    }

    #[test]
    fn test_tap_commitment_joins_with_pipe() {
        assert_eq!(tap_commitment("a", "b"), sha256_hex("a|b"));
        assert_eq!(tap_commitment("a", "b").len(), 64);
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"z": [{"y": 1, "x": 2}], "m": "q\"uote"});
        assert_eq!(canonical_json(&value), r#"{"m":"q\"uote","z":[{"x":2,"y":1}]}"#);
    }

    #[test]
    fn test_hash_receipt_is_deterministic() {
        let r = receipt();
        assert_eq!(hash_receipt(&r).unwrap(), hash_receipt(&r).unwrap());
    }

    #[test]
    fn test_hash_receipt_changes_with_any_field() {
        let base = hash_receipt(&receipt()).unwrap();
        let variants = [
            PaymentReceipt { nonce: "n-2".to_owned(), ..receipt() },
            PaymentReceipt { amount: "1000001".to_owned(), ..receipt() },
            PaymentReceipt { recipient: "other".to_owned(), ..receipt() },
            PaymentReceipt { resource_id: "tool:other".to_owned(), ..receipt() },
            PaymentReceipt { transaction_signature: None, ..receipt() },
            PaymentReceipt { timestamp: 1, ..receipt() },
        ];
        for variant in &variants {
            assert_ne!(hash_receipt(variant).unwrap(), base, "{variant:?}");
        }
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let typed = hash_receipt(&receipt()).unwrap();
        let reordered = json!({
            "timestamp": 0,
            "transactionSignature": "5VERv8NMvzbJ",
            "resourceId": "tool:weather",
            "recipient": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
            "amount": "1000000",
            "nonce": "n-1",
        });
        assert_eq!(hash_receipt(&reordered).unwrap(), typed);
    }

    #[test]
    fn test_commitment_stamps_timestamp() {
        let r = receipt();
        let at_5 = compute_commitment_from_receipt_at(&r, 5).unwrap();
        assert_eq!(at_5, hash_receipt(&PaymentReceipt { timestamp: 5, ..r.clone() }).unwrap());
        assert_ne!(at_5, compute_commitment_from_receipt_at(&r, 6).unwrap());
        assert_eq!(compute_commitment_from_receipt(&r).unwrap().len(), 64);
    }
}
