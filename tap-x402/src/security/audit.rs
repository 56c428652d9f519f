//! Audit logging for signature and payment events.
//!
//! Audit events go to the `audit` tracing target so they can be routed separately
//! from operational logs. Every event carries a correlation id; long opaque tokens
//! (signatures, transaction ids, commitments) are shortened before they are logged.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// A TAP signature was produced.
    SignatureGenerated,
    /// A TAP signature was accepted.
    SignatureVerified,
    /// A TAP signature was rejected for a structural, temporal or key reason.
    VerificationRejected,
    /// A nonce was presented twice within the replay window.
    ReplayDetected,
    /// The cryptographic check failed on a well-formed request.
    ForgeryAttempt,
    /// The facilitator accepted a payment assertion.
    PaymentVerified,
    /// The facilitator settled a payment.
    PaymentSettled,
    /// Payment verification or settlement failed.
    PaymentFailed,
    /// The spend-cap policy denied a paid call.
    PolicyDenied,
}

/// Contextual fields of an audit entry. Absent fields are not serialised.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditDetails {
    /// Request authority the event relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// Request path the event relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Replay nonce.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Signature algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Payment amount in base units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Shortened transaction signature or commitment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Failure or decision reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Duration of the operation in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Audit log entry.
///
/// # Examples
///
/// ```
/// use tap_x402::security::audit::{AuditEvent, AuditEventType, audit_log};
/// use uuid::Uuid;
///
/// let event = AuditEvent::new(AuditEventType::ReplayDetected, "k1", Uuid::new_v4())
///     .with_request("api.example.com", "/mcp/execute")
///     .with_nonce("a1b2c3");
///
/// audit_log(&event);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: SystemTime,
    /// What happened.
    pub event_type: AuditEventType,
    /// Key id of the signing agent, or `"-"` when unknown.
    pub key_id: String,
    /// Correlation id.
    pub request_id: Uuid,
    /// Contextual fields.
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Creates a new audit event stamped with the current time.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn new(event_type: AuditEventType, key_id: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            key_id: key_id.into(),
            request_id,
            details: AuditDetails::default(),
        }
    }

    /// Adds request authority and path.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_request(mut self, authority: impl Into<String>, path: impl Into<String>) -> Self {
        self.details.authority = Some(authority.into());
        self.details.path = Some(path.into());
        self
    }

    /// Adds the replay nonce.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.details.nonce = Some(nonce.into());
        self
    }

    /// Adds the signature algorithm.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.details.algorithm = Some(algorithm.into());
        self
    }

    /// Adds a payment amount.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_amount(mut self, amount: impl Into<String>) -> Self {
        self.details.amount = Some(amount.into());
        self
    }

    /// Adds a transaction signature or commitment, shortened with [`redact_token`].
    #[must_use]
    pub fn with_reference(mut self, reference: &str) -> Self {
        self.details.reference = Some(redact_token(reference));
        self
    }

    /// Adds the failure or decision reason.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.details.reason = Some(reason.into());
        self
    }

    /// Adds the operation duration.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "duration in ms fits u64 for practical values"
    )]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.details.duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

/// Logs an audit event on tracing target `"audit"`.
///
/// Security events (replay, forgery) are logged at `warn`, everything else at `info`.
pub fn audit_log(event: &AuditEvent) {
    match event.event_type {
        AuditEventType::ReplayDetected | AuditEventType::ForgeryAttempt => tracing::warn!(
            target: "audit",
            timestamp = ?event.timestamp,
            event_type = ?event.event_type,
            key_id = %event.key_id,
            request_id = %event.request_id,
            details = ?event.details,
            "AUDIT"
        ),
        _ => tracing::info!(
            target: "audit",
            timestamp = ?event.timestamp,
            event_type = ?event.event_type,
            key_id = %event.key_id,
            request_id = %event.request_id,
            details = ?event.details,
            "AUDIT"
        ),
    }
}

/// Shortens an opaque token to its first and last six characters.
///
/// Tokens of 16 characters or fewer are returned unchanged.
///
/// # Examples
///
/// ```
/// use tap_x402::security::audit::redact_token;
///
/// assert_eq!(redact_token("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb"), "5VERv8…JjBRnb");
/// assert_eq!(redact_token("short"), "short");
/// ```
#[must_use]
pub fn redact_token(token: &str) -> String {
    const KEEP: usize = 6;
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= KEEP * 2 + 4 {
        return token.to_owned();
    }
    let head: String = chars[..KEEP].iter().collect();
    let tail: String = chars[chars.len() - KEEP..].iter().collect();
    format!("{head}…{tail}")
}

/// Creates and logs an audit event in one expression.
///
/// # Examples
///
/// ```
/// use tap_x402::{audit, security::audit::AuditEventType};
/// use uuid::Uuid;
///
/// audit!(AuditEventType::SignatureGenerated, "k1", Uuid::new_v4());
///
/// audit!(
///     AuditEventType::PolicyDenied,
///     "k1",
///     Uuid::new_v4(),
///     with_amount("1500000000"),
///     with_reason("Price cap exceeded: $30.00 > $25.00")
/// );
/// ```
#[macro_export]
macro_rules! audit {
    ($event_type:expr, $key_id:expr, $request_id:expr) => {
        $crate::security::audit::audit_log(
            &$crate::security::audit::AuditEvent::new($event_type, $key_id, $request_id)
        )
    };
    ($event_type:expr, $key_id:expr, $request_id:expr, $($method:ident($($arg:expr),+)),+ $(,)?) => {
        $crate::security::audit::audit_log(
            &$crate::security::audit::AuditEvent::new($event_type, $key_id, $request_id)
                $(.$method($($arg),+))+
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_builder() {
        let request_id = Uuid::new_v4();
        let event = AuditEvent::new(AuditEventType::SignatureVerified, "k1", request_id)
            .with_request("api.example.com", "/mcp/execute")
            .with_nonce("abc")
            .with_algorithm("ed25519")
            .with_duration(Duration::from_millis(12));

        assert_eq!(event.key_id, "k1");
        assert_eq!(event.request_id, request_id);
        assert_eq!(event.details.authority.as_deref(), Some("api.example.com"));
        assert_eq!(event.details.path.as_deref(), Some("/mcp/execute"));
        assert_eq!(event.details.nonce.as_deref(), Some("abc"));
        assert_eq!(event.details.algorithm.as_deref(), Some("ed25519"));
        assert_eq!(event.details.duration_ms, Some(12));
    }

    #[test]
    fn test_reference_is_shortened() {
        let tx = "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb";
        let event = AuditEvent::new(AuditEventType::PaymentSettled, "-", Uuid::new_v4())
            .with_reference(tx);
        let reference = event.details.reference.unwrap();
        assert_eq!(reference, "5VERv8…JjBRnb");
        assert!(!reference.contains(tx));
    }

    #[test]
    fn test_redact_token_keeps_short_values() {
        assert_eq!(redact_token(""), "");
        assert_eq!(redact_token("0123456789abcdef"), "0123456789abcdef");
        assert_eq!(redact_token("0123456789abcdefg"), "012345…bcdefg");
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(AuditEventType::ForgeryAttempt, "k1", Uuid::new_v4())
            .with_reason("Signature verification failed");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("forgery_attempt"));
        assert!(json.contains("\"key_id\":\"k1\""));
        assert!(!json.contains("amount"));
    }
}
