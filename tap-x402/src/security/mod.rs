//! Security controls shared by the signing, verification and payment paths.
//!
//! # Audit Logging
//!
//! The audit module emits structured events on the `audit` tracing target:
//!
//! ```rust
//! use tap_x402::security::audit::{AuditEvent, AuditEventType};
//! use uuid::Uuid;
//!
//! let event = AuditEvent::new(AuditEventType::PaymentSettled, "k1", Uuid::new_v4())
//!     .with_amount("1000000")
//!     .with_reference("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb");
//!
//! tap_x402::security::audit::audit_log(&event);
//! ```
//!
//! Replay protection lives in [`crate::tap::ReplayGuard`]; spend caps in
//! [`crate::policy`].

pub mod audit;

pub use audit::{AuditDetails, AuditEvent, AuditEventType, audit_log, redact_token};
