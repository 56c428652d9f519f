//! Error types for the TAP/x402 boundary layer.
//!
//! Two families of failure live here:
//!
//! - [`BridgeError`]: operational errors returned through [`Result`] by signing, key
//!   decoding, configuration and HTTP plumbing.
//! - [`VerifyFailure`]: the closed set of reasons a TAP signature is rejected. These are
//!   carried inside [`VerificationOutcome`](crate::tap::VerificationOutcome) as values and
//!   are never raised as errors.
//!
//! Facilitator and policy results are values as well (see [`crate::facilitator`] and
//! [`crate::policy`]); nothing in those paths propagates a `BridgeError` to the caller.
//!
//! # Examples
//!
//! ```
//! use tap_x402::error::{BridgeError, Result};
//!
//! fn require_seed(seed: &[u8]) -> Result<()> {
//!     if seed.len() != 32 {
//!         return Err(BridgeError::InvalidKeyMaterial("seed must be 32 bytes".to_owned()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_seed(&[0u8; 16]).is_err());
//! ```

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while signing, decoding keys, loading configuration
/// or talking to remote collaborators.
///
/// # Error Recovery
///
/// - **Key errors** ([`InvalidKeyMaterial`](Self::InvalidKeyMaterial),
///   [`UnsupportedAlgorithm`](Self::UnsupportedAlgorithm)): fix key configuration
/// - **Input errors** ([`MalformedHeader`](Self::MalformedHeader),
///   [`IncompleteContext`](Self::IncompleteContext),
///   [`InvalidRequest`](Self::InvalidRequest)): fix the request, never retried
/// - **Transient errors** ([`HttpError`](Self::HttpError), [`Timeout`](Self::Timeout)):
///   retry policy belongs to the calling orchestrator
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Secret or public key bytes could not be parsed for the requested algorithm.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Algorithm name outside the supported set (`ed25519`, `rsa-pss-sha256`).
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// `Signature-Input` header could not be tokenized.
    #[error("malformed Signature-Input header: {0}")]
    MalformedHeader(String),

    /// Request context lacks a mandatory component (`@authority` or `@path`).
    #[error("request context is missing {0}")]
    IncompleteContext(&'static str),

    /// Low-level cryptographic operation failed.
    #[error("cryptographic operation failed: {0}")]
    CryptoError(String),

    /// HTTP request to a remote collaborator failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Remote collaborator answered with an error status or body.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// Remote call exceeded its deadline and was aborted.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Remote call was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// Configuration value outside its accepted range.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Key id unknown to the local registry.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Caller-supplied request is missing required fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// JSON (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reason a TAP signature verification was rejected.
///
/// The `Display` text is the stable, human-readable reason reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyFailure {
    /// Neither `Signature-Input` nor `Signature` was present and signatures are required.
    #[error("Missing TAP signature headers")]
    MissingHeaders,
    /// `Signature-Input` could not be parsed.
    #[error("Invalid signature-input format")]
    MalformedHeader,
    /// `Signature` is not wrapped as `sig2=:<base64>:`.
    #[error("Invalid signature format")]
    MalformedSignature,
    /// Inbound request URL has no usable authority or path.
    #[error("Invalid request URL")]
    InvalidRequestUrl,
    /// `created` lies further in the future than the allowed skew.
    #[error("Signature created time is in the future")]
    ClockSkew,
    /// `expires` lies in the past.
    #[error("Signature expired")]
    Expired,
    /// `nonce` attribute absent or empty.
    #[error("Missing nonce")]
    MissingNonce,
    /// Nonce already seen within the replay window.
    #[error("Replay detected")]
    ReplayDetected,
    /// Resolver returned no key for `keyId`.
    #[error("Key not found")]
    KeyNotFound,
    /// Resolved key is marked inactive.
    #[error("Key inactive")]
    KeyInactive,
    /// Claimed or declared algorithm has no verifier.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Cryptographic check failed.
    #[error("Signature verification failed")]
    SignatureInvalid,
}

impl VerifyFailure {
    /// Returns `true` for failures that indicate an attack rather than a client mistake.
    ///
    /// These are logged on the audit target separately from structural errors.
    #[must_use]
    pub const fn is_security_event(&self) -> bool {
        matches!(self, Self::ReplayDetected | Self::SignatureInvalid)
    }

    /// Short machine-readable code for the failure.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingHeaders => "missing_headers",
            Self::MalformedHeader => "malformed_header",
            Self::MalformedSignature => "malformed_signature",
            Self::InvalidRequestUrl => "invalid_request_url",
            Self::ClockSkew => "clock_skew",
            Self::Expired => "expired",
            Self::MissingNonce => "missing_nonce",
            Self::ReplayDetected => "replay_detected",
            Self::KeyNotFound => "key_not_found",
            Self::KeyInactive => "key_inactive",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::SignatureInvalid => "signature_invalid",
        }
    }
}
