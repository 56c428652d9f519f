//! TAP request signatures.
//!
//! TAP is a profile of [RFC 9421 HTTP Message Signatures](https://www.rfc-editor.org/rfc/rfc9421.html)
//! that proves who sent a request and that it is fresh. Each protected request carries:
//!
//! - **Signature-Input**: `sig2=("@authority" "@path"); created=…; expires=…; keyId="…"; alg="…"; nonce="…"; tag="…"`
//! - **Signature**: `sig2=:<base64>:`
//!
//! # Key Components
//!
//! - [`SigningParameters`], [`build_signature_input`], [`parse_signature_input`]: header codec
//! - [`RequestContext`], [`build_signature_base`]: the string that is actually signed
//! - [`sign`], [`sign_tap`], [`TapSigner`]: signature generation
//! - [`KeyResolver`] and its implementations: public key lookup by `keyId`
//! - [`ReplayGuard`]: nonce replay protection with TTL eviction
//! - [`TapVerifier`]: full verification producing a [`VerificationOutcome`]
//!
//! # Algorithms
//!
//! - `ed25519`: 64-byte detached signatures, public keys as base64 of the raw 32 bytes
//! - `rsa-pss-sha256`: RSASSA-PSS with SHA-256, MGF1-SHA256 and maximum salt length,
//!   public keys as SPKI PEM
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tap_x402::tap::{
//!     KeyRecord, ReplayGuard, SigningSecret, StaticKeyResolver, TapHeaders, TapSigner,
//!     TapVerifier, VerifyOptions,
//! };
//!
//! # async fn example() -> tap_x402::Result<()> {
//! let signer = TapSigner::new("k1", SigningSecret::ed25519_from_seed(&[42u8; 32])?);
//! let signed = signer.sign_request("api.example.com", "/mcp/execute")?;
//!
//! let mut keys = StaticKeyResolver::new();
//! keys.insert(KeyRecord::from_material("k1", &signer.public_key())?);
//!
//! let verifier = TapVerifier::new(Arc::new(ReplayGuard::default()), VerifyOptions::default());
//! let headers = TapHeaders::new(Some(signed.signature_input.as_str()), Some(signed.signature.as_str()));
//! let outcome = verifier.verify(headers, "https://api.example.com/mcp/execute", &keys).await;
//! assert!(outcome.verified().is_some());
//!
//! // The same headers a second time are a replay.
//! let outcome = verifier.verify(headers, "https://api.example.com/mcp/execute", &keys).await;
//! assert_eq!(outcome.failure().map(ToString::to_string).as_deref(), Some("Replay detected"));
//! # Ok(())
//! # }
//! ```
//!
//! # Security Considerations
//!
//! - The verifier rebuilds authority and path from the request URL it is given, never
//!   from client-supplied fields
//! - A nonce is recorded before the signature is checked; any reuse is rejected
//! - Share one [`ReplayGuard`] between all verifiers serving the same resource

pub mod algorithm;
pub mod base;
pub mod keys;
pub mod nonce;
pub mod params;
pub mod signer;
pub mod verifier;

pub use algorithm::Algorithm;
pub use base::{RequestContext, build_signature_base};
pub use keys::{
    ChainedKeyResolver, HttpKeyResolver, KeyInfo, KeyMaterial, KeyRecord, KeyResolver,
    StaticKeyResolver,
};
pub use nonce::{Clock, ManualClock, ReplayGuard, SystemClock};
pub use params::{
    AttributeValue, SignatureInput, SigningParameters, build_signature_input,
    parse_signature_input, random_nonce,
};
pub use signer::{SignedRequest, SigningSecret, TapSigner, sign, sign_tap, unwrap_signature_header};
pub use verifier::{
    TapHeaders, TapVerifier, VerificationOutcome, VerifiedSignature, VerifyOptions,
};

#[cfg(test)]
mod tests {
    mod proptest_signatures;
}
