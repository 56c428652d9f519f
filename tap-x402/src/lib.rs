//! TAP/x402: request authentication and payment commitments for paid tool calls.
//!
//! Every paid call against a resource server has to answer two questions: *who* is
//! calling, and *what payment* backs the call. This crate is the boundary layer that
//! answers both without trusting the transport alone.
//!
//! - **TAP** (a profile of RFC 9421 HTTP Message Signatures) proves that a request was
//!   signed by a registered agent key, is fresh, and has not been replayed.
//! - **x402 payments** are verified and settled by a remote facilitator, then bound to
//!   the tool invocation they pay for through a content-addressed commitment.
//!
//! # Architecture
//!
//! ```text
//! Client ── Signature-Input / Signature / X-PAYMENT ──▶ Gateway
//!                                                         │
//!        ┌────────────────────────────────────────────────┤
//!        │ tap::TapVerifier     authority + path rebuilt from the request URL,
//!        │                      skew, expiry, nonce replay, key lookup, crypto
//!        │ policy::PolicyGate   live price × amount ≤ per-call cap
//!        │ facilitator          verify + settle the payment assertion
//!        │ commitment           sha256 over canonical receipt / header pair
//!        │ mcp                  inject paymentCommitment / tapCommitment
//!        └────────────────────────────────────────────────┤
//!                                                         ▼
//!                                                   MCP tool server
//! ```
//!
//! # Quick Start
//!
//! ## 1. Sign and verify a request
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tap_x402::tap::{
//!     KeyRecord, ReplayGuard, SigningSecret, StaticKeyResolver, TapHeaders, TapSigner,
//!     TapVerifier, VerifyOptions,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tap_x402::Result<()> {
//! let signer = TapSigner::new("k1", SigningSecret::ed25519_from_seed(&[7u8; 32])?);
//! let signed = signer.sign_request("api.example.com", "/mcp/execute")?;
//!
//! let mut keys = StaticKeyResolver::new();
//! keys.insert(KeyRecord::from_material("k1", &signer.public_key())?);
//! let verifier = TapVerifier::new(Arc::new(ReplayGuard::default()), VerifyOptions::default());
//!
//! let headers = TapHeaders::new(Some(signed.signature_input.as_str()), Some(signed.signature.as_str()));
//! let outcome = verifier.verify(headers, "https://api.example.com/mcp/execute", &keys).await;
//! assert_eq!(outcome.commitment(), Some(signed.commitment.as_str()));
//! # Ok(())
//! # }
//! ```
//!
//! ## 2. Bind a settled payment to a tool call
//!
//! ```rust
//! use serde_json::json;
//! use tap_x402::{
//!     commitment::compute_commitment_from_receipt,
//!     mcp::{Commitments, ensure_commitments},
//!     payment::PaymentReceipt,
//! };
//!
//! # fn main() -> tap_x402::Result<()> {
//! let receipt = PaymentReceipt {
//!     nonce: "a1b2c3".to_owned(),
//!     amount: "1000000".to_owned(),
//!     recipient: "payee".to_owned(),
//!     resource_id: "sentinel.create_job".to_owned(),
//!     transaction_signature: Some("5VERv8NMvzbJ".to_owned()),
//!     timestamp: 0,
//! };
//! let commitments = Commitments { payment: Some(compute_commitment_from_receipt(&receipt)?), tap: None };
//!
//! let mut body = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
//!                       "params": {"name": "sentinel.create_job", "arguments": {}}});
//! ensure_commitments(&mut body, &commitments);
//! assert_eq!(body["params"]["arguments"]["paymentCommitment"].as_str().map(str::len), Some(64));
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`tap`]: signature-input codec, signature base, signer, key resolvers, replay
//!   guard, verifier
//! - [`commitment`]: SHA-256 commitments over canonical JSON
//! - [`payment`]: accept specs, payment requests, receipts
//! - [`facilitator`]: verify / settle / health client
//! - [`policy`]: price-cap gate over a live price feed
//! - [`mcp`]: commitment injection into `tools/call` bodies
//! - [`registry`]: local agent key publication and signing
//! - [`config`]: TOML + environment configuration
//! - [`security`]: audit events
//! - [`error`]: error types
//!
//! # Error Handling
//!
//! Operational failures return [`Result<T, BridgeError>`](error::Result). Verification,
//! facilitator and policy outcomes are values: a rejected signature is a
//! [`VerificationOutcome::Rejected`](tap::VerificationOutcome::Rejected), a failed
//! settlement is a [`SettlementResult`](facilitator::SettlementResult) in the `Error`
//! state, and callers branch on them instead of on `Err`.
//!
//! # Security Considerations
//!
//! - Authority and path are always taken from the inbound request URL, never from the
//!   client
//! - Nonces are recorded before the signature is checked, so any reuse is rejected
//! - Replay and forgery rejections are logged on the `audit` target at `warn`
//! - Secret keys are zeroized and never appear in `Debug` output

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from axum and reqwest"
)]

pub mod commitment;
pub mod config;
pub mod error;
pub mod facilitator;
pub mod mcp;
pub mod payment;
pub mod policy;
pub mod registry;
pub mod security;
pub mod tap;

pub use error::{BridgeError, Result};
