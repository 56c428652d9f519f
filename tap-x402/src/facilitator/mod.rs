//! Facilitator round trip.
//!
//! A facilitator is the remote authority that decides whether a client's payment
//! assertion is valid and settles it on chain. [`FacilitatorClient`] wraps its
//! `POST /verify`, `POST /settle` and `GET /health` endpoints.
//!
//! Facilitator errors never escape as `Err`: transport failures, timeouts, error
//! statuses and cancellation all resolve to a [`VerificationResult`] with
//! `is_valid == false` or a [`SettlementResult`] in the `Error` state.

mod client;
mod types;

pub use client::FacilitatorClient;
pub use types::{
    FacilitatorRequest, HealthCheckResult, SettlementResult, SettlementStatus, VerificationResult,
    VerifyOptions, normalize_health, normalize_settle, normalize_verify,
};
