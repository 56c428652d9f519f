//! x402 payment data model.
//!
//! - [`AcceptSpec`]: what a resource accepts
//! - [`PaymentRequestData`]: what a client sends in the `X-PAYMENT` header
//! - [`PaymentReceipt`]: what remains after settlement, hashed into a payment commitment
//!   by [`crate::commitment`]

mod accept;
mod receipt;
mod request;

pub use accept::{AcceptSpec, NetworkTag, Scheme};
pub use receipt::PaymentReceipt;
pub use request::{
    DEFAULT_PAYMENT_TTL, PAYMENT_HEADER, PaymentRequestData, PaymentRequestPayload,
    attach_signature, create_payment_payload, create_payment_payload_at,
};
