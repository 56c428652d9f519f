//! Price-cap policy gate.
//!
//! Before a paid action runs, [`PolicyGate::enforce`] converts the amount (in base
//! units of the payment token) to USD using a live [`PriceFeed`] and denies the call
//! when it exceeds the per-call cap. The gate applies regardless of what the
//! facilitator would accept.

#[allow(redundant_imports, reason = "Future is in prelude but explicit import aids clarity")]
use std::future::Future;
use std::{str::FromStr, sync::Arc, time::Duration};

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    audit,
    config::PolicyConfig,
    error::{BridgeError, Result},
    security::audit::AuditEventType,
};

/// Source of the USD price of one whole payment token.
///
/// `Ok(None)` and `Err` both mean the price is unavailable.
pub trait PriceFeed: Send + Sync {
    /// Current USD price of one token.
    fn usd_price(&self) -> impl Future<Output = Result<Option<Decimal>>> + Send;
}

impl<F: PriceFeed> PriceFeed for Arc<F> {
    fn usd_price(&self) -> impl Future<Output = Result<Option<Decimal>>> + Send {
        (**self).usd_price()
    }
}

impl<F: PriceFeed> PriceFeed for Option<F> {
    async fn usd_price(&self) -> Result<Option<Decimal>> {
        match self {
            Some(feed) => feed.usd_price().await,
            None => Ok(None),
        }
    }
}

/// Feed returning a fixed price, or none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedPriceFeed(pub Option<Decimal>);

impl PriceFeed for FixedPriceFeed {
    async fn usd_price(&self) -> Result<Option<Decimal>> {
        Ok(self.0)
    }
}

/// Feed reading a price from a JSON HTTP endpoint.
///
/// The price is located with a JSON pointer (e.g. `/solana/usd`) and may be a number
/// or a numeric string.
#[derive(Debug, Clone)]
pub struct HttpPriceFeed {
    client: Client,
    url: String,
    pointer: String,
}

impl HttpPriceFeed {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a feed for `url`, reading the value at `pointer`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HttpError`] if the HTTP client cannot be built.
    pub fn new(url: &str, pointer: &str) -> Result<Self> {
        let client = Client::builder().timeout(Self::DEFAULT_TIMEOUT).build()?;
        Ok(Self { client, url: url.to_owned(), pointer: pointer.to_owned() })
    }
}

impl PriceFeed for HttpPriceFeed {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn usd_price(&self) -> Result<Option<Decimal>> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(BridgeError::UpstreamError(format!("price feed HTTP {}", response.status().as_u16())));
        }
        let body: Value = response.json().await?;
        Ok(body.pointer(&self.pointer).and_then(decimal_from_json))
    }
}

fn decimal_from_json(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_owned(),
        _ => return None,
    };
    Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
}

/// Result of [`PolicyGate::enforce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    /// `true` if the call may proceed.
    pub allow: bool,
    /// Reason for a denial, or an annotation on an allowed call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// USD price of one token used for the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_ref: Option<Decimal>,
    /// Amount converted to USD.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_amount: Option<Decimal>,
}

/// Spend cap enforced per call.
///
/// # Examples
///
/// ```
/// use rust_decimal::Decimal;
/// use tap_x402::policy::{FixedPriceFeed, PolicyGate};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let gate = PolicyGate::new(FixedPriceFeed(Some(Decimal::new(20, 0))), Decimal::new(25, 0));
/// let decision = gate.enforce(1_000_000_000).await;
/// assert!(decision.allow);
/// assert_eq!(decision.usd_amount, Some(Decimal::new(20, 0)));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PolicyGate<F> {
    feed: F,
    max_usd_per_call: Decimal,
    price_required: bool,
    base_units_per_token: Decimal,
    feed_timeout: Duration,
}

impl<F: PriceFeed> PolicyGate<F> {
    /// Base units per token when not configured (lamports per SOL).
    pub const DEFAULT_BASE_UNITS_PER_TOKEN: u64 = 1_000_000_000;

    /// Default bound on a price lookup.
    pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a gate with an optional feed and the default token scale.
    pub fn new(feed: F, max_usd_per_call: Decimal) -> Self {
        Self {
            feed,
            max_usd_per_call,
            price_required: false,
            base_units_per_token: Decimal::from(Self::DEFAULT_BASE_UNITS_PER_TOKEN),
            feed_timeout: Self::DEFAULT_FEED_TIMEOUT,
        }
    }

    /// Creates a gate from configuration.
    pub fn from_config(feed: F, config: &PolicyConfig) -> Self {
        Self {
            feed,
            max_usd_per_call: config.max_usd_per_call,
            price_required: config.price_required,
            base_units_per_token: Decimal::from(config.base_units_per_token.max(1)),
            feed_timeout: Duration::from_secs(config.feed_timeout_secs),
        }
    }

    /// Denies every call while the price is unavailable.
    #[must_use]
    pub const fn require_price(mut self, required: bool) -> Self {
        self.price_required = required;
        self
    }

    /// Per-call cap in USD.
    #[must_use]
    pub const fn max_usd_per_call(&self) -> Decimal {
        self.max_usd_per_call
    }

    /// Decides whether a call costing `amount` base units may proceed.
    #[instrument(skip(self), fields(cap = %self.max_usd_per_call))]
    pub async fn enforce(&self, amount: u64) -> PolicyDecision {
        let Some(price) = self.fetch_price().await else {
            return if self.price_required {
                Self::deny(amount, "Price feed unavailable and is required".to_owned(), None, None)
            } else {
                PolicyDecision {
                    allow: true,
                    reason: Some("Price feed unavailable (optional)".to_owned()),
                    price_ref: None,
                    usd_amount: None,
                }
            };
        };

        let Some(usd_amount) =
            Decimal::from(amount).checked_div(self.base_units_per_token).and_then(|tokens| tokens.checked_mul(price))
        else {
            let reason = format!("Price cap exceeded: USD amount out of range > ${:.2}", self.max_usd_per_call.round_dp(2));
            return Self::deny(amount, reason, Some(price), None);
        };
        if usd_amount > self.max_usd_per_call {
            let reason = format!(
                "Price cap exceeded: ${:.2} > ${:.2}",
                usd_amount.round_dp(2),
                self.max_usd_per_call.round_dp(2)
            );
            return Self::deny(amount, reason, Some(price), Some(usd_amount));
        }

        debug!(%price, %usd_amount, "policy allowed call");
        PolicyDecision { allow: true, reason: None, price_ref: Some(price), usd_amount: Some(usd_amount) }
    }

    async fn fetch_price(&self) -> Option<Decimal> {
        match tokio::time::timeout(self.feed_timeout, self.feed.usd_price()).await {
            Ok(Ok(Some(price))) if price <= Decimal::ZERO => {
                warn!(%price, "price feed returned a non-positive price");
                None
            }
            Ok(Ok(price)) => price,
            Ok(Err(e)) => {
                warn!(error = %e, "price feed failed");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.feed_timeout, "price feed timed out");
                None
            }
        }
    }

    fn deny(
        amount: u64,
        reason: String,
        price_ref: Option<Decimal>,
        usd_amount: Option<Decimal>,
    ) -> PolicyDecision {
        audit!(
            AuditEventType::PolicyDenied,
            "-",
            Uuid::new_v4(),
            with_amount(amount.to_string()),
            with_reason(reason.as_str()),
        );
        PolicyDecision { allow: false, reason: Some(reason), price_ref, usd_amount }
    }
}
