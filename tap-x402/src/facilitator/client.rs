//! HTTP client for an x402 facilitator.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::types::{
    FacilitatorRequest, HealthCheckResult, SettlementResult, VerificationResult, VerifyOptions,
    error_message, normalize_health, normalize_settle, normalize_verify,
};
use crate::{
    audit,
    error::{BridgeError, Result},
    payment::PaymentRequestData,
    security::audit::AuditEventType,
};

/// Identity reported when only the `/supported` fallback answers.
const HOSTED_FACILITATOR: &str = "hosted-facilitator";

/// Client for the facilitator `verify`, `settle` and `health` endpoints.
///
/// Every call is bounded by the client timeout (default 30 seconds). On timeout or
/// cancellation the in-flight request future is dropped, which closes its connection.
/// Results are always values; transport failures become `isValid: false` or a failed
/// settlement.
///
/// # Examples
///
/// ```rust,no_run
/// use tap_x402::{
///     facilitator::{FacilitatorClient, VerifyOptions},
///     payment::{NetworkTag, PaymentRequestData},
/// };
///
/// # async fn example(request: PaymentRequestData) -> tap_x402::Result<()> {
/// let client = FacilitatorClient::new("https://facilitator.example.com")?;
/// let options = VerifyOptions::new(NetworkTag::SolanaDevnet, "SOL").with_pay_to("payee");
///
/// let verdict = client.verify(&request, &options).await;
/// if verdict.is_valid {
///     let settlement = client.settle(&request, &options).await;
///     println!("settled: {:?}", settlement.transaction_signature);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl FacilitatorClient {
    /// Default per-call timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a client for the facilitator at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HttpError`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::with_client(Client::builder().build()?, base_url))
    }

    /// Creates a client sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Facilitator base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Asks the facilitator whether `request` is an acceptable payment.
    pub async fn verify(&self, request: &PaymentRequestData, options: &VerifyOptions) -> VerificationResult {
        self.verify_with_cancel(request, options, &CancellationToken::new()).await
    }

    /// [`verify`](Self::verify), aborted when `cancel` fires.
    #[instrument(skip_all, fields(network = %options.network, asset = %options.asset))]
    pub async fn verify_with_cancel(
        &self,
        request: &PaymentRequestData,
        options: &VerifyOptions,
        cancel: &CancellationToken,
    ) -> VerificationResult {
        let started = Instant::now();
        let result = match self.post("/verify", request, options, cancel).await {
            Ok(body) => normalize_verify(&body),
            Err(e) => VerificationResult::invalid(failure_message(&e)),
        };

        if result.is_valid {
            audit!(
                AuditEventType::PaymentVerified,
                request.client_public_key.as_str(),
                Uuid::new_v4(),
                with_nonce(request.payload.nonce.as_str()),
                with_amount(request.payload.amount.as_str()),
                with_duration(started.elapsed()),
            );
        } else {
            let reason = result.error.clone().unwrap_or_default();
            audit!(
                AuditEventType::PaymentFailed,
                request.client_public_key.as_str(),
                Uuid::new_v4(),
                with_nonce(request.payload.nonce.as_str()),
                with_amount(request.payload.amount.as_str()),
                with_reason(reason),
                with_duration(started.elapsed()),
            );
        }
        result
    }

    /// Asks the facilitator to settle `request` on chain.
    pub async fn settle(&self, request: &PaymentRequestData, options: &VerifyOptions) -> SettlementResult {
        self.settle_with_cancel(request, options, &CancellationToken::new()).await
    }

    /// [`settle`](Self::settle), aborted when `cancel` fires.
    #[instrument(skip_all, fields(network = %options.network, asset = %options.asset))]
    pub async fn settle_with_cancel(
        &self,
        request: &PaymentRequestData,
        options: &VerifyOptions,
        cancel: &CancellationToken,
    ) -> SettlementResult {
        let started = Instant::now();
        let result = match self.post("/settle", request, options, cancel).await {
            Ok(body) => normalize_settle(&body),
            Err(e) => SettlementResult::failed(failure_message(&e)),
        };

        match result.transaction_signature.as_deref() {
            Some(tx) => audit!(
                AuditEventType::PaymentSettled,
                request.client_public_key.as_str(),
                Uuid::new_v4(),
                with_nonce(request.payload.nonce.as_str()),
                with_amount(request.payload.amount.as_str()),
                with_reference(tx),
                with_duration(started.elapsed()),
            ),
            None => audit!(
                AuditEventType::PaymentFailed,
                request.client_public_key.as_str(),
                Uuid::new_v4(),
                with_nonce(request.payload.nonce.as_str()),
                with_amount(request.payload.amount.as_str()),
                with_reason(result.error.clone().unwrap_or_default()),
                with_duration(started.elapsed()),
            ),
        }
        result
    }

    /// Probes `/health`, falling back to `/supported` as a weaker liveness signal.
    #[instrument(skip(self), fields(facilitator = %self.base_url))]
    pub async fn health(&self) -> HealthCheckResult {
        let cancel = CancellationToken::new();
        let primary = match self.get("/health", &cancel).await {
            Ok(body) => return normalize_health(&body),
            Err(e) => e,
        };
        debug!(error = %primary, "health endpoint failed, probing /supported");

        match self.get("/supported", &cancel).await {
            Ok(_) => HealthCheckResult {
                healthy: true,
                facilitator: Some(HOSTED_FACILITATOR.to_owned()),
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "facilitator unhealthy");
                HealthCheckResult {
                    healthy: false,
                    facilitator: None,
                    timestamp: None,
                    error: Some(failure_message(&e)),
                }
            }
        }
    }

    async fn post(
        &self,
        path: &str,
        request: &PaymentRequestData,
        options: &VerifyOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let body = FacilitatorRequest::new(request, options)?;
        let builder = self.client.post(format!("{}{path}", self.base_url)).json(&body);
        self.exchange(builder, cancel).await
    }

    async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Value> {
        let builder = self.client.get(format!("{}{path}", self.base_url));
        self.exchange(builder, cancel).await
    }

    /// Sends `builder` under the timeout and `cancel`; a non-2xx status is an error
    /// carrying the body's `error` or `message`, else `HTTP <status>`.
    async fn exchange(&self, builder: RequestBuilder, cancel: &CancellationToken) -> Result<Value> {
        let call = async {
            let response = builder.send().await?;
            let status = response.status();
            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            if !status.is_success() {
                return Err(BridgeError::UpstreamError(
                    error_message(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
                ));
            }
            Ok(body)
        };

        tokio::select! {
            () = cancel.cancelled() => Err(BridgeError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, call) => {
                outcome.map_err(|_| BridgeError::Timeout(self.timeout))?
            }
        }
    }
}

/// Text reported to callers: the facilitator's own message for upstream errors,
/// otherwise the error's display form.
fn failure_message(error: &BridgeError) -> String {
    match error {
        BridgeError::UpstreamError(message) => message.clone(),
        other => other.to_string(),
    }
}
