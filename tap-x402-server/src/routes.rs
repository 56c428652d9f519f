//! HTTP routes.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /health` | gateway and facilitator health |
//! | `GET /tap/keys/:keyId` | registry record of the local agent key |
//! | `POST /tap/sign` | sign an authority and path with the local agent key |
//! | `POST /mcp/execute` | paid, TAP-verified passthrough to the MCP server |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
        header::{ACCEPT, HOST},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tap_x402::{
    BridgeError,
    commitment::compute_commitment_from_receipt,
    mcp::{Commitments, JOB_TOOLS, inject_for_tools},
    payment::{PAYMENT_HEADER, PaymentReceipt, PaymentRequestData},
    policy::PolicyDecision,
    registry::{SignRequest, SignResponse},
    tap::{KeyRecord, TapHeaders},
};
use tracing::{info, instrument, warn};

use crate::{
    error::ApiError,
    observability::{HealthCheck, HealthReport},
    state::AppState,
};

/// Builds the router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tap/keys/:key_id", get(describe_key))
        .route("/tap/sign", post(sign))
        .route("/mcp/execute", post(execute))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let facilitator = state.facilitator.health().await;
    let mut checks = vec![HealthCheck::facilitator(&facilitator)];
    checks.push(match &state.agent {
        Some(_) => HealthCheck::pass("agent_key"),
        None => HealthCheck::warn("agent_key", "no local agent key configured"),
    });

    let report = HealthReport::new(state.started.elapsed().as_secs(), facilitator, checks);
    Json(json!({"success": true, "data": report}))
}

async fn describe_key(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
) -> Result<Json<KeyRecord>, ApiError> {
    let Some(agent) = &state.agent else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "TAP_KEY_NOT_FOUND", "Key not found"));
    };
    agent.describe_key(&key_id).map(Json).map_err(|e| match e {
        BridgeError::UnsupportedAlgorithm(_) => {
            ApiError::new(StatusCode::BAD_REQUEST, "TAP_UNSUPPORTED_ALG", "Unsupported algorithm")
        }
        _ => ApiError::new(StatusCode::NOT_FOUND, "TAP_KEY_NOT_FOUND", "Key not found"),
    })
}

async fn sign(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let Some(agent) = &state.agent else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "TAP_SIGN_MISSING_KEYID", "Missing keyId (TAP_KEY_ID)"));
    };
    agent.sign(&request).map(Json).map_err(|e| match e {
        BridgeError::InvalidRequest(message) => {
            ApiError::new(StatusCode::BAD_REQUEST, "TAP_SIGN_INVALID_REQUEST", message)
        }
        BridgeError::UnsupportedAlgorithm(_) => {
            ApiError::new(StatusCode::BAD_REQUEST, "TAP_SIGN_UNSUPPORTED_ALG", "Unsupported algorithm")
        }
        other => ApiError::internal("TAP_SIGN_ERROR", &other),
    })
}

/// The URL the client addressed.
///
/// The authority comes from the request target when it carries one (HTTP/2
/// `:authority`, HTTP/1.1 absolute-form), otherwise from `Host`.
fn request_url(headers: &HeaderMap, uri: &Uri) -> String {
    let host = uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| headers.get(HOST).and_then(|v| v.to_str().ok()))
        .unwrap_or_default();
    let scheme = uri.scheme_str().unwrap_or("http");
    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    format!("{scheme}://{host}{path}")
}

#[instrument(skip_all, fields(uri = %uri))]
async fn execute(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Result<Response, ApiError> {
    let url = request_url(&headers, &uri);
    let outcome = state.verifier.verify(TapHeaders::from_header_map(&headers), &url, &state.keys).await;
    if let Some(failure) = outcome.failure() {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "TAP_VERIFICATION_FAILED", failure.to_string()));
    }

    let decision = state.policy.enforce(state.payment.amount).await;
    if !decision.allow {
        let reason = decision.reason.unwrap_or_else(|| "Policy denied".to_owned());
        return Err(ApiError::new(StatusCode::FORBIDDEN, "POLICY_DENIED", reason));
    }

    let request = payment_request(&state, &headers)?;
    let options = state.payment.verify_options();
    let verification = state.facilitator.verify_with_cancel(&request, &options, &state.shutdown).await;
    if !verification.is_valid {
        let message = verification.error.unwrap_or_else(|| "Invalid payment".to_owned());
        return Err(ApiError::payment_required("PAYMENT_VERIFICATION_FAILED", message, state.payment.accept_spec()));
    }
    let settlement = state.facilitator.settle_with_cancel(&request, &options, &state.shutdown).await;
    if !settlement.is_settled() {
        let message = settlement.error.unwrap_or_else(|| "Settlement failed".to_owned());
        return Err(ApiError::payment_required("PAYMENT_SETTLEMENT_FAILED", message, state.payment.accept_spec()));
    }

    let transaction = settlement.transaction_signature;
    let receipt = PaymentReceipt::from_request(&request, transaction.clone());
    let payment_commitment =
        compute_commitment_from_receipt(&receipt).map_err(|e| ApiError::internal("COMMITMENT_ERROR", &e))?;
    let commitments = Commitments { payment: Some(payment_commitment.clone()), tap: outcome.commitment().map(str::to_owned) };
    if inject_for_tools(&mut body, JOB_TOOLS, &commitments) {
        info!("commitments injected into tool call");
    }

    let upstream = state
        .upstream
        .post(&state.mcp_url)
        .header(ACCEPT, "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| proxy_error(&e))?;
    let status = upstream.status();
    let data: Value = upstream.json().await.map_err(|e| proxy_error(&e))?;

    let mut response_headers = payment_headers(&state, transaction.as_deref().unwrap_or_default(), &payment_commitment);
    policy_headers(&mut response_headers, &decision);
    Ok((status, response_headers, Json(data)).into_response())
}

/// Decodes `X-PAYMENT`, rejecting absent, malformed and expired payments with `402`.
fn payment_request(state: &AppState, headers: &HeaderMap) -> Result<PaymentRequestData, ApiError> {
    let accepts = || state.payment.accept_spec();
    let Some(value) = headers.get(PAYMENT_HEADER).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) else {
        return Err(ApiError::payment_required("PAYMENT_REQUIRED", "X-PAYMENT header is required", accepts()));
    };
    let request = PaymentRequestData::from_header(value)
        .map_err(|e| ApiError::payment_required("PAYMENT_INVALID", e.to_string(), accepts()))?;

    let now_secs = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    if request.payload.is_expired(now_secs) {
        return Err(ApiError::payment_required("PAYMENT_EXPIRED", "Payment request expired", accepts()));
    }
    Ok(request)
}

fn proxy_error(error: &reqwest::Error) -> ApiError {
    warn!(error = %error, "upstream MCP request failed");
    ApiError::new(StatusCode::BAD_GATEWAY, "MCP_PROXY_ERROR", error.to_string())
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn payment_headers(state: &AppState, transaction: &str, commitment: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, "x-payment-processed", "true");
    insert(&mut headers, "x-payment-network", state.payment.network().as_str());
    insert(&mut headers, "x-payment-asset", &state.payment.asset);
    insert(&mut headers, "x-payment-transaction", transaction);
    insert(&mut headers, "x-payment-commitment", commitment);
    headers
}

fn policy_headers(headers: &mut HeaderMap, decision: &PolicyDecision) {
    if let Some(price) = decision.price_ref {
        insert(headers, "x-policy-price", &price.normalize().to_string());
    }
    if let Some(usd) = decision.usd_amount {
        insert(headers, "x-policy-usd-amount", &format!("{:.2}", usd.round_dp(2)));
    }
}
