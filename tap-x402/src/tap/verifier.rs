//! TAP signature verification.
//!
//! Checks run cheapest first: header structure, timestamps and the replay guard come
//! before key resolution and public-key cryptography. The nonce is recorded before the
//! signature is checked, so reusing a nonce is rejected even if the first attempt failed.

use std::sync::Arc;

use base64::Engine as _;
use reqwest::header::HeaderMap;
use serde::{Serialize, Serializer, ser::SerializeStruct};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    audit,
    commitment::tap_commitment,
    error::{BridgeError, VerifyFailure},
    security::AuditEventType,
    tap::{
        Algorithm, KeyResolver, ReplayGuard, RequestContext, build_signature_base,
        params::{COMPONENT_AUTHORITY, COMPONENT_PATH},
        parse_signature_input, unwrap_signature_header,
    },
};

/// Default tolerance for `created` lying in the future.
pub const DEFAULT_MAX_SKEW_SECS: u64 = 60;

/// Header name carrying the signature parameters.
pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";

/// Header name carrying the signature.
pub const SIGNATURE_HEADER: &str = "signature";

/// Verifier policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Reject requests that carry no TAP headers at all.
    pub required: bool,
    /// Allowed clock skew for `created`, in seconds.
    pub max_skew_secs: u64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { required: false, max_skew_secs: DEFAULT_MAX_SKEW_SECS }
    }
}

/// The two TAP headers as received. Empty values count as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TapHeaders<'a> {
    /// `Signature-Input` value.
    pub signature_input: Option<&'a str>,
    /// `Signature` value.
    pub signature: Option<&'a str>,
}

impl<'a> TapHeaders<'a> {
    /// Wraps explicit header values.
    #[must_use]
    pub fn new(signature_input: Option<&'a str>, signature: Option<&'a str>) -> Self {
        Self {
            signature_input: signature_input.filter(|v| !v.trim().is_empty()),
            signature: signature.filter(|v| !v.trim().is_empty()),
        }
    }

    /// Reads both headers from an HTTP header map. Non-UTF-8 values count as absent.
    #[must_use]
    pub fn from_header_map(headers: &'a HeaderMap) -> Self {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self::new(get(SIGNATURE_INPUT_HEADER), get(SIGNATURE_HEADER))
    }

    const fn is_empty(&self) -> bool {
        self.signature_input.is_none() && self.signature.is_none()
    }
}

/// Accepted signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// `sha256_hex(signature_input + "|" + signature)` over the received headers.
    pub commitment: String,
    /// Key that produced the signature.
    pub key_id: String,
    /// Algorithm used for verification.
    pub algorithm: Algorithm,
}

/// Result of verifying one request. Never an error: callers branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Signature accepted.
    Verified(VerifiedSignature),
    /// No TAP headers and signatures are optional.
    Skipped,
    /// Signature rejected.
    Rejected(VerifyFailure),
}

impl VerificationOutcome {
    /// Returns `true` unless the request was rejected.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// Accepted signature, if any.
    #[must_use]
    pub const fn verified(&self) -> Option<&VerifiedSignature> {
        match self {
            Self::Verified(v) => Some(v),
            Self::Skipped | Self::Rejected(_) => None,
        }
    }

    /// TAP commitment of an accepted signature.
    #[must_use]
    pub fn commitment(&self) -> Option<&str> {
        self.verified().map(|v| v.commitment.as_str())
    }

    /// Rejection reason, if rejected.
    #[must_use]
    pub const fn failure(&self) -> Option<&VerifyFailure> {
        match self {
            Self::Rejected(failure) => Some(failure),
            Self::Verified(_) | Self::Skipped => None,
        }
    }
}

/// Serialises as `{"ok": true, "commitment", "keyId", "algorithm"}`, `{"ok": true}` or
/// `{"ok": false, "reason"}`.
impl Serialize for VerificationOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Verified(v) => {
                let mut s = serializer.serialize_struct("VerificationOutcome", 4)?;
                s.serialize_field("ok", &true)?;
                s.serialize_field("commitment", &v.commitment)?;
                s.serialize_field("keyId", &v.key_id)?;
                s.serialize_field("algorithm", &v.algorithm)?;
                s.end()
            }
            Self::Skipped => {
                let mut s = serializer.serialize_struct("VerificationOutcome", 1)?;
                s.serialize_field("ok", &true)?;
                s.end()
            }
            Self::Rejected(failure) => {
                let mut s = serializer.serialize_struct("VerificationOutcome", 2)?;
                s.serialize_field("ok", &false)?;
                s.serialize_field("reason", &failure.to_string())?;
                s.end()
            }
        }
    }
}

/// Verifies TAP signatures against a shared replay guard.
///
/// Clones share the same guard.
#[derive(Debug, Clone)]
pub struct TapVerifier {
    guard: Arc<ReplayGuard>,
    options: VerifyOptions,
}

impl TapVerifier {
    /// Creates a verifier.
    #[must_use]
    pub const fn new(guard: Arc<ReplayGuard>, options: VerifyOptions) -> Self {
        Self { guard, options }
    }

    /// Replay guard used by this verifier.
    #[must_use]
    pub const fn guard(&self) -> &Arc<ReplayGuard> {
        &self.guard
    }

    /// Verifier policy.
    #[must_use]
    pub const fn options(&self) -> VerifyOptions {
        self.options
    }

    /// Verifies the TAP headers of a request to `request_url`.
    ///
    /// Authority and path are taken from `request_url` only. The key is looked up through
    /// `resolver` after all structural, temporal and replay checks have passed.
    #[instrument(skip(self, headers, resolver))]
    pub async fn verify<R: KeyResolver>(
        &self,
        headers: TapHeaders<'_>,
        request_url: &str,
        resolver: &R,
    ) -> VerificationOutcome {
        if headers.is_empty() {
            return if self.options.required {
                Self::reject(VerifyFailure::MissingHeaders, None, None)
            } else {
                debug!("no TAP headers, verification skipped");
                VerificationOutcome::Skipped
            };
        }

        let mut key_id = None;
        let mut nonce = None;
        match self.run(headers, request_url, resolver, &mut key_id, &mut nonce).await {
            Ok(verified) => {
                audit!(
                    AuditEventType::SignatureVerified,
                    verified.key_id.as_str(),
                    Uuid::new_v4(),
                    with_nonce(nonce.unwrap_or_default()),
                    with_algorithm(verified.algorithm.as_str()),
                    with_reference(&verified.commitment)
                );
                VerificationOutcome::Verified(verified)
            }
            Err(failure) => Self::reject(failure, key_id, nonce),
        }
    }

    async fn run<R: KeyResolver>(
        &self,
        headers: TapHeaders<'_>,
        request_url: &str,
        resolver: &R,
        key_id_out: &mut Option<String>,
        nonce_out: &mut Option<String>,
    ) -> Result<VerifiedSignature, VerifyFailure> {
        let input_header = headers.signature_input.ok_or(VerifyFailure::MalformedHeader)?;
        let parsed = parse_signature_input(input_header).map_err(|e| {
            debug!(error = %e, "unparsable signature-input");
            VerifyFailure::MalformedHeader
        })?;
        *key_id_out = parsed.key_id().map(str::to_owned);

        if !parsed.covers(COMPONENT_AUTHORITY) || !parsed.covers(COMPONENT_PATH) {
            return Err(VerifyFailure::MalformedHeader);
        }
        let created = parsed.created().ok_or(VerifyFailure::MalformedHeader)?;

        let now = i64::try_from(self.guard.now_ms() / 1000).unwrap_or(i64::MAX);
        let skew = i64::try_from(self.options.max_skew_secs).unwrap_or(i64::MAX);
        if created > now.saturating_add(skew) {
            return Err(VerifyFailure::ClockSkew);
        }
        if parsed.expires().is_some_and(|expires| expires < now) {
            return Err(VerifyFailure::Expired);
        }

        let nonce = parsed.nonce().filter(|n| !n.is_empty()).ok_or(VerifyFailure::MissingNonce)?;
        *nonce_out = Some(nonce.to_owned());
        if !self.guard.check_and_insert(nonce) {
            return Err(VerifyFailure::ReplayDetected);
        }

        let ctx = RequestContext::from_url(request_url).map_err(|_| VerifyFailure::InvalidRequestUrl)?;
        let base = build_signature_base(&parsed.components, &ctx, input_header)
            .map_err(|_| VerifyFailure::InvalidRequestUrl)?;

        let signature_header = headers.signature.ok_or(VerifyFailure::MalformedSignature)?;
        let raw_signature = unwrap_signature_header(signature_header)
            .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
            .ok_or(VerifyFailure::MalformedSignature)?;

        let key_id = parsed.key_id().filter(|k| !k.is_empty()).ok_or(VerifyFailure::KeyNotFound)?;
        let key = match resolver.resolve(key_id).await {
            Ok(Some(key)) => key,
            Ok(None) => return Err(VerifyFailure::KeyNotFound),
            Err(BridgeError::UnsupportedAlgorithm(name)) => {
                return Err(VerifyFailure::UnsupportedAlgorithm(name.to_ascii_lowercase()));
            }
            Err(BridgeError::InvalidKeyMaterial(reason)) => {
                warn!(key_id, %reason, "registered key material does not decode");
                return Err(VerifyFailure::SignatureInvalid);
            }
            Err(e) => {
                debug!(key_id, error = %e, "key lookup failed");
                return Err(VerifyFailure::KeyNotFound);
            }
        };
        if !key.is_active {
            return Err(VerifyFailure::KeyInactive);
        }

        let algorithm = match parsed.algorithm() {
            Some(claimed) => {
                let claimed: Algorithm = claimed
                    .parse()
                    .map_err(|_| VerifyFailure::UnsupportedAlgorithm(claimed.trim().to_ascii_lowercase()))?;
                if claimed != key.algorithm() {
                    debug!(%claimed, declared = %key.algorithm(), "claimed algorithm does not match key");
                    return Err(VerifyFailure::SignatureInvalid);
                }
                claimed
            }
            None => key.algorithm(),
        };

        if !key.material.verify(base.as_bytes(), &raw_signature) {
            return Err(VerifyFailure::SignatureInvalid);
        }

        Ok(VerifiedSignature {
            commitment: tap_commitment(input_header, signature_header),
            key_id: key_id.to_owned(),
            algorithm,
        })
    }

    fn reject(
        failure: VerifyFailure,
        key_id: Option<String>,
        nonce: Option<String>,
    ) -> VerificationOutcome {
        let event_type = match failure {
            VerifyFailure::ReplayDetected => AuditEventType::ReplayDetected,
            VerifyFailure::SignatureInvalid => AuditEventType::ForgeryAttempt,
            _ => AuditEventType::VerificationRejected,
        };
        if failure.is_security_event() {
            warn!(code = failure.code(), reason = %failure, "TAP security event");
        } else {
            debug!(code = failure.code(), reason = %failure, "TAP verification rejected");
        }
        audit!(
            event_type,
            key_id.unwrap_or_else(|| "-".to_owned()),
            Uuid::new_v4(),
            with_nonce(nonce.unwrap_or_default()),
            with_reason(failure.to_string())
        );
        VerificationOutcome::Rejected(failure)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tap::{
        KeyRecord, ManualClock, SigningParameters, SigningSecret, StaticKeyResolver, sign_tap,
    };

    const NOW_SECS: u64 = 1_700_000_000;
    const URL: &str = "https://api.example.com/mcp/execute";

    struct Fixture {
        clock: Arc<ManualClock>,
        verifier: TapVerifier,
        resolver: StaticKeyResolver,
        secret: SigningSecret,
    }

    fn fixture(options: VerifyOptions) -> Fixture {
        let clock = Arc::new(ManualClock::new(NOW_SECS * 1000));
        let guard = Arc::new(ReplayGuard::with_clock(Duration::from_secs(3600), clock.clone()));
        let secret = SigningSecret::ed25519_from_seed(&[11u8; 32]).unwrap();
        let mut resolver = StaticKeyResolver::new();
        resolver.insert(KeyRecord::from_material("k1", &secret.public_key()).unwrap());
        Fixture { clock, verifier: TapVerifier::new(guard, options), resolver, secret }
    }

    fn params() -> SigningParameters {
        SigningParameters::new("api.example.com", "/mcp/execute", "k1", Algorithm::Ed25519)
            .with_created(NOW_SECS)
    }

    async fn verify(f: &Fixture, input: &str, signature: &str, url: &str) -> VerificationOutcome {
        f.verifier.verify(TapHeaders::new(Some(input), Some(signature)), url, &f.resolver).await
    }

    fn rejected(outcome: &VerificationOutcome) -> VerifyFailure {
        outcome.failure().cloned().unwrap_or_else(|| panic!("expected rejection, got {outcome:?}"))
    }

    #[tokio::test]
    async fn test_valid_signature_verifies() {
        let f = fixture(VerifyOptions::default());
        let signed = sign_tap(&params(), &f.secret).unwrap();
        let outcome = verify(&f, &signed.signature_input, &signed.signature, URL).await;

        let verified = outcome.verified().unwrap();
        assert_eq!(verified.key_id, "k1");
        assert_eq!(verified.algorithm, Algorithm::Ed25519);
        assert_eq!(verified.commitment, signed.commitment);
    }

    #[tokio::test]
    async fn test_missing_headers() {
        let optional = fixture(VerifyOptions::default());
        let outcome = optional.verifier.verify(TapHeaders::default(), URL, &optional.resolver).await;
        assert_eq!(outcome, VerificationOutcome::Skipped);

        let required = fixture(VerifyOptions { required: true, ..VerifyOptions::default() });
        let outcome = required
            .verifier
            .verify(TapHeaders::new(Some(""), None), URL, &required.resolver)
            .await;
        assert_eq!(rejected(&outcome), VerifyFailure::MissingHeaders);
    }

    #[tokio::test]
    async fn test_malformed_header() {
        let f = fixture(VerifyOptions::default());
        let outcome = verify(&f, "sig1=(\"@path\"); created=1", "sig2=:AA==:", URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::MalformedHeader);
    }

    #[tokio::test]
    async fn test_component_list_must_cover_authority_and_path() {
        let f = fixture(VerifyOptions::default());
        let header = format!("sig2=(\"@path\"); created={NOW_SECS}; nonce=\"n\"; keyId=\"k1\"");
        let outcome = verify(&f, &header, "sig2=:AA==:", URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::MalformedHeader);
    }

    #[tokio::test]
    async fn test_clock_skew_and_expiry() {
        let f = fixture(VerifyOptions::default());

        let future = sign_tap(&params().with_created(NOW_SECS + 120), &f.secret).unwrap();
        let outcome = verify(&f, &future.signature_input, &future.signature, URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::ClockSkew);

        let expired = sign_tap(&params().with_created(NOW_SECS - 10).with_expires(NOW_SECS - 1), &f.secret)
            .unwrap();
        let outcome = verify(&f, &expired.signature_input, &expired.signature, URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::Expired);

        let fresh = sign_tap(&params().with_created(NOW_SECS - 10).with_expires(NOW_SECS + 1), &f.secret)
            .unwrap();
        let outcome = verify(&f, &fresh.signature_input, &fresh.signature, URL).await;
        assert!(outcome.verified().is_some());
    }

    #[tokio::test]
    async fn test_skew_within_tolerance_is_accepted() {
        let f = fixture(VerifyOptions::default());
        let signed = sign_tap(&params().with_created(NOW_SECS + 59), &f.secret).unwrap();
        assert!(verify(&f, &signed.signature_input, &signed.signature, URL).await.verified().is_some());
    }

    #[tokio::test]
    async fn test_missing_nonce() {
        let f = fixture(VerifyOptions::default());
        let header = format!("sig2=(\"@authority\" \"@path\"); created={NOW_SECS}; keyId=\"k1\"");
        let outcome = verify(&f, &header, "sig2=:AA==:", URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::MissingNonce);
    }

    #[tokio::test]
    async fn test_replay_detected_even_after_failed_first_attempt() {
        let f = fixture(VerifyOptions::default());
        let signed = sign_tap(&params(), &f.secret).unwrap();

        let outcome = verify(&f, &signed.signature_input, "sig2=:AAAA:", URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::SignatureInvalid);

        let outcome = verify(&f, &signed.signature_input, &signed.signature, URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::ReplayDetected);
    }

    #[tokio::test]
    async fn test_authority_comes_from_request_url() {
        let f = fixture(VerifyOptions::default());
        let signed = sign_tap(&params(), &f.secret).unwrap();
        let outcome =
            verify(&f, &signed.signature_input, &signed.signature, "https://evil.example.com/mcp/execute").await;
        assert_eq!(rejected(&outcome), VerifyFailure::SignatureInvalid);
    }

    #[tokio::test]
    async fn test_invalid_request_url() {
        let f = fixture(VerifyOptions::default());
        let signed = sign_tap(&params(), &f.secret).unwrap();
        let outcome = verify(&f, &signed.signature_input, &signed.signature, "/mcp/execute").await;
        assert_eq!(rejected(&outcome), VerifyFailure::InvalidRequestUrl);
    }

    #[tokio::test]
    async fn test_malformed_signature_wrapper() {
        let f = fixture(VerifyOptions::default());
        let signed = sign_tap(&params(), &f.secret).unwrap();
        let bare = signed.signature.trim_start_matches("sig2=:").trim_end_matches(':');
        let outcome = verify(&f, &signed.signature_input, bare, URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::MalformedSignature);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_keys() {
        let mut f = fixture(VerifyOptions::default());
        let unknown = sign_tap(
            &SigningParameters { key_id: "nobody".to_owned(), ..params() },
            &f.secret,
        )
        .unwrap();
        let outcome = verify(&f, &unknown.signature_input, &unknown.signature, URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::KeyNotFound);

        let mut record = KeyRecord::from_material("k1", &f.secret.public_key()).unwrap();
        record.is_active = "false".to_owned();
        f.resolver.insert(record);
        let signed = sign_tap(&params(), &f.secret).unwrap();
        let outcome = verify(&f, &signed.signature_input, &signed.signature, URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::KeyInactive);
    }

    #[tokio::test]
    async fn test_unsupported_claimed_algorithm() {
        let f = fixture(VerifyOptions::default());
        let header = format!(
            "sig2=(\"@authority\" \"@path\"); created={NOW_SECS}; keyId=\"k1\"; alg=\"HMAC-SHA256\"; nonce=\"n9\""
        );
        let outcome = verify(&f, &header, "sig2=:AA==:", URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::UnsupportedAlgorithm("hmac-sha256".to_owned()));
    }

    #[tokio::test]
    async fn test_claimed_algorithm_must_match_key() {
        let f = fixture(VerifyOptions::default());
        let mut claimed_rsa = params();
        claimed_rsa.algorithm = Algorithm::RsaPssSha256;
        let input = crate::tap::build_signature_input(&claimed_rsa);
        let outcome = verify(&f, &input, "sig2=:AA==:", URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::SignatureInvalid);
    }

    #[tokio::test]
    async fn test_clock_drives_expiry() {
        let f = fixture(VerifyOptions::default());
        let signed = sign_tap(&params(), &f.secret).unwrap();
        f.clock.advance(Duration::from_secs(301));
        let outcome = verify(&f, &signed.signature_input, &signed.signature, URL).await;
        assert_eq!(rejected(&outcome), VerifyFailure::Expired);
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = VerificationOutcome::Verified(VerifiedSignature {
            commitment: "c".to_owned(),
            key_id: "k1".to_owned(),
            algorithm: Algorithm::Ed25519,
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"ok": true, "commitment": "c", "keyId": "k1", "algorithm": "ed25519"})
        );
        let rejected = VerificationOutcome::Rejected(VerifyFailure::ReplayDetected);
        assert_eq!(
            serde_json::to_value(&rejected).unwrap(),
            serde_json::json!({"ok": false, "reason": "Replay detected"})
        );
    }

    #[test]
    fn test_headers_from_map() {
        let mut map = HeaderMap::new();
        map.insert(SIGNATURE_INPUT_HEADER, "sig2=(\"@path\")".parse().unwrap());
        let headers = TapHeaders::from_header_map(&map);
        assert_eq!(headers.signature_input, Some("sig2=(\"@path\")"));
        assert_eq!(headers.signature, None);
    }
}
