use std::sync::Arc;

use proptest::prelude::*;

use crate::{
    error::VerifyFailure,
    tap::{
        Algorithm, KeyRecord, ReplayGuard, RequestContext, SigningParameters, SigningSecret,
        StaticKeyResolver, TapHeaders, TapVerifier, VerifyOptions, build_signature_base,
        build_signature_input, params::unix_now_secs, parse_signature_input, sign, sign_tap,
    },
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn resolver_for(key_id: &str, secret: &SigningSecret) -> StaticKeyResolver {
    let mut resolver = StaticKeyResolver::new();
    resolver.insert(KeyRecord::from_material(key_id, &secret.public_key()).unwrap());
    resolver
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_signature_input_roundtrip(
        key_id in "[ -~]{1,48}",
        tag in "[ -~]{0,32}",
        nonce in "[ -~]{1,48}",
        created in 0u64..4_000_000_000,
        ttl in 1u32..86_400,
        rsa in any::<bool>(),
    ) {
        let algorithm = if rsa { Algorithm::RsaPssSha256 } else { Algorithm::Ed25519 };
        let params = SigningParameters::new("api.example.com", "/mcp", key_id.as_str(), algorithm)
            .with_tag(tag.as_str())
            .with_nonce(nonce.as_str())
            .with_created(created)
            .with_ttl_secs(ttl);

        let header = build_signature_input(&params);
        let parsed = parse_signature_input(&header).unwrap();

        prop_assert_eq!(parsed.key_id(), Some(key_id.as_str()));
        prop_assert_eq!(parsed.algorithm(), Some(algorithm.as_str()));
        prop_assert_eq!(parsed.nonce(), Some(nonce.as_str()));
        prop_assert_eq!(parsed.tag(), Some(tag.as_str()));
        prop_assert_eq!(parsed.created(), i64::try_from(created).ok());
        prop_assert_eq!(parsed.expires(), i64::try_from(created + u64::from(ttl)).ok());
        prop_assert_eq!(parsed.to_string(), header);
    }

    #[test]
    fn test_sign_verify_roundtrip(
        seed in any::<[u8; 32]>(),
        key_id in "[a-zA-Z0-9_-]{1,32}",
        host in "[a-z0-9]{1,20}\\.com",
        path in "/[a-z0-9/]{0,30}",
    ) {
        let secret = SigningSecret::ed25519_from_seed(&seed).unwrap();
        let resolver = resolver_for(&key_id, &secret);
        let verifier = TapVerifier::new(Arc::new(ReplayGuard::default()), VerifyOptions::default());

        let params = SigningParameters::new(host.as_str(), path.as_str(), key_id.as_str(), Algorithm::Ed25519)
            .with_created(unix_now_secs());
        let signed = sign_tap(&params, &secret).unwrap();
        let headers = TapHeaders::new(Some(signed.signature_input.as_str()), Some(signed.signature.as_str()));
        let url = format!("https://{host}{path}");

        let outcome = runtime().block_on(verifier.verify(headers, &url, &resolver));
        let verified = outcome.verified().cloned();
        prop_assert!(verified.is_some(), "verification failed: {:?}", outcome);
        prop_assert_eq!(verified.map(|v| v.commitment), Some(signed.commitment));
    }

    #[test]
    fn test_single_byte_tamper_rejected(
        seed in any::<[u8; 32]>(),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let secret = SigningSecret::ed25519_from_seed(&seed).unwrap();
        let public = secret.public_key();
        let ctx = RequestContext::new("api.example.com", "/mcp/execute");
        let params = SigningParameters::new("api.example.com", "/mcp/execute", "k1", Algorithm::Ed25519);
        let header = build_signature_input(&params);
        let base = build_signature_base(&["@authority", "@path"], &ctx, &header).unwrap();

        let signature = sign(&base, Algorithm::Ed25519, &secret).unwrap();
        let raw = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            crate::tap::unwrap_signature_header(&signature).unwrap(),
        )
        .unwrap();
        prop_assert!(public.verify(base.as_bytes(), &raw));

        let mut tampered_base = base.clone().into_bytes();
        let i = index.index(tampered_base.len());
        tampered_base[i] ^= flip;
        prop_assert!(!public.verify(&tampered_base, &raw));

        let mut tampered_sig = raw.clone();
        let j = index.index(tampered_sig.len());
        tampered_sig[j] ^= flip;
        prop_assert!(!public.verify(base.as_bytes(), &tampered_sig));
    }

    #[test]
    fn test_altered_component_list_rejected(seed in any::<[u8; 32]>()) {
        let secret = SigningSecret::ed25519_from_seed(&seed).unwrap();
        let resolver = resolver_for("k1", &secret);
        let verifier = TapVerifier::new(Arc::new(ReplayGuard::default()), VerifyOptions::default());

        let params = SigningParameters::new("api.example.com", "/mcp/execute", "k1", Algorithm::Ed25519)
            .with_created(unix_now_secs());
        let signed = sign_tap(&params, &secret).unwrap();
        let altered = signed
            .signature_input
            .replacen("(\"@authority\" \"@path\")", "(\"@path\" \"@authority\")", 1);
        let headers = TapHeaders::new(Some(altered.as_str()), Some(signed.signature.as_str()));

        let outcome = runtime().block_on(
            verifier.verify(headers, "https://api.example.com/mcp/execute", &resolver),
        );
        prop_assert_eq!(outcome.failure(), Some(&VerifyFailure::SignatureInvalid));
    }
}
