//! Public key material and key resolution.
//!
//! The key registry is an external collaborator. The verifier only needs a
//! [`KeyResolver`] that maps a `keyId` to an optional [`KeyInfo`]. Three resolvers are
//! provided: a static map (typically from `TAP_KEYS_JSON`), an HTTP registry client and a
//! chain of the two.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::{collections::HashMap, sync::Arc, time::Duration};

use base64::Engine as _;
use ed25519_dalek::VerifyingKey;
use reqwest::Client;
use rsa::{
    Pss, RsaPublicKey,
    pkcs1::DecodeRsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding},
    traits::PublicKeyParts,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{
    error::{BridgeError, Result},
    tap::Algorithm,
};

/// Length of an Ed25519 public key in bytes.
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// SHA-256 output length, the PSS hash length.
const SHA256_LEN: usize = 32;

/// Public key for one of the supported algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Ed25519 verifying key.
    Ed25519(VerifyingKey),
    /// RSA public key for RSASSA-PSS/SHA-256.
    RsaPssSha256(Box<RsaPublicKey>),
}

impl KeyMaterial {
    /// Decodes a public key in the registry encoding for `algorithm`: base64 of the raw
    /// 32 bytes for Ed25519, SPKI PEM (PKCS#1 PEM accepted) for RSA.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidKeyMaterial`] if the encoding is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use tap_x402::tap::{Algorithm, KeyMaterial};
    ///
    /// let encoded = "11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";
    /// let key = KeyMaterial::decode(Algorithm::Ed25519, encoded)?;
    /// assert_eq!(key.algorithm(), Algorithm::Ed25519);
    /// assert_eq!(key.encode()?, encoded);
    /// # Ok::<(), tap_x402::BridgeError>(())
    /// ```
    pub fn decode(algorithm: Algorithm, encoded: &str) -> Result<Self> {
        match algorithm {
            Algorithm::Ed25519 => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| BridgeError::InvalidKeyMaterial(format!("ed25519 public key base64: {e}")))?;
                let bytes: [u8; ED25519_PUBLIC_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                    BridgeError::InvalidKeyMaterial(format!(
                        "ed25519 public key must be {ED25519_PUBLIC_KEY_LEN} bytes, got {}",
                        bytes.len()
                    ))
                })?;
                let key = VerifyingKey::from_bytes(&bytes)
                    .map_err(|e| BridgeError::InvalidKeyMaterial(format!("ed25519 public key: {e}")))?;
                Ok(Self::Ed25519(key))
            }
            Algorithm::RsaPssSha256 => {
                let pem = normalize_pem(encoded);
                let key = RsaPublicKey::from_public_key_pem(&pem)
                    .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
                    .map_err(|e| BridgeError::InvalidKeyMaterial(format!("rsa public key: {e}")))?;
                Ok(Self::RsaPssSha256(Box::new(key)))
            }
        }
    }

    /// Encodes the key the way [`decode`](Self::decode) expects it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidKeyMaterial`] if PEM encoding fails.
    pub fn encode(&self) -> Result<String> {
        match self {
            Self::Ed25519(key) => Ok(base64::engine::general_purpose::STANDARD.encode(key.as_bytes())),
            Self::RsaPssSha256(key) => key
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| BridgeError::InvalidKeyMaterial(format!("rsa public key pem: {e}"))),
        }
    }

    /// Algorithm this key verifies.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        match self {
            Self::Ed25519(_) => Algorithm::Ed25519,
            Self::RsaPssSha256(_) => Algorithm::RsaPssSha256,
        }
    }

    /// Verifies a raw signature over `message`.
    ///
    /// Ed25519 requires an exact 64-byte signature and uses strict verification.
    /// RSA-PSS expects SHA-256 and MGF1-SHA256, with either the maximum salt length or a
    /// salt as long as the digest.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Ed25519(key) => {
                if signature.len() != ED25519_SIGNATURE_LEN {
                    return false;
                }
                ed25519_dalek::Signature::from_slice(signature)
                    .is_ok_and(|sig| key.verify_strict(message, &sig).is_ok())
            }
            Self::RsaPssSha256(key) => {
                let digest = Sha256::digest(message);
                let max_salt = Pss::new_with_salt::<Sha256>(pss_max_salt_len(&**key));
                key.verify(max_salt, &digest, signature).is_ok()
                    || key.verify(Pss::new::<Sha256>(), &digest, signature).is_ok()
            }
        }
    }
}

/// A key as seen by the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Registry identifier.
    pub key_id: String,
    /// Decoded public key. Its variant is the key's declared algorithm.
    pub material: KeyMaterial,
    /// Inactive keys are rejected before any cryptography runs.
    pub is_active: bool,
}

impl KeyInfo {
    /// Declared algorithm of the key.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.material.algorithm()
    }
}

/// Registry wire record served at `GET /tap/keys/:keyId`.
///
/// `is_active` is the string `"true"` or `"false"`; anything other than `"true"` marks
/// the key inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Registry identifier.
    #[serde(default)]
    pub key_id: String,
    /// `"true"` or `"false"`.
    #[serde(default = "default_is_active")]
    pub is_active: String,
    /// Encoded public key (see [`KeyMaterial::decode`]).
    pub public_key: String,
    /// Algorithm name.
    pub algorithm: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_is_active() -> String {
    "true".to_owned()
}

impl KeyRecord {
    /// Builds a record for an active key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be encoded.
    pub fn from_material(key_id: &str, material: &KeyMaterial) -> Result<Self> {
        Ok(Self {
            key_id: key_id.to_owned(),
            is_active: default_is_active(),
            public_key: material.encode()?,
            algorithm: material.algorithm().as_str().to_owned(),
            description: None,
        })
    }

    /// Decodes the record.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnsupportedAlgorithm`] for an unknown algorithm name and
    /// [`BridgeError::InvalidKeyMaterial`] if the public key does not decode.
    pub fn to_key_info(&self) -> Result<KeyInfo> {
        let algorithm: Algorithm = self.algorithm.parse()?;
        Ok(KeyInfo {
            key_id: self.key_id.clone(),
            material: KeyMaterial::decode(algorithm, &self.public_key)?,
            is_active: self.is_active.trim().eq_ignore_ascii_case("true"),
        })
    }
}

/// Resolves a key id to key information.
///
/// `Ok(None)` means the key is unknown. An `Err` means the key exists but cannot be used
/// (unknown algorithm, undecodable public key) or the lookup failed.
pub trait KeyResolver: Send + Sync {
    /// Looks up `key_id`.
    fn resolve(&self, key_id: &str) -> impl Future<Output = Result<Option<KeyInfo>>> + Send;
}

impl<R: KeyResolver> KeyResolver for Arc<R> {
    fn resolve(&self, key_id: &str) -> impl Future<Output = Result<Option<KeyInfo>>> + Send {
        (**self).resolve(key_id)
    }
}

/// In-memory key map.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, KeyRecord>,
}

impl StaticKeyResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `TAP_KEYS_JSON`-style map:
    /// `{"<keyId>": {"public_key": "...", "algorithm": "...", "is_active": "true"}}`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] if the JSON does not have that shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use tap_x402::tap::StaticKeyResolver;
    ///
    /// let resolver = StaticKeyResolver::from_json(
    ///     r#"{"k1": {"public_key": "11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=", "algorithm": "ed25519"}}"#,
    /// )?;
    /// assert_eq!(resolver.len(), 1);
    /// # Ok::<(), tap_x402::BridgeError>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let map: HashMap<String, KeyRecord> = serde_json::from_str(json)
            .map_err(|e| BridgeError::ConfigError(format!("invalid key map: {e}")))?;
        Ok(Self::from_records(map))
    }

    /// Builds a resolver from records keyed by key id.
    #[must_use]
    pub fn from_records(records: HashMap<String, KeyRecord>) -> Self {
        let keys = records
            .into_iter()
            .map(|(key_id, mut record)| {
                record.key_id.clone_from(&key_id);
                (key_id, record)
            })
            .collect();
        Self { keys }
    }

    /// Adds or replaces a key.
    pub fn insert(&mut self, record: KeyRecord) {
        self.keys.insert(record.key_id.clone(), record);
    }

    /// Raw record for `key_id`.
    #[must_use]
    pub fn record(&self, key_id: &str) -> Option<&KeyRecord> {
        self.keys.get(key_id)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no keys are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn lookup(&self, key_id: &str) -> Result<Option<KeyInfo>> {
        self.keys.get(key_id).map(KeyRecord::to_key_info).transpose()
    }
}

impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, key_id: &str) -> Result<Option<KeyInfo>> {
        self.lookup(key_id)
    }
}

/// Client for a remote key registry serving `GET {base}/tap/keys/{keyId}`.
///
/// Non-success statuses and transport failures resolve to "not found".
#[derive(Debug, Clone)]
pub struct HttpKeyResolver {
    client: Client,
    base_url: String,
}

impl HttpKeyResolver {
    /// Default per-lookup timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a resolver for the registry at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HttpError`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Self::DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates a resolver sharing an existing client.
    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_owned() }
    }

    fn key_url(&self, key_id: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| BridgeError::ConfigError(format!("invalid registry url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| BridgeError::ConfigError("registry url cannot be a base".to_owned()))?
            .pop_if_empty()
            .extend(["tap", "keys", key_id]);
        Ok(url)
    }
}

impl KeyResolver for HttpKeyResolver {
    #[instrument(skip(self), fields(registry = %self.base_url))]
    async fn resolve(&self, key_id: &str) -> Result<Option<KeyInfo>> {
        let url = self.key_url(key_id)?;
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "key registry unreachable");
                return Ok(None);
            }
        };
        if !response.status().is_success() {
            debug!(status = %response.status(), "key registry returned no key");
            return Ok(None);
        }
        let mut record: KeyRecord = match response.json().await {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "key registry returned an unreadable record");
                return Ok(None);
            }
        };
        if record.key_id.is_empty() {
            key_id.clone_into(&mut record.key_id);
        }
        record.to_key_info().map(Some)
    }
}

/// Tries `primary` first and falls back to `fallback` when the key is unknown there.
#[derive(Debug, Clone)]
pub struct ChainedKeyResolver<A, B> {
    primary: A,
    fallback: B,
}

impl<A, B> ChainedKeyResolver<A, B> {
    /// Chains two resolvers.
    pub const fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<A: KeyResolver, B: KeyResolver> KeyResolver for ChainedKeyResolver<A, B> {
    async fn resolve(&self, key_id: &str) -> Result<Option<KeyInfo>> {
        match self.primary.resolve(key_id).await? {
            Some(info) => Ok(Some(info)),
            None => self.fallback.resolve(key_id).await,
        }
    }
}

impl<R: KeyResolver> KeyResolver for Option<R> {
    async fn resolve(&self, key_id: &str) -> Result<Option<KeyInfo>> {
        match self {
            Some(resolver) => resolver.resolve(key_id).await,
            None => Ok(None),
        }
    }
}

/// Normalises PEM text passed through environment variables: literal `\n` becomes a
/// newline and surrounding whitespace is trimmed.
pub(crate) fn normalize_pem(pem: &str) -> String {
    pem.trim().replace("\\n", "\n")
}

/// Maximum PSS salt length for `key`: `ceil((modBits - 1) / 8) - hLen - 2`.
pub(crate) fn pss_max_salt_len<K: PublicKeyParts>(key: &K) -> usize {
    let em_len = key.n().bits().saturating_sub(1).div_ceil(8);
    em_len.saturating_sub(SHA256_LEN + 2)
}
