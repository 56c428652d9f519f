//! Local agent registry.
//!
//! [`LocalAgent`] backs the two registry endpoints without tying them to an HTTP
//! framework:
//!
//! - `GET /tap/keys/:keyId` → [`LocalAgent::describe_key`]
//! - `POST /tap/sign` → [`LocalAgent::sign`]
//!
//! It also resolves its own key, so a gateway can verify requests signed by its
//! co-located agent.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    config::AgentConfig,
    error::{BridgeError, Result},
    tap::{
        Algorithm, KeyInfo, KeyMaterial, KeyRecord, KeyResolver, RequestContext, TapSigner,
        params::{DEFAULT_TAG, DEFAULT_TTL_SECS},
    },
};

/// Description published for the local key.
pub const LOCAL_KEY_DESCRIPTION: &str = "Local TAP Agent key";

/// Body of `POST /tap/sign`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    /// Full request URL, source of both authority and path when either is missing.
    #[serde(default)]
    pub url: Option<String>,
    /// Request authority.
    #[serde(default)]
    pub authority: Option<String>,
    /// Request path with query.
    #[serde(default)]
    pub path: Option<String>,
    /// Key id; must name the agent's key when set.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Algorithm; must match the agent's key when set.
    #[serde(default)]
    pub alg: Option<String>,
    /// Signature lifetime in seconds.
    #[serde(default = "default_ttl_sec")]
    pub ttl_sec: u32,
    /// Interaction tag.
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Caller-chosen nonce.
    #[serde(default)]
    pub nonce: Option<String>,
}

fn default_ttl_sec() -> u32 {
    DEFAULT_TTL_SECS
}

fn default_tag() -> String {
    DEFAULT_TAG.to_owned()
}

/// Response of `POST /tap/sign`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    /// `Signature-Input` header value.
    pub signature_input: String,
    /// `Signature` header value.
    pub signature: String,
    /// Authority that was signed.
    pub authority: String,
    /// Path that was signed.
    pub path: String,
    /// `sha256_hex(signature_input + "|" + signature)`.
    pub commitment: String,
}

/// The agent key held by this process.
#[derive(Debug)]
pub struct LocalAgent {
    key_id: String,
    algorithm: Algorithm,
    public_key: String,
    signer: Option<TapSigner>,
}

impl LocalAgent {
    /// Creates an agent that can sign.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidKeyMaterial`] if the public key cannot be encoded.
    pub fn new(signer: TapSigner) -> Result<Self> {
        Ok(Self {
            key_id: signer.key_id().to_owned(),
            algorithm: signer.algorithm(),
            public_key: signer.public_key().encode()?,
            signer: Some(signer),
        })
    }

    /// Creates an agent that only publishes its public key.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidKeyMaterial`] if `public_key` does not decode.
    pub fn publish_only(key_id: &str, algorithm: Algorithm, public_key: &str) -> Result<Self> {
        let material = KeyMaterial::decode(algorithm, public_key)?;
        Ok(Self { key_id: key_id.to_owned(), algorithm, public_key: material.encode()?, signer: None })
    }

    /// Builds the agent described by `config`, or `None` when no key id and algorithm
    /// are configured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] if a key id and algorithm are set but no
    /// key is, and key decoding errors otherwise.
    pub fn from_config(config: &AgentConfig) -> Result<Option<Self>> {
        let (Some(key_id), Some(algorithm)) = (config.key_id.as_deref(), config.algorithm()?) else {
            return Ok(None);
        };
        if let Some(secret) = config.signing_secret()? {
            return Self::new(TapSigner::new(key_id, secret)).map(Some);
        }
        match config.public_key.as_deref() {
            Some(public_key) => Self::publish_only(key_id, algorithm, public_key).map(Some),
            None => Err(BridgeError::ConfigError(format!("agent {key_id} has neither secret nor public key"))),
        }
    }

    /// Key id.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Key algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Registry record for `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::KeyNotFound`] unless `key_id` is the agent's key.
    pub fn describe_key(&self, key_id: &str) -> Result<KeyRecord> {
        if key_id != self.key_id {
            return Err(BridgeError::KeyNotFound(key_id.to_owned()));
        }
        Ok(KeyRecord {
            key_id: self.key_id.clone(),
            is_active: "true".to_owned(),
            public_key: self.public_key.clone(),
            algorithm: self.algorithm.as_str().to_owned(),
            description: Some(LOCAL_KEY_DESCRIPTION.to_owned()),
        })
    }

    /// Signs the authority and path named by `request`.
    ///
    /// Authority and path come from the explicit fields. If either is missing and `url`
    /// parses, both are taken from `url`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidRequest`] if authority or path cannot be determined, the
    ///   key id names another key, or the agent holds no secret
    /// - [`BridgeError::UnsupportedAlgorithm`] if `alg` is unknown or differs from the
    ///   agent's key
    ///
    /// # Examples
    ///
    /// ```
    /// use tap_x402::{
    ///     registry::{LocalAgent, SignRequest},
    ///     tap::{SigningSecret, TapSigner, parse_signature_input},
    /// };
    ///
    /// let agent = LocalAgent::new(TapSigner::new("k1", SigningSecret::ed25519_from_seed(&[9u8; 32])?))?;
    /// let response = agent.sign(&SignRequest {
    ///     url: Some("https://api.example.com/mcp/execute?x=1".to_owned()),
    ///     ..SignRequest::default()
    /// })?;
    ///
    /// assert_eq!(response.authority, "api.example.com");
    /// assert_eq!(response.path, "/mcp/execute?x=1");
    /// assert_eq!(parse_signature_input(&response.signature_input)?.key_id(), Some("k1"));
    /// # Ok::<(), tap_x402::BridgeError>(())
    /// ```
    #[instrument(skip(self, request), fields(key_id = %self.key_id))]
    pub fn sign(&self, request: &SignRequest) -> Result<SignResponse> {
        if let Some(key_id) = request.key_id.as_deref().filter(|k| !k.is_empty())
            && key_id != self.key_id
        {
            return Err(BridgeError::InvalidRequest(format!("unknown keyId: {key_id}")));
        }
        if let Some(alg) = request.alg.as_deref().filter(|a| !a.is_empty()) {
            let requested: Algorithm = alg.parse()?;
            if requested != self.algorithm {
                return Err(BridgeError::UnsupportedAlgorithm(format!(
                    "{requested} (agent key is {})",
                    self.algorithm
                )));
            }
        }
        let Some(signer) = &self.signer else {
            return Err(BridgeError::InvalidRequest("agent has no signing key".to_owned()));
        };

        let (authority, path) = resolve_target(request)
            .ok_or_else(|| BridgeError::InvalidRequest("Missing authority/path or url".to_owned()))?;

        let mut params = signer.parameters(&authority, &path).with_ttl_secs(request.ttl_sec).with_tag(&request.tag);
        if let Some(nonce) = request.nonce.as_deref().filter(|n| !n.is_empty()) {
            params = params.with_nonce(nonce);
        }
        let signed = signer.sign_parameters(&params)?;

        Ok(SignResponse {
            signature_input: signed.signature_input,
            signature: signed.signature,
            authority,
            path,
            commitment: signed.commitment,
        })
    }
}

impl KeyResolver for LocalAgent {
    async fn resolve(&self, key_id: &str) -> Result<Option<KeyInfo>> {
        match self.describe_key(key_id) {
            Ok(record) => record.to_key_info().map(Some),
            Err(BridgeError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn resolve_target(request: &SignRequest) -> Option<(String, String)> {
    let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
    let mut authority = non_empty(&request.authority);
    let mut path = non_empty(&request.path);

    if (authority.is_none() || path.is_none())
        && let Some(url) = request.url.as_deref()
        && let Ok(ctx) = RequestContext::from_url(url)
    {
        authority = ctx.authority;
        path = ctx.path;
    }
    Some((authority?, path?))
}
