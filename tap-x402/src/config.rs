//! Gateway configuration.
//!
//! [`GatewayConfig`] is read from TOML, then overlaid with environment variables via
//! [`GatewayConfig::apply_env`]. Every section validates its own bounds.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:3000"
//! mcp_url = "http://localhost:3001/mcp"
//!
//! [tap]
//! required = true
//! max_skew_secs = 60
//! registry_url = "https://registry.example.com"
//!
//! [tap.static_keys.k1]
//! public_key = "11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo="
//! algorithm = "ed25519"
//!
//! [facilitator]
//! base_url = "https://facilitator.example.com"
//! timeout_secs = 30
//!
//! [policy]
//! max_usd_per_call = 25
//! price_feed_url = "https://prices.example.com/simple/price?ids=solana&vs_currencies=usd"
//! price_pointer = "/solana/usd"
//!
//! [payment]
//! amount = 1000000
//! pay_to = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"
//! ```

use std::{collections::HashMap, fmt, path::Path, str::FromStr, time::Duration};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    error::{BridgeError, Result},
    facilitator::{FacilitatorClient, VerifyOptions as PaymentVerifyOptions},
    payment::{AcceptSpec, NetworkTag},
    policy::HttpPriceFeed,
    tap::{
        Algorithm, ChainedKeyResolver, HttpKeyResolver, KeyRecord, ReplayGuard, SigningSecret,
        StaticKeyResolver, VerifyOptions,
    },
};

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener and upstream.
    #[serde(default)]
    pub server: ServerConfig,
    /// TAP verification.
    #[serde(default)]
    pub tap: TapConfig,
    /// Facilitator endpoint.
    #[serde(default)]
    pub facilitator: FacilitatorConfig,
    /// Price-cap policy.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Price and recipient of paid calls.
    #[serde(default)]
    pub payment: PaymentConfig,
    /// Local signing agent.
    #[serde(default)]
    pub agent: AgentConfig,
}

impl GatewayConfig {
    /// Parses and validates TOML.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] if the TOML is malformed or a value is out
    /// of range.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml).map_err(|e| BridgeError::ConfigError(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::ConfigError(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Overlays process environment variables and re-validates.
    ///
    /// # Errors
    ///
    /// See [`apply_env_with`](Self::apply_env_with).
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlays variables read through `lookup` and re-validates.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `PORT` | `server.bind` (as `0.0.0.0:<port>`) |
    /// | `MCP_URL` | `server.mcp_url` |
    /// | `TAP_REQUIRED` | `tap.required` |
    /// | `TAP_MAX_SKEW_SEC` | `tap.max_skew_secs` |
    /// | `TAP_NONCE_TTL_MS` | `tap.nonce_ttl_ms` |
    /// | `TAP_REGISTRY_URL` | `tap.registry_url` |
    /// | `TAP_KEYS_JSON` | `tap.static_keys` (merged) |
    /// | `FACILITATOR_URL` | `facilitator.base_url` |
    /// | `MAX_USD_PER_CALL` | `policy.max_usd_per_call` |
    /// | `PRICE_FEED_REQUIRED` | `policy.price_required` |
    /// | `PRICE_FEED_URL` | `policy.price_feed_url` |
    /// | `MERCHANT_SOLANA_ADDRESS` | `payment.pay_to` |
    /// | `SOLANA_NETWORK` | `payment.cluster` |
    /// | `TAP_KEY_ID` | `agent.key_id` |
    /// | `TAP_ALG` | `agent.algorithm` |
    /// | `ED25519_PRIVATE_KEY` / `RSA_PRIVATE_KEY` | `agent.secret`, by `agent.algorithm` |
    /// | `ED25519_PUBLIC_KEY` / `RSA_PUBLIC_KEY` | `agent.public_key`, by `agent.algorithm` |
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] if a variable cannot be parsed or the
    /// result fails validation.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            let port: u16 = parse_env("PORT", &port)?;
            self.server.bind = format!("0.0.0.0:{port}");
        }
        if let Some(url) = var("MCP_URL") {
            self.server.mcp_url = url;
        }

        if let Some(v) = var("TAP_REQUIRED") {
            self.tap.required = parse_flag(&v);
        }
        if let Some(v) = var("TAP_MAX_SKEW_SEC") {
            self.tap.max_skew_secs = parse_env("TAP_MAX_SKEW_SEC", &v)?;
        }
        if let Some(v) = var("TAP_NONCE_TTL_MS") {
            self.tap.nonce_ttl_ms = parse_env("TAP_NONCE_TTL_MS", &v)?;
        }
        if let Some(url) = var("TAP_REGISTRY_URL") {
            self.tap.registry_url = Some(url);
        }
        if let Some(json) = var("TAP_KEYS_JSON") {
            let keys: HashMap<String, KeyRecord> = serde_json::from_str(&json)
                .map_err(|e| BridgeError::ConfigError(format!("TAP_KEYS_JSON: {e}")))?;
            self.tap.static_keys.extend(keys);
        }

        if let Some(url) = var("FACILITATOR_URL") {
            self.facilitator.base_url = url;
        }

        if let Some(v) = var("MAX_USD_PER_CALL") {
            self.policy.max_usd_per_call = parse_env("MAX_USD_PER_CALL", &v)?;
        }
        if let Some(v) = var("PRICE_FEED_REQUIRED") {
            self.policy.price_required = parse_flag(&v);
        }
        if let Some(url) = var("PRICE_FEED_URL") {
            self.policy.price_feed_url = Some(url);
        }

        if let Some(address) = var("MERCHANT_SOLANA_ADDRESS") {
            self.payment.pay_to = address;
        }
        if let Some(cluster) = var("SOLANA_NETWORK") {
            self.payment.cluster = cluster;
        }

        if let Some(key_id) = var("TAP_KEY_ID") {
            self.agent.key_id = Some(key_id);
        }
        if let Some(alg) = var("TAP_ALG") {
            self.agent.algorithm = Some(alg.to_ascii_lowercase());
        }
        let (secret_var, public_var) = match self.agent.algorithm() {
            Ok(Some(Algorithm::RsaPssSha256)) => ("RSA_PRIVATE_KEY", "RSA_PUBLIC_KEY"),
            _ => ("ED25519_PRIVATE_KEY", "ED25519_PUBLIC_KEY"),
        };
        if let Some(secret) = var(secret_var) {
            self.agent.secret = Some(secret);
        }
        if let Some(public_key) = var(public_var) {
            self.agent.public_key = Some(public_key);
        }

        self.validate()
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.tap.validate()?;
        self.facilitator.validate()?;
        self.policy.validate()?;
        self.agent.validate()
    }
}

/// HTTP listener and upstream MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upstream MCP endpoint receiving paid calls.
    #[serde(default = "default_mcp_url")]
    pub mcp_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind(), mcp_url: default_mcp_url() }
    }
}

impl ServerConfig {
    /// Validates the listen address and upstream URL.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] if either fails to parse.
    pub fn validate(&self) -> Result<()> {
        self.bind
            .parse::<std::net::SocketAddr>()
            .map_err(|e| BridgeError::ConfigError(format!("server.bind: {e}")))?;
        parse_url("server.mcp_url", &self.mcp_url)
    }
}

/// TAP verification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TapConfig {
    /// Reject requests without TAP headers.
    #[serde(default)]
    pub required: bool,
    /// Allowed future skew of `created`, in seconds.
    #[serde(default = "default_max_skew_secs")]
    pub max_skew_secs: u64,
    /// How long seen nonces are remembered, in milliseconds.
    #[serde(default = "default_nonce_ttl_ms")]
    pub nonce_ttl_ms: u64,
    /// Interval between nonce sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Remote agent registry consulted after the static keys.
    #[serde(default)]
    pub registry_url: Option<String>,
    /// Keys known without a registry lookup.
    #[serde(default)]
    pub static_keys: HashMap<String, KeyRecord>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            required: false,
            max_skew_secs: default_max_skew_secs(),
            nonce_ttl_ms: default_nonce_ttl_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            registry_url: None,
            static_keys: HashMap::new(),
        }
    }
}

impl TapConfig {
    /// Validates bounds:
    /// - `max_skew_secs`: at most 3600
    /// - `nonce_ttl_ms`: at least 1000
    /// - `sweep_interval_secs`: 1-3600
    /// - every static key decodes
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] naming the invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_skew_secs > 3600 {
            return Err(BridgeError::ConfigError("tap.max_skew_secs must be at most 3600".to_owned()));
        }
        if self.nonce_ttl_ms < 1000 {
            return Err(BridgeError::ConfigError("tap.nonce_ttl_ms must be at least 1000".to_owned()));
        }
        if self.sweep_interval_secs == 0 || self.sweep_interval_secs > 3600 {
            return Err(BridgeError::ConfigError(
                "tap.sweep_interval_secs must be between 1 and 3600".to_owned(),
            ));
        }
        if let Some(url) = &self.registry_url {
            parse_url("tap.registry_url", url)?;
        }
        for (key_id, record) in &self.static_keys {
            record
                .to_key_info()
                .map_err(|e| BridgeError::ConfigError(format!("tap.static_keys.{key_id}: {e}")))?;
        }
        Ok(())
    }

    /// Verifier options.
    #[must_use]
    pub const fn verify_options(&self) -> VerifyOptions {
        VerifyOptions { required: self.required, max_skew_secs: self.max_skew_secs }
    }

    /// Nonce retention window.
    #[must_use]
    pub const fn nonce_ttl(&self) -> Duration {
        Duration::from_millis(self.nonce_ttl_ms)
    }

    /// Interval between nonce sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// A fresh replay guard with the configured TTL.
    #[must_use]
    pub fn replay_guard(&self) -> ReplayGuard {
        ReplayGuard::new(self.nonce_ttl())
    }

    /// Static keys backed by the registry, when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HttpError`] if the registry client cannot be built.
    pub fn key_resolver(&self) -> Result<ChainedKeyResolver<StaticKeyResolver, Option<HttpKeyResolver>>> {
        let remote = self.registry_url.as_deref().map(HttpKeyResolver::new).transpose()?;
        Ok(ChainedKeyResolver::new(StaticKeyResolver::from_records(self.static_keys.clone()), remote))
    }
}

/// Facilitator endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilitatorConfig {
    /// Facilitator base URL.
    #[serde(default = "default_facilitator_url")]
    pub base_url: String,
    /// Per-call timeout in seconds.
    #[serde(default = "default_facilitator_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self { base_url: default_facilitator_url(), timeout_secs: default_facilitator_timeout_secs() }
    }
}

impl FacilitatorConfig {
    /// Validates that `timeout_secs` is 1-300 and `base_url` parses.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] naming the invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return Err(BridgeError::ConfigError(
                "facilitator.timeout_secs must be between 1 and 300".to_owned(),
            ));
        }
        parse_url("facilitator.base_url", &self.base_url)
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Client for the configured facilitator.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HttpError`] if the HTTP client cannot be built.
    pub fn client(&self) -> Result<FacilitatorClient> {
        Ok(FacilitatorClient::new(&self.base_url)?.with_timeout(self.timeout()))
    }
}

/// Price-cap policy.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Per-call cap in USD.
    #[serde(default = "default_max_usd_per_call")]
    pub max_usd_per_call: Decimal,
    /// Deny every call while the price is unavailable.
    #[serde(default)]
    pub price_required: bool,
    /// Bound on one price lookup, in seconds.
    #[serde(default = "default_feed_timeout_secs")]
    pub feed_timeout_secs: u64,
    /// Base units in one whole token.
    #[serde(default = "default_base_units_per_token")]
    pub base_units_per_token: u64,
    /// JSON endpoint returning the token's USD price.
    #[serde(default)]
    pub price_feed_url: Option<String>,
    /// JSON pointer to the price inside the feed response.
    #[serde(default = "default_price_pointer")]
    pub price_pointer: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_usd_per_call: default_max_usd_per_call(),
            price_required: false,
            feed_timeout_secs: default_feed_timeout_secs(),
            base_units_per_token: default_base_units_per_token(),
            price_feed_url: None,
            price_pointer: default_price_pointer(),
        }
    }
}

impl PolicyConfig {
    /// Validates bounds:
    /// - `max_usd_per_call`: not negative
    /// - `feed_timeout_secs`: 1-60
    /// - `base_units_per_token`: not zero
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] naming the invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_usd_per_call.is_sign_negative() {
            return Err(BridgeError::ConfigError("policy.max_usd_per_call must not be negative".to_owned()));
        }
        if self.feed_timeout_secs == 0 || self.feed_timeout_secs > 60 {
            return Err(BridgeError::ConfigError(
                "policy.feed_timeout_secs must be between 1 and 60".to_owned(),
            ));
        }
        if self.base_units_per_token == 0 {
            return Err(BridgeError::ConfigError("policy.base_units_per_token must not be zero".to_owned()));
        }
        if let Some(url) = &self.price_feed_url {
            parse_url("policy.price_feed_url", url)?;
        }
        Ok(())
    }

    /// HTTP price feed, when a URL is configured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HttpError`] if the HTTP client cannot be built.
    pub fn price_feed(&self) -> Result<Option<HttpPriceFeed>> {
        self.price_feed_url
            .as_deref()
            .map(|url| HttpPriceFeed::new(url, &self.price_pointer))
            .transpose()
    }
}

/// Price and recipient of paid calls.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Price of one paid call in base units.
    #[serde(default = "default_payment_amount")]
    pub amount: u64,
    /// Asset tag.
    #[serde(default = "default_asset")]
    pub asset: String,
    /// Recipient address.
    #[serde(default)]
    pub pay_to: String,
    /// Cluster name mapped through [`NetworkTag::from_cluster`].
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Resource identifier advertised in the accept spec.
    #[serde(default = "default_resource")]
    pub resource: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            amount: default_payment_amount(),
            asset: default_asset(),
            pay_to: String::new(),
            cluster: default_cluster(),
            resource: default_resource(),
        }
    }
}

impl PaymentConfig {
    /// Settlement network.
    #[must_use]
    pub fn network(&self) -> NetworkTag {
        NetworkTag::from_cluster(&self.cluster)
    }

    /// What the paid endpoint accepts.
    #[must_use]
    pub fn accept_spec(&self) -> AcceptSpec {
        AcceptSpec::new(&self.cluster, &self.asset, &self.pay_to, self.amount.to_string(), &self.resource)
    }

    /// Facilitator options matching [`accept_spec`](Self::accept_spec).
    #[must_use]
    pub fn verify_options(&self) -> PaymentVerifyOptions {
        PaymentVerifyOptions::from(&self.accept_spec())
    }
}

/// Local signing agent. The secret is base64 of an Ed25519 seed or an RSA PKCS#8 PEM.
#[derive(Clone, Default, Deserialize)]
pub struct AgentConfig {
    /// Key id the agent signs under.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Algorithm name.
    #[serde(default)]
    pub algorithm: Option<String>,
    /// Encoded secret key.
    #[serde(default)]
    pub secret: Option<String>,
    /// Encoded public key published by the registry endpoint.
    #[serde(default)]
    pub public_key: Option<String>,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl AgentConfig {
    /// Parsed algorithm, if set.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnsupportedAlgorithm`] for an unknown name.
    pub fn algorithm(&self) -> Result<Option<Algorithm>> {
        self.algorithm.as_deref().map(Algorithm::from_str).transpose()
    }

    /// Decoded secret, if both algorithm and secret are set.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnsupportedAlgorithm`] or
    /// [`BridgeError::InvalidKeyMaterial`] if either cannot be decoded.
    pub fn signing_secret(&self) -> Result<Option<SigningSecret>> {
        match (self.algorithm()?, self.secret.as_deref()) {
            (Some(algorithm), Some(secret)) => SigningSecret::from_encoded(algorithm, secret).map(Some),
            _ => Ok(None),
        }
    }

    /// Validates that the algorithm name is known.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigError`] for an unknown algorithm.
    pub fn validate(&self) -> Result<()> {
        self.algorithm().map_err(|e| BridgeError::ConfigError(format!("agent.algorithm: {e}")))?;
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| BridgeError::ConfigError(format!("{name}: {e}")))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_url(field: &str, value: &str) -> Result<()> {
    url::Url::parse(value).map_err(|e| BridgeError::ConfigError(format!("{field}: {e}")))?;
    Ok(())
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_owned()
}

fn default_mcp_url() -> String {
    "http://localhost:3001/mcp".to_owned()
}

const fn default_max_skew_secs() -> u64 {
    60
}

const fn default_nonce_ttl_ms() -> u64 {
    3_600_000
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_facilitator_url() -> String {
    "http://localhost:3002".to_owned()
}

const fn default_facilitator_timeout_secs() -> u64 {
    30
}

fn default_max_usd_per_call() -> Decimal {
    Decimal::from(25)
}

const fn default_feed_timeout_secs() -> u64 {
    10
}

const fn default_base_units_per_token() -> u64 {
    1_000_000_000
}

fn default_price_pointer() -> String {
    "/price".to_owned()
}

const fn default_payment_amount() -> u64 {
    1_000_000
}

fn default_asset() -> String {
    "SOL".to_owned()
}

fn default_cluster() -> String {
    "devnet".to_owned()
}

fn default_resource() -> String {
    "/mcp/execute".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ED25519_KEY: &str = "11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| (*v).to_owned())
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert!(!config.tap.required);
        assert_eq!(config.tap.max_skew_secs, 60);
        assert_eq!(config.tap.nonce_ttl(), Duration::from_secs(3600));
        assert_eq!(config.facilitator.timeout(), Duration::from_secs(30));
        assert_eq!(config.policy.max_usd_per_call, Decimal::from(25));
        assert_eq!(config.policy.base_units_per_token, 1_000_000_000);
        assert_eq!(config.payment.network(), NetworkTag::SolanaDevnet);
    }

    #[test]
    fn test_from_toml() {
        let toml = format!(
            r#"
            [tap]
            required = true
            max_skew_secs = 30

            [tap.static_keys.k1]
            public_key = "{ED25519_KEY}"
            algorithm = "ed25519"

            [facilitator]
            base_url = "https://facilitator.example.com"
            timeout_secs = 5

            [policy]
            max_usd_per_call = 12.5
            price_required = true

            [payment]
            cluster = "mainnet-beta"
            pay_to = "payee"
            "#
        );
        let config = GatewayConfig::from_toml(&toml).unwrap();
        assert!(config.tap.verify_options().required);
        assert_eq!(config.tap.verify_options().max_skew_secs, 30);
        assert_eq!(config.tap.static_keys["k1"].is_active, "true");
        assert_eq!(config.facilitator.timeout_secs, 5);
        assert_eq!(config.policy.max_usd_per_call, Decimal::new(125, 1));
        assert_eq!(config.payment.accept_spec().network, NetworkTag::Solana);
        assert_eq!(config.payment.verify_options().pay_to.as_deref(), Some("payee"));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let error = GatewayConfig::from_toml("[facilitator]\ntimeout_secs = 0").unwrap_err();
        assert!(matches!(error, BridgeError::ConfigError(msg) if msg.contains("timeout_secs")));
        assert!(GatewayConfig::from_toml("[facilitator]\ntimeout_secs = 301").is_err());
    }

    #[test]
    fn test_rejects_bad_static_key() {
        let toml = "[tap.static_keys.k1]\npublic_key = \"AAAA\"\nalgorithm = \"ed25519\"";
        let error = GatewayConfig::from_toml(toml).unwrap_err();
        assert!(matches!(error, BridgeError::ConfigError(msg) if msg.contains("tap.static_keys.k1")));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(GatewayConfig::from_toml("[tap"), Err(BridgeError::ConfigError(_))));
    }

    #[test]
    fn test_env_overlay() {
        let keys = format!(r#"{{"k2": {{"public_key": "{ED25519_KEY}", "algorithm": "ed25519"}}}}"#);
        let vars = [
            ("TAP_REQUIRED", "true"),
            ("TAP_MAX_SKEW_SEC", "90"),
            ("TAP_NONCE_TTL_MS", "60000"),
            ("TAP_KEYS_JSON", keys.as_str()),
            ("FACILITATOR_URL", "https://f.example.com"),
            ("MAX_USD_PER_CALL", "40"),
            ("PRICE_FEED_REQUIRED", "TRUE"),
            ("PORT", "8080"),
            ("TAP_ALG", "ED25519"),
            ("TAP_KEY_ID", "agent-1"),
            ("ED25519_PRIVATE_KEY", "c2VlZA=="),
            ("RSA_PRIVATE_KEY", "ignored"),
        ];
        let mut config = GatewayConfig::default();
        config.apply_env_with(env(&vars)).unwrap();

        assert!(config.tap.required);
        assert_eq!(config.tap.max_skew_secs, 90);
        assert_eq!(config.tap.nonce_ttl_ms, 60_000);
        assert!(config.tap.static_keys.contains_key("k2"));
        assert_eq!(config.facilitator.base_url, "https://f.example.com");
        assert_eq!(config.policy.max_usd_per_call, Decimal::from(40));
        assert!(config.policy.price_required);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.agent.algorithm().unwrap(), Some(Algorithm::Ed25519));
        assert_eq!(config.agent.key_id.as_deref(), Some("agent-1"));
        assert_eq!(config.agent.secret.as_deref(), Some("c2VlZA=="));
    }

    #[test]
    fn test_env_rejects_unparsable_number() {
        let mut config = GatewayConfig::default();
        let error = config.apply_env_with(env(&[("TAP_MAX_SKEW_SEC", "soon")])).unwrap_err();
        assert!(matches!(error, BridgeError::ConfigError(msg) if msg.starts_with("TAP_MAX_SKEW_SEC")));
    }

    #[test]
    fn test_env_ignores_empty_values() {
        let mut config = GatewayConfig::default();
        config.apply_env_with(env(&[("FACILITATOR_URL", ""), ("TAP_REQUIRED", " ")])).unwrap();
        assert_eq!(config.facilitator.base_url, default_facilitator_url());
        assert!(!config.tap.required);
    }

    #[test]
    fn test_agent_debug_redacts_secret() {
        let agent = AgentConfig { secret: Some("top-secret".to_owned()), ..AgentConfig::default() };
        assert!(!format!("{agent:?}").contains("top-secret"));
    }

    #[tokio::test]
    async fn test_key_resolver_uses_static_keys() {
        use crate::tap::KeyResolver;

        let toml = format!("[tap.static_keys.k1]\npublic_key = \"{ED25519_KEY}\"\nalgorithm = \"ed25519\"");
        let config = GatewayConfig::from_toml(&toml).unwrap();
        let resolver = config.tap.key_resolver().unwrap();
        assert!(resolver.resolve("k1").await.unwrap().is_some());
        assert!(resolver.resolve("k2").await.unwrap().is_none());
    }
}
