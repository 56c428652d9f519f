//! Shared state for route handlers.

use std::{sync::Arc, time::Instant};

use reqwest::Client;
use tap_x402::{
    Result,
    config::{GatewayConfig, PaymentConfig},
    facilitator::FacilitatorClient,
    policy::{HttpPriceFeed, PolicyGate},
    registry::LocalAgent,
    tap::{ChainedKeyResolver, HttpKeyResolver, ReplayGuard, StaticKeyResolver, TapVerifier},
};
use tokio_util::sync::CancellationToken;

/// Configured keys first, then the remote registry.
pub type ConfiguredResolver = ChainedKeyResolver<StaticKeyResolver, Option<HttpKeyResolver>>;

/// Configured keys, then the local agent's own key.
pub type GatewayResolver = ChainedKeyResolver<ConfiguredResolver, Option<Arc<LocalAgent>>>;

/// Everything a request needs, built once at startup.
#[derive(Debug)]
pub struct AppState {
    /// TAP verifier sharing the process-wide replay guard.
    pub verifier: TapVerifier,
    /// Key lookup for verification.
    pub keys: GatewayResolver,
    /// Agent served by `/tap/keys` and `/tap/sign`.
    pub agent: Option<Arc<LocalAgent>>,
    /// Price-cap gate.
    pub policy: PolicyGate<Option<HttpPriceFeed>>,
    /// Payment verifier and settler.
    pub facilitator: FacilitatorClient,
    /// Price and recipient of `/mcp/execute`.
    pub payment: PaymentConfig,
    /// Client for the upstream MCP server.
    pub upstream: Client,
    /// Upstream MCP endpoint.
    pub mcp_url: String,
    /// Fires on shutdown and aborts in-flight facilitator calls.
    pub shutdown: CancellationToken,
    /// Process start.
    pub started: Instant,
}

impl AppState {
    /// Builds state from configuration, loading the agent key it names.
    ///
    /// # Errors
    ///
    /// Returns an error if a key, URL or HTTP client in `config` is invalid.
    pub fn from_config(config: &GatewayConfig, guard: Arc<ReplayGuard>, shutdown: CancellationToken) -> Result<Self> {
        let agent = LocalAgent::from_config(&config.agent)?;
        Self::new(config, agent, guard, shutdown)
    }

    /// Builds state with an explicit agent.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL or HTTP client in `config` is invalid.
    pub fn new(
        config: &GatewayConfig,
        agent: Option<LocalAgent>,
        guard: Arc<ReplayGuard>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let agent = agent.map(Arc::new);
        let keys = ChainedKeyResolver::new(config.tap.key_resolver()?, agent.clone());
        let policy = PolicyGate::from_config(config.policy.price_feed()?, &config.policy);

        Ok(Self {
            verifier: TapVerifier::new(guard, config.tap.verify_options()),
            keys,
            agent,
            policy,
            facilitator: config.facilitator.client()?,
            payment: config.payment.clone(),
            upstream: Client::builder().timeout(config.facilitator.timeout()).build()?,
            mcp_url: config.server.mcp_url.clone(),
            shutdown,
            started: Instant::now(),
        })
    }
}
