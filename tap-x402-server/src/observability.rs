//! Structured logging and the health report served at `GET /health`.

use std::io;

use serde::Serialize;
use tap_x402::facilitator::HealthCheckResult;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log format configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format for development.
    Pretty,
    /// JSON format for production log aggregation.
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT`: `json` selects JSON, anything else pretty.
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global subscriber.
///
/// Log levels come from `RUST_LOG` (default `info`). Audit events are emitted on the
/// `audit` target, so `RUST_LOG=info,audit=warn` keeps only rejections and failures.
/// Output goes to stderr.
pub fn init_observability(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
    }
}

/// Overall gateway status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every check passed.
    Healthy,
    /// At least one check warned.
    Degraded,
}

/// Status of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckStatus {
    /// Check passed.
    Pass,
    /// Degraded but operational.
    Warn,
}

/// Individual health check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Check name.
    pub name: &'static str,
    /// Check status.
    pub status: HealthCheckStatus,
    /// Details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// A passing check.
    #[must_use]
    pub const fn pass(name: &'static str) -> Self {
        Self { name, status: HealthCheckStatus::Pass, message: None }
    }

    /// A warning check.
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn warn(name: &'static str, message: impl Into<String>) -> Self {
        Self { name, status: HealthCheckStatus::Warn, message: Some(message.into()) }
    }

    /// Maps a facilitator probe to a check. An unreachable facilitator only degrades
    /// the gateway, since unpaid routes keep working.
    #[must_use]
    pub fn facilitator(result: &HealthCheckResult) -> Self {
        if result.healthy {
            Self::pass("facilitator")
        } else {
            Self::warn("facilitator", result.error.as_deref().unwrap_or("facilitator unreachable"))
        }
    }
}

/// Health report body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Server version.
    pub version: &'static str,
    /// Report time, RFC 3339.
    pub timestamp: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Raw facilitator probe.
    pub facilitator: HealthCheckResult,
    /// Individual checks.
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Builds a report, deriving the overall status from `checks`.
    #[must_use]
    pub fn new(uptime_secs: u64, facilitator: HealthCheckResult, checks: Vec<HealthCheck>) -> Self {
        Self {
            status: Self::compute_status(&checks),
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_secs,
            facilitator,
            checks,
        }
    }

    /// Any warning degrades the gateway.
    #[must_use]
    pub fn compute_status(checks: &[HealthCheck]) -> HealthStatus {
        if checks.iter().any(|c| c.status == HealthCheckStatus::Warn) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
