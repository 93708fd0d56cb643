//! Optional tracing setup for binaries embedding the client.
//!
//! The governance layer emits structured events at each decision point:
//! admission rejections, breaker transitions, retry scheduling, and refresh
//! cycles. Hosts with their own subscriber should skip this module and filter
//! on the `docuflow_client` target directly; [`init_telemetry`] is a default
//! for binaries that have none.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Governance events at info, transport internals quiet.
const DEFAULT_DIRECTIVES: &str = "docuflow_client=info,reqwest=warn,hyper=warn";

/// Every admission, retry, and refresh decision, still without transport
/// noise.
const DEBUG_DIRECTIVES: &str = "docuflow_client=debug,reqwest=warn,hyper=warn";

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub directives: String,
    /// Whether to output JSON format
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            directives: DEFAULT_DIRECTIVES.to_owned(),
            json_output: false,
        }
    }
}

impl TelemetryConfig {
    /// Replace the fallback filter directives.
    #[must_use]
    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = directives.into();
        self
    }

    /// Log every governance decision, including admissions and per-attempt
    /// retry delays.
    #[must_use]
    pub fn with_governance_debug(mut self) -> Self {
        self.directives = DEBUG_DIRECTIVES.to_owned();
        self
    }

    /// Enable JSON output.
    #[must_use]
    pub const fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Install a global subscriber for the client's governance events.
///
/// `RUST_LOG` overrides the configured directives when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed; the host
/// keeps its own subscriber in that case and nothing is replaced.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.directives));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_output {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    }
}
