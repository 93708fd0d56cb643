//! HTTP client core for the Docuflow document platform.
//!
//! This crate provides the request governance layer every typed endpoint
//! wrapper goes through:
//! - Per-destination admission control with a global circuit breaker
//! - Single-flight access-token refresh coordination
//! - Transient transport-failure retry with exponential backoff
//! - A typed error taxonomy with business/global classification
//! - A publish/subscribe bus for application-wide errors

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod refresh;
pub mod retry;
pub mod telemetry;
pub mod throttle;

pub use bus::{ErrorBus, Subscription};
pub use client::ApiClient;
pub use config::{build_http_client, ClientConfig};
pub use credentials::{
    CredentialStore, InMemoryCredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
pub use error::{ApiError, ErrorKind, FieldError, TransportFailure};
pub use refresh::TokenRefreshCoordinator;
pub use retry::{RetryConfig, RetryPolicy};
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use throttle::{
    AdmissionDecision, RequestThrottler, ThrottleConfig, ThrottleKey, ThrottleRejection,
};
