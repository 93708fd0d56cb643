//! Per-route admission control with a global circuit breaker.
//!
//! Guards every outgoing request against runaway callers: a sliding window of
//! admissions per (method, path) key, a process-wide window feeding the
//! breaker, and a short-lived cache of the last successful payload used to
//! de-dupe rapid re-fires of the same request.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Admission control configuration.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum spacing between admitted requests to the same key
    pub min_interval: Duration,
    /// Maximum admissions per key inside the window
    pub max_per_route: usize,
    /// Sliding window length
    pub window: Duration,
    /// Maximum admissions across all keys before the breaker trips
    pub global_max: usize,
    /// How long the breaker stays open once tripped
    pub cooldown: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            max_per_route: 20,
            window: Duration::from_millis(10_000),
            global_max: 50,
            cooldown: Duration::from_millis(5000),
        }
    }
}

impl ThrottleConfig {
    /// Set the minimum spacing between admitted requests per key.
    #[must_use]
    pub const fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set the per-key admission limit.
    #[must_use]
    pub const fn with_max_per_route(mut self, max: usize) -> Self {
        self.max_per_route = max;
        self
    }

    /// Set the sliding window length.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the global admission limit.
    #[must_use]
    pub const fn with_global_max(mut self, max: usize) -> Self {
        self.global_max = max;
        self
    }

    /// Set the breaker cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Identity of a guarded destination: HTTP verb plus path.
///
/// Query parameters are not normalized; identical verb and path with
/// different bodies share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    method: Method,
    path: String,
}

impl ThrottleKey {
    /// Create a key for the given verb and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Why a request was refused admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThrottleRejection {
    /// The breaker is open; all traffic is refused until the cooldown ends
    #[error("circuit breaker open, retry in {}s", .retry_in.as_secs_f64().ceil())]
    BreakerOpen {
        /// Remaining cooldown
        retry_in: Duration,
    },
    /// This key exhausted its window allowance and has no cached response
    #[error("per-destination rate exceeded")]
    RouteLimitExceeded,
    /// The process-wide threshold was crossed; the breaker just opened
    #[error("global breaker tripped, cooling down for {}s", .cooldown.as_secs())]
    BreakerTripped {
        /// Cooldown the breaker will stay open for
        cooldown: Duration,
    },
}

/// Outcome of an admission check.
#[derive(Debug)]
pub enum AdmissionDecision {
    /// Proceed to the network
    Admit,
    /// Do not hit the network; reuse the cached last successful payload
    ServeCached(Arc<Value>),
    /// Refuse the request outright
    Reject(ThrottleRejection),
}

struct CachedResponse {
    value: Arc<Value>,
    recorded_at: Instant,
}

#[derive(Default)]
struct RouteRecord {
    admissions: VecDeque<Instant>,
    cached: Option<CachedResponse>,
}

struct ThrottleState {
    routes: HashMap<ThrottleKey, RouteRecord>,
    global: VecDeque<Instant>,
    open_until: Option<Instant>,
}

/// Admission controller guarding every outgoing request.
///
/// The full decision for one call runs under a single lock acquisition, so
/// concurrent callers observe it as atomic and the windows cannot race.
pub struct RequestThrottler {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
}

impl RequestThrottler {
    /// Create a throttler with the given configuration.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ThrottleState {
                routes: HashMap::new(),
                global: VecDeque::new(),
                open_until: None,
            }),
        }
    }

    /// Create a throttler with default limits.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ThrottleConfig::default())
    }

    /// Decide whether a request for `key` may proceed.
    ///
    /// Evaluation order: open breaker, window pruning, cached short-circuit,
    /// per-key limit (degrading to the cache when one exists), global limit
    /// (which trips the breaker), then admission into both windows.
    pub async fn check(&self, key: &ThrottleKey) -> AdmissionDecision {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(open_until) = state.open_until {
            if now < open_until {
                return AdmissionDecision::Reject(ThrottleRejection::BreakerOpen {
                    retry_in: open_until - now,
                });
            }
            state.open_until = None;
        }

        prune(&mut state.global, now, self.config.window);
        let record = state.routes.entry(key.clone()).or_default();
        prune(&mut record.admissions, now, self.config.window);

        if let Some(cached) = &record.cached {
            if now.saturating_duration_since(cached.recorded_at) < self.config.min_interval {
                debug!(%key, "re-fire within min interval, serving cached payload");
                return AdmissionDecision::ServeCached(Arc::clone(&cached.value));
            }
        }

        if record.admissions.len() >= self.config.max_per_route {
            if let Some(cached) = &record.cached {
                debug!(%key, "per-destination limit reached, degrading to cached payload");
                return AdmissionDecision::ServeCached(Arc::clone(&cached.value));
            }
            debug!(%key, "per-destination limit reached with no cached payload");
            return AdmissionDecision::Reject(ThrottleRejection::RouteLimitExceeded);
        }

        if state.global.len() >= self.config.global_max {
            state.open_until = Some(now + self.config.cooldown);
            warn!(
                %key,
                cooldown_secs = self.config.cooldown.as_secs(),
                "global admission threshold crossed, opening circuit"
            );
            return AdmissionDecision::Reject(ThrottleRejection::BreakerTripped {
                cooldown: self.config.cooldown,
            });
        }

        record.admissions.push_back(now);
        state.global.push_back(now);
        AdmissionDecision::Admit
    }

    /// Record a successful response payload for `key`.
    ///
    /// Feeds both the min-interval short-circuit and the degrade path taken
    /// when the per-key limit is reached.
    pub async fn record_success(&self, key: &ThrottleKey, value: Value) {
        let mut guard = self.state.lock().await;
        let record = guard.routes.entry(key.clone()).or_default();
        record.cached = Some(CachedResponse {
            value: Arc::new(value),
            recorded_at: Instant::now(),
        });
    }

    /// Clear all windows, caches, and breaker state.
    pub async fn reset(&self) {
        let mut guard = self.state.lock().await;
        guard.routes.clear();
        guard.global.clear();
        guard.open_until = None;
    }

    #[cfg(test)]
    async fn route_admissions(&self, key: &ThrottleKey) -> usize {
        let guard = self.state.lock().await;
        guard.routes.get(key).map_or(0, |r| r.admissions.len())
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= length {
            window.pop_front();
        } else {
            break;
        }
    }
}
