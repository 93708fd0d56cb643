//! Typed client errors with failure classification.
//!
//! Every terminal failure, whether a transport failure or an error response,
//! is mapped into a single [`ApiError`] with a stable code. Response bodies
//! are classified using the backend's structured error envelope when present,
//! falling back to the legacy `detail` shape and then to the status code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Stable error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure with no response received
    NetworkError,
    /// The transport reported its own timeout
    Timeout,
    /// The caller canceled the request before a response arrived
    Canceled,
    /// Malformed request (400)
    BadRequest,
    /// Missing or invalid credentials (401)
    Unauthorized,
    /// Authenticated but not allowed (403)
    Forbidden,
    /// Resource does not exist (404)
    NotFound,
    /// State conflict (409)
    Conflict,
    /// Field-level validation failure (422)
    ValidationError,
    /// Server-side rate limit (429)
    TooManyRequests,
    /// Unexpected server error (500 and unmapped statuses)
    InternalError,
    /// Backend temporarily down (502/503)
    ServiceUnavailable,
    /// Rejected by local admission control, never reached the network
    Throttled,
}

impl ErrorKind {
    /// Stable string code for this kind.
    #[must_use]
    pub const fn as_code(self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Canceled => "CANCELED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Throttled => "THROTTLED",
        }
    }

    /// Parse a backend error code into a kind, if it matches a known code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "NETWORK_ERROR" => Some(Self::NetworkError),
            "TIMEOUT" => Some(Self::Timeout),
            "CANCELED" => Some(Self::Canceled),
            "BAD_REQUEST" => Some(Self::BadRequest),
            "UNAUTHORIZED" => Some(Self::Unauthorized),
            "FORBIDDEN" => Some(Self::Forbidden),
            "NOT_FOUND" => Some(Self::NotFound),
            "CONFLICT" => Some(Self::Conflict),
            "VALIDATION_ERROR" => Some(Self::ValidationError),
            "TOO_MANY_REQUESTS" => Some(Self::TooManyRequests),
            "INTERNAL_ERROR" => Some(Self::InternalError),
            "SERVICE_UNAVAILABLE" => Some(Self::ServiceUnavailable),
            "THROTTLED" => Some(Self::Throttled),
            _ => None,
        }
    }

    /// Map an HTTP status code to a kind. Unmapped statuses become
    /// [`ErrorKind::InternalError`].
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::ValidationError,
            429 => Self::TooManyRequests,
            502 | 503 => Self::ServiceUnavailable,
            _ => Self::InternalError,
        }
    }

    const fn generic_message(self) -> &'static str {
        match self {
            Self::NetworkError => "Network request failed",
            Self::Timeout => "Request timed out",
            Self::Canceled => "Request was canceled",
            Self::BadRequest => "The request was malformed",
            Self::Unauthorized => "Authentication required",
            Self::Forbidden => "You do not have permission to perform this action",
            Self::NotFound => "The requested resource was not found",
            Self::Conflict => "The request conflicts with the current state",
            Self::ValidationError => "One or more fields failed validation",
            Self::TooManyRequests => "Too many requests, slow down",
            Self::InternalError => "An unexpected error occurred",
            Self::ServiceUnavailable => "The service is temporarily unavailable",
            Self::Throttled => "Request rejected by local admission control",
        }
    }
}

/// One field-level validation detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending field
    pub field: String,
    /// Human-readable description of the problem
    pub message: String,
    /// The rejected value, when the backend echoes it back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Typed error surfaced to every caller of the client.
#[derive(Debug, Clone, Error)]
#[error("{code} ({status}): {message}")]
pub struct ApiError {
    /// Error category
    pub kind: ErrorKind,
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// HTTP status code, 0 for failures with no response
    pub status: u16,
    /// Field-level validation details, when provided
    pub details: Vec<FieldError>,
    /// When the error was classified
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: EnvelopeBody,
}

#[derive(Deserialize)]
struct EnvelopeBody {
    code: String,
    message: String,
    #[serde(default)]
    details: Vec<FieldError>,
}

#[derive(Deserialize)]
struct LegacyBody {
    detail: String,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>, status: u16) -> Self {
        Self {
            kind,
            code: kind.as_code().to_owned(),
            message: message.into(),
            status,
            details: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Classify an error response from its status code and raw body.
    ///
    /// Classification order: structured envelope (code, message, and details
    /// taken verbatim), legacy bare `detail` string, then the status table.
    #[must_use]
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
            let kind = ErrorKind::from_code(&envelope.error.code)
                .unwrap_or_else(|| ErrorKind::from_status(status));
            return Self {
                kind,
                code: envelope.error.code,
                message: envelope.error.message,
                status,
                details: envelope.error.details,
                timestamp: Utc::now(),
            };
        }

        if let Ok(legacy) = serde_json::from_slice::<LegacyBody>(body) {
            let kind = if status == 400 {
                ErrorKind::BadRequest
            } else {
                ErrorKind::InternalError
            };
            return Self::new(kind, legacy.detail, status);
        }

        let kind = ErrorKind::from_status(status);
        Self::new(kind, kind.generic_message(), status)
    }

    /// Create a transport-level network error (status 0).
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message, 0)
    }

    /// Create a transport timeout error (status 0).
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, "request timed out", 0)
    }

    /// Create a caller-initiated cancellation error (status 0).
    #[must_use]
    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "request canceled", 0)
    }

    /// Create a terminal authorization error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message, 401)
    }

    /// Create an admission-control rejection (status 0).
    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttled, message, 0)
    }

    /// Create an error for a response whose body could not be decoded.
    #[must_use]
    pub fn invalid_body(status: u16, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InternalError,
            format!("invalid response body: {}", detail.into()),
            status,
        )
    }

    /// Whether callers should handle this inline, e.g. as a form error.
    #[must_use]
    pub const fn is_business_error(&self) -> bool {
        matches!(self.status, 400 | 409 | 422)
    }

    /// Whether this should be surfaced through the app-wide error bus.
    ///
    /// Disjoint from [`ApiError::is_business_error`]; throttle rejections and
    /// caller-initiated cancellations share status 0 but are self-inflicted
    /// and belong on neither surface.
    #[must_use]
    pub const fn is_global_error(&self) -> bool {
        !matches!(self.kind, ErrorKind::Throttled | ErrorKind::Canceled)
            && matches!(self.status, 403 | 500 | 502 | 503 | 0)
    }

    /// Whether the caller canceled this request itself.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self.kind, ErrorKind::Canceled)
    }

    /// Whether this request was rejected by local admission control.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(self.kind, ErrorKind::Throttled)
    }

    /// Flatten validation details into a field name to message map.
    #[must_use]
    pub fn field_errors(&self) -> HashMap<String, String> {
        self.details
            .iter()
            .map(|d| (d.field.clone(), d.message.clone()))
            .collect()
    }
}

/// A failed request for which no HTTP response was received.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The connection could not be established or was dropped mid-exchange
    #[error("connection failed: {0}")]
    Connection(String),
    /// The transport gave up waiting; the server may have seen the request
    #[error("request timed out")]
    Timeout,
    /// The caller canceled the request
    #[error("request canceled")]
    Canceled,
}

impl TransportFailure {
    /// Classify a reqwest transport error.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Connection(err.to_string())
        }
    }

    /// Whether blind replay of the request is safe.
    ///
    /// Only pure connection failures qualify: a timeout means the server may
    /// have held the request, and a cancellation was the caller's choice.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<TransportFailure> for ApiError {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::Connection(msg) => Self::network(msg),
            TransportFailure::Timeout => Self::timeout(),
            TransportFailure::Canceled => Self::canceled(),
        }
    }
}
