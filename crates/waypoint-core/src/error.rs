//! Gateway-wide error types and their HTTP response mapping.

use actix_web::HttpResponse;
use serde_json::json;

/// Errors surfaced while dispatching a request through a route pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no route installed for this path")]
    NotFound,
    #[error("no live backends for this route")]
    BadGateway,
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl actix_web::error::ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        match self {
            GatewayError::NotFound => HttpResponse::NotFound().json(json!({
                "error": message,
                "type": "not_found",
            })),
            GatewayError::BadGateway => HttpResponse::BadGateway().json(json!({
                "error": message,
                "type": "bad_gateway",
            })),
            GatewayError::CircuitOpen => HttpResponse::ServiceUnavailable().json(json!({
                "error": message,
                "type": "circuit_open",
            })),
            GatewayError::Timeout => HttpResponse::GatewayTimeout().json(json!({
                "error": message,
                "type": "timeout",
            })),
            GatewayError::Upstream(_) => HttpResponse::BadGateway().json(json!({
                "error": message,
                "type": "upstream",
            })),
        }
    }
}

/// Error produced while reconciling the route table toward a desired snapshot.
///
/// Wraps the failure with the route key it occurred on, per the reconciler's
/// contract of attempting every route independently.
#[derive(Debug, thiserror::Error)]
#[error("route {key}: {source}")]
pub struct ReconcileError {
    pub key: String,
    #[source]
    pub source: PipelineBuildError,
}

/// Errors that can occur while constructing a new route's pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineBuildError {
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

/// Outcome of a single attempt to reach a backend through the forwarder.
///
/// `is_network` distinguishes connection-level failures (refused, reset,
/// timed out, DNS) from a response that was received but carries an
/// upstream error status; only the former is retried or counted by the
/// circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("connection to backend failed: {0}")]
    Connect(String),
    #[error("request to backend timed out")]
    Timeout,
    #[error("backend response was not yet committed when the connection failed: {0}")]
    Reset(String),
    #[error("backend responded with status {0}")]
    UpstreamStatus(u16),
}

impl ForwardError {
    /// True for failures classified as network errors per the retry and
    /// circuit-breaker contracts: connect failures, resets, and timeouts.
    /// Upstream status codes are never network errors, even 5xx.
    pub fn is_network(&self) -> bool {
        matches!(self, ForwardError::Connect(_) | ForwardError::Timeout | ForwardError::Reset(_))
    }

    /// True when the failure occurred before any byte of the upstream
    /// response was received, i.e. retrying cannot duplicate a partial
    /// response the client already started to see.
    pub fn is_uncommitted(&self) -> bool {
        matches!(self, ForwardError::Connect(_) | ForwardError::Timeout | ForwardError::Reset(_))
    }
}

impl From<ForwardError> for GatewayError {
    fn from(error: ForwardError) -> Self {
        match error {
            ForwardError::Timeout => GatewayError::Timeout,
            other => GatewayError::Upstream(other.to_string()),
        }
    }
}

/// Transport-level errors from the discovery watcher's registry calls.
///
/// These are always logged and retried by the watcher; they never reach a
/// caller of [`crate::discovery::ServiceDiscovery::watch`].
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid registry uri: {0}")]
    InvalidUri(String),
    #[error("malformed registry response: {0}")]
    MalformedResponse(String),
}
