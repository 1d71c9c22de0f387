//! Crate-wide error taxonomy (§7). Every public async fn in this crate returns
//! `Result<T, CoreError>`; provider adapters speak the narrower [`ProviderError`] and are
//! lifted into `CoreError` at the orchestrator boundary.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("offline")]
    Offline,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("deadline exceeded")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("provider rejected credentials")]
    AuthMissing,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("provider server error ({status})")]
    ServerError { status: u16 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::RateLimited { .. }
                | CoreError::ServerError { .. }
                | CoreError::Network(_)
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            CoreError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Short, stable string used on the wire (`{ error: ... }` frames).
    pub fn wire_code(&self) -> &'static str {
        match self {
            CoreError::Offline => "offline",
            CoreError::Network(_) => "network",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::Timeout => "timeout",
            CoreError::Cancelled => "cancelled",
            CoreError::AuthMissing => "auth_missing",
            CoreError::BadRequest(_) => "bad_request",
            CoreError::ServerError { .. } => "server_error",
            CoreError::Internal(_) => "internal",
            CoreError::Storage(_) => "storage",
            CoreError::Config(_) => "config",
        }
    }
}

/// Client-visible error frame, structured-cloneable (§6).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrame {
    pub error: String,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

impl From<&CoreError> for ErrorFrame {
    fn from(err: &CoreError) -> Self {
        ErrorFrame {
            error: err.wire_code().to_string(),
            retryable: err.retryable(),
            retry_after_ms: err.retry_after_ms(),
        }
    }
}

/// Errors a provider adapter may raise. Distinct from [`CoreError`] because adapters live
/// behind a trait object boundary and should not need to know about orchestrator-level
/// concerns (cancellation propagation is folded in here since an adapter's own I/O can be
/// cancelled mid-flight).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited { retry_after_ms: u64 },
    #[error("missing credentials")]
    AuthMissing,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("server error ({status})")]
    ServerError { status: u16 },
    #[error("cancelled")]
    Cancelled,
    #[error("timeout")]
    Timeout,
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::ServerError { .. }
        )
    }
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Network(msg) => CoreError::Network(msg),
            ProviderError::RateLimited { retry_after_ms } => {
                CoreError::RateLimited { retry_after_ms }
            }
            ProviderError::AuthMissing => CoreError::AuthMissing,
            ProviderError::BadRequest(msg) => CoreError::BadRequest(msg),
            ProviderError::ServerError { status } => CoreError::ServerError { status },
            ProviderError::Cancelled => CoreError::Cancelled,
            ProviderError::Timeout => CoreError::Timeout,
        }
    }
}
