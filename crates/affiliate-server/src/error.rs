//! Service-layer errors and their mapping onto HTTP responses.

use affiliate_api::ApiError;
use affiliate_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AffiliateError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Affiliate not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Configuration(String),

    #[error("Request to main server timed out")]
    UpstreamTimeout,

    #[error("Unable to connect to main server: {0}")]
    UpstreamUnreachable(String),

    #[error("Main server error: {0}")]
    UpstreamStatus(u16),

    #[error("Invalid response from main server: {0}")]
    InvalidUpstreamResponse(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A blocking ledger task panicked or was cancelled.
    #[error("Ledger task failed: {0}")]
    Internal(String),
}

impl AffiliateError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_configured() -> Self {
        Self::Configuration("External service not configured".into())
    }

    pub(crate) fn join_failed(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }

    /// Label used for the `relay_requests_total` outcome dimension.
    pub fn relay_outcome(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Configuration(_) => "not_configured",
            Self::UpstreamTimeout => "timeout",
            Self::UpstreamUnreachable(_) => "unreachable",
            Self::UpstreamStatus(_) => "upstream_error",
            Self::InvalidUpstreamResponse(_) => "invalid_response",
            Self::NotFound(_) | Self::Ledger(_) | Self::Internal(_) => "internal",
        }
    }
}

impl From<AffiliateError> for ApiError {
    fn from(err: AffiliateError) -> Self {
        match err {
            AffiliateError::InvalidInput(msg) => ApiError::bad_request(msg),
            AffiliateError::NotFound(_) => ApiError::not_found(err.to_string()),
            AffiliateError::Configuration(msg) => ApiError::internal(msg),
            AffiliateError::UpstreamTimeout => {
                ApiError::gateway_timeout("Service temporarily unavailable")
            }
            AffiliateError::UpstreamUnreachable(_) => {
                ApiError::service_unavailable(err.to_string())
            }
            AffiliateError::UpstreamStatus(_) | AffiliateError::InvalidUpstreamResponse(_) => {
                ApiError::bad_gateway(err.to_string())
            }
            AffiliateError::Ledger(e) if e.is_invalid_input() => ApiError::bad_request(e.to_string()),
            AffiliateError::Ledger(e) => {
                tracing::error!(error = %e, category = %e.category(), "Ledger operation failed");
                ApiError::internal(e.to_string())
            }
            AffiliateError::Internal(msg) => {
                tracing::error!(error = %msg, "Ledger task failed");
                ApiError::internal("Internal server error")
            }
        }
    }
}
