// =============================================================================
// Error taxonomy — surface kinds, not types (spec.md §7)
// =============================================================================
//
// `CoreError` is the one error enum HTTP handlers return. Internal helper
// functions keep using `anyhow::Result` with `.context(...)`, the way the
// teacher's `runtime_config.rs` and `reconcile.rs` do; `CoreError` exists at
// the boundary where a kind needs to become a stable HTTP status code.
// =============================================================================

use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("adapter error (retryable): {0}")]
    AdapterRetryable(String),

    #[error("adapter error (fatal): reason={reason_code} detail={detail}")]
    AdapterFatal { reason_code: String, detail: String },

    #[error("rule violation: {0}")]
    RuleViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::AdapterRetryable(_) => StatusCode::BAD_GATEWAY,
            Self::AdapterFatal { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RuleViolation(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether an `AdapterError` is retryable — used by the coordinator's
    /// backoff loop to classify `reasonCode`s coming back from a
    /// `BrokerAdapter` (spec.md §4.9).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AdapterRetryable(_))
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if let Self::Internal(ref msg) = self {
            tracing::error!(error = %msg, "internal error on HTTP path");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_adapter_error_is_retryable() {
        let e = CoreError::AdapterRetryable("timeout".into());
        assert!(e.is_retryable());
        assert_eq!(e.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn fatal_adapter_error_is_not_retryable() {
        let e = CoreError::AdapterFatal {
            reason_code: "NO_BP".into(),
            detail: "insufficient buying power".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn rule_violation_maps_to_forbidden() {
        let e = CoreError::RuleViolation("CONTRACT_LIMIT".into());
        assert_eq!(e.status_code(), StatusCode::FORBIDDEN);
    }
}
