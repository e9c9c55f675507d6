// Translates the control plane's closed error taxonomy into HTTP responses.
// Handlers never build a response body by hand; they return `Result<_, AppError>`
// and let this module pick the status, code and `Retry-After` header.

use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nanoid::nanoid;
use serde::Serialize;
use tracing::{error, info, warn};

use sandchest_core::{ErrorKind, SandchestError};

/// Wraps [`SandchestError`] so this crate can implement `IntoResponse` for it
/// without running into the orphan rule.
#[derive(Debug)]
pub struct AppError(pub SandchestError);

pub type ApiResult<T> = Result<T, AppError>;

impl From<SandchestError> for AppError {
    fn from(err: SandchestError) -> Self {
        Self(err)
    }
}

impl From<sandchest_storage::StorageError> for AppError {
    fn from(err: sandchest_storage::StorageError) -> Self {
        Self(SandchestError::internal(err.to_string()))
    }
}

impl From<sandchest_node_client::NodeClientError> for AppError {
    fn from(err: sandchest_node_client::NodeClientError) -> Self {
        use sandchest_node_client::NodeClientError as E;
        let sandchest_err = match err {
            E::Unavailable(msg) => SandchestError::new(ErrorKind::NodeUnavailable, msg),
            E::Timeout(seconds) => SandchestError::timeout(format!("exec timed out after {seconds}s")),
            E::Rpc(msg) => SandchestError::internal(msg),
            E::Io(e) => SandchestError::internal(e.to_string()),
        };
        Self(sandchest_err)
    }
}

impl From<sandchest_orchestrator::ObjectStoreError> for AppError {
    fn from(err: sandchest_orchestrator::ObjectStoreError) -> Self {
        use sandchest_orchestrator::ObjectStoreError as E;
        let sandchest_err = match err {
            E::NotFound(key) => SandchestError::not_found(format!("object {key} not found")),
            E::Io(e) => SandchestError::internal(e.to_string()),
        };
        Self(sandchest_err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<HashMap<String, String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = format!("req_{}", nanoid!());
        let kind = self.0.kind;
        let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match kind {
            ErrorKind::Internal => {
                error!(request_id = %request_id, error = %self.0.message, "internal error");
            }
            ErrorKind::Forbidden | ErrorKind::Authentication => {
                warn!(request_id = %request_id, code = kind.code(), audit = true, "access denied");
            }
            ErrorKind::RateLimited | ErrorKind::NoCapacity | ErrorKind::NodeUnavailable => {
                warn!(request_id = %request_id, code = kind.code(), "transient failure");
            }
            _ => {
                info!(request_id = %request_id, code = kind.code(), "api error response");
            }
        }

        // Internal failures never leak their message to the caller.
        let message = if matches!(kind, ErrorKind::Internal) {
            "an internal error occurred".to_string()
        } else {
            self.0.message.clone()
        };

        let retry_after = if kind.is_transient() { self.0.retry_after.or(Some(1)) } else { None };

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail { code: kind.code(), message, retry_after, details: None },
            request_id,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_never_leak_their_message() {
        let err = AppError(SandchestError::internal("database password leaked: hunter2"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn quota_exceeded_maps_to_429_without_retry_after() {
        let err = AppError(SandchestError::quota_exceeded("too many sandboxes"));
        assert_eq!(err.0.kind.http_status(), 429);
        assert!(!err.0.kind.is_transient());
    }

    #[test]
    fn no_capacity_is_transient_and_gets_a_default_retry_after() {
        let response = AppError(SandchestError::no_capacity("all nodes busy")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("retry-after"));
    }
}
