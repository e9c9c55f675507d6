//! Cross-cutting HTTP concerns: identity resolution, per-org rate limiting,
//! response security headers and panic containment.

pub mod auth;
pub mod rate_limit;
pub mod security_headers;

pub use auth::auth_middleware;
pub use rate_limit::rate_limit_middleware;
pub use security_headers::SecurityHeadersLayer;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use nanoid::nanoid;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

pub fn create_panic_handler() -> CatchPanicLayer<fn(Box<dyn std::any::Any + Send + 'static>) -> Response> {
    CatchPanicLayer::custom(handle_panic)
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let request_id = format!("req_{}", nanoid!());
    let panic_message = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    error!(request_id = %request_id, panic_message, audit = true, "handler panicked");

    let body = json!({
        "success": false,
        "error": { "code": "internal", "message": "an internal error occurred" },
        "request_id": request_id,
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panic_handler_response_never_leaks_the_panic_message() {
        let response = handle_panic(Box::new("credentials: hunter2".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("hunter2"));
    }
}
