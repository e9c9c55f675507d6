// Per-org, per-category rate limiting. Unlike the in-process `governor`
// limiter this mirrors, buckets live behind the `Kv` trait so every control
// plane instance enforces the same budget instead of each process keeping
// its own counter.

use axum::{extract::State, http::Request, middleware::Next, response::Response};

use sandchest_auth::AuthContext;

use crate::{error::AppError, AppState};

const WINDOW_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy)]
enum Category {
    SandboxCreate,
    ExecCreate,
    FilePut,
    Other,
}

impl Category {
    fn as_str(self) -> &'static str {
        match self {
            Category::SandboxCreate => "sandbox_create",
            Category::ExecCreate => "exec_create",
            Category::FilePut => "file_put",
            Category::Other => "other",
        }
    }

    /// Requests per minute budget for the category.
    fn limit(self) -> u32 {
        match self {
            Category::SandboxCreate => 30,
            Category::ExecCreate => 120,
            Category::FilePut => 60,
            Category::Other => 300,
        }
    }
}

fn categorize(method: &axum::http::Method, path: &str) -> Category {
    use axum::http::Method;
    if method == Method::POST && path == "/v1/sandboxes" {
        Category::SandboxCreate
    } else if method == Method::POST && path.ends_with("/execs") {
        Category::ExecCreate
    } else if method == Method::PUT && path.contains("/files") {
        Category::FilePut
    } else {
        Category::Other
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let category = categorize(request.method(), request.uri().path());
    let org_id = request
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.org_id.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let outcome = state
        .kv
        .check_rate_limit(&org_id, category.as_str(), category.limit(), WINDOW_SECONDS)
        .await;

    if !outcome.allowed {
        let retry_after = (outcome.reset_at - chrono::Utc::now()).num_seconds().max(1) as u64;
        return Err(sandchest_core::SandchestError::new(
            sandchest_core::ErrorKind::RateLimited,
            format!("rate limit exceeded for {}", category.as_str()),
        )
        .with_retry_after(retry_after)
        .into());
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(limit) = category.limit().to_string().parse() {
        headers.insert("x-ratelimit-limit", limit);
    }
    if let Ok(remaining) = outcome.remaining.to_string().parse() {
        headers.insert("x-ratelimit-remaining", remaining);
    }
    Ok(response)
}
