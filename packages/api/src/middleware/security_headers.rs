use axum::http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Applies a fixed set of defensive response headers to every reply. The
/// control plane is a JSON API with no same-origin HTML to protect, so the
/// policy is deliberately locked down rather than tuned for asset loading.
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    enable_hsts: bool,
}

impl SecurityHeadersLayer {
    pub fn new() -> Self {
        Self { enable_hsts: false }
    }

    /// Only call this once the deployment terminates TLS in front of the service.
    pub fn with_hsts(mut self) -> Self {
        self.enable_hsts = true;
        self
    }
}

impl Default for SecurityHeadersLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, service: S) -> Self::Service {
        SecurityHeadersService { service, enable_hsts: self.enable_hsts }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    service: S,
    enable_hsts: bool,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SecurityHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = SecurityHeadersFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let enable_hsts = self.enable_hsts;
        let future = self.service.call(request);
        SecurityHeadersFuture { future, enable_hsts }
    }
}

#[pin_project::pin_project]
pub struct SecurityHeadersFuture<F> {
    #[pin]
    future: F,
    enable_hsts: bool,
}

impl<F, ResBody, E> std::future::Future for SecurityHeadersFuture<F>
where
    F: std::future::Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let response = std::task::ready!(this.future.poll(cx))?;
        let mut response = response;
        add_security_headers(response.headers_mut(), *this.enable_hsts);
        Poll::Ready(Ok(response))
    }
}

fn add_security_headers(headers: &mut axum::http::HeaderMap, enable_hsts: bool) {
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert("referrer-policy", HeaderValue::from_static("strict-origin-when-cross-origin"));

    // No inline scripts or styles are ever served by this API.
    let csp = "default-src 'none'; frame-ancestors 'none'";
    headers.insert("content-security-policy", HeaderValue::from_static(csp));

    let permissions_policy = "geolocation=(), microphone=(), camera=(), payment=(), usb=()";
    headers.insert("permissions-policy", HeaderValue::from_static(permissions_policy));

    if enable_hsts {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
    }

    headers.remove("server");
}
