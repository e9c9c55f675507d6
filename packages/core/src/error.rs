// ABOUTME: Closed error taxonomy shared by every Sandchest crate
// ABOUTME: Maps to HTTP status/code/retry semantics in the `api` crate's formatter

use std::fmt;

use thiserror::Error;

/// The closed set of error kinds the control plane can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Forbidden,
    NotFound,
    Conflict,
    SandboxNotRunning,
    QuotaExceeded,
    RateLimited,
    BillingLimit,
    NoCapacity,
    NodeUnavailable,
    NodeLost,
    Internal,
    NotImplemented,
    Timeout,
}

impl ErrorKind {
    /// Stable machine-readable code returned to API clients.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::SandboxNotRunning => "sandbox_not_running",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BillingLimit => "billing_limit",
            ErrorKind::NoCapacity => "no_capacity",
            ErrorKind::NodeUnavailable => "node_unavailable",
            ErrorKind::NodeLost => "node_lost",
            ErrorKind::Internal => "internal",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// HTTP status code this kind maps to.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Forbidden | ErrorKind::BillingLimit => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::SandboxNotRunning => 409,
            ErrorKind::QuotaExceeded | ErrorKind::RateLimited => 429,
            ErrorKind::NoCapacity | ErrorKind::NodeUnavailable => 503,
            ErrorKind::NodeLost | ErrorKind::Internal => 500,
            ErrorKind::NotImplemented => 501,
            ErrorKind::Timeout => 504,
        }
    }

    /// Whether responses of this kind carry a non-null `retry_after`.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::NoCapacity | ErrorKind::NodeUnavailable
        )
    }
}

/// The uniform error carried by every fallible operation in the control plane.
#[derive(Debug, Error)]
pub struct SandchestError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl SandchestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn sandbox_not_running(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SandboxNotRunning, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn billing_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BillingLimit, message)
    }

    pub fn no_capacity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoCapacity, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

impl fmt::Display for SandchestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}
