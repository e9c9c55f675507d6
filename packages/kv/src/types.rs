use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single event appended to an exec or replay buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub data: JsonValue,
}

/// Result of a rate limit check against a `(orgId, category)` bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}
