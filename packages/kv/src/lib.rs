// ABOUTME: Shared key/value abstraction for slot leases, rate limits and event buffers
// ABOUTME: Backed by an in-process DashMap store; swappable behind the `Kv` trait

pub mod memory;
pub mod types;

mod kv_trait;

pub use kv_trait::Kv;
pub use memory::InMemoryKv;
pub use types::{Event, RateLimitOutcome};
