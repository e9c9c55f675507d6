use async_trait::async_trait;

use crate::types::{Event, RateLimitOutcome};

/// The single KV abstraction every crate above this one depends on.
///
/// Every operation is total: it returns promptly rather than blocking
/// indefinitely, and is safe to call concurrently from many tasks.
#[async_trait]
pub trait Kv: Send + Sync {
    /// SETNX-like: succeeds only if no lease currently exists for this slot.
    async fn acquire_slot_lease(
        &self,
        node_id: &str,
        slot: u32,
        sandbox_id: &str,
        ttl_seconds: u64,
    ) -> bool;

    /// Unconditional, idempotent delete of a slot lease.
    async fn release_slot_lease(&self, node_id: &str, slot: u32);

    /// Extends an existing lease's TTL; does nothing and returns `false` if absent.
    async fn renew_slot_lease(&self, node_id: &str, slot: u32, ttl_seconds: u64) -> bool;

    /// Sliding-window rate check for a `(orgId, category)` bucket. The first
    /// call in a window initializes it; the counter decrements only when
    /// `allowed` is true.
    async fn check_rate_limit(
        &self,
        org_id: &str,
        category: &str,
        limit: u32,
        window_seconds: u64,
    ) -> RateLimitOutcome;

    /// Append to a capped, TTL-refreshing event buffer for an exec id.
    async fn push_exec_event(&self, exec_id: &str, event: Event, ttl_seconds: u64);

    /// Entries with `seq > after_seq`, in increasing seq order.
    async fn get_exec_events(&self, exec_id: &str, after_seq: u64) -> Vec<Event>;

    /// Append to a capped, TTL-refreshing event buffer for a sandbox's replay.
    async fn push_replay_event(&self, sandbox_id: &str, event: Event, ttl_seconds: u64);

    /// Entries with `seq > after_seq`, in increasing seq order.
    async fn get_replay_events(&self, sandbox_id: &str, after_seq: u64) -> Vec<Event>;

    /// Adds paths to a sandbox's deduplicated artifact path set; returns how
    /// many were newly added.
    async fn add_artifact_paths(&self, sandbox_id: &str, paths: &[String]) -> usize;

    async fn get_artifact_paths(&self, sandbox_id: &str) -> Vec<String>;

    async fn count_artifact_paths(&self, sandbox_id: &str) -> usize;

    /// Non-reentrant leader election: succeeds only if no other instance
    /// currently holds the lock for this worker name.
    async fn acquire_leader_lock(&self, worker_name: &str, instance_id: &str, ttl_ms: u64)
    -> bool;

    async fn register_node_heartbeat(&self, node_id: &str, ttl_seconds: u64);

    async fn has_node_heartbeat(&self, node_id: &str) -> bool;

    /// Idempotent single-fire flag; returns `true` only the first time it is
    /// set for a given sandbox within the TTL window.
    async fn mark_ttl_warned(&self, sandbox_id: &str, ttl_seconds: u64) -> bool;

    async fn ping(&self) -> bool;
}
