// ABOUTME: In-process implementation of the `Kv` trait over `DashMap`
// ABOUTME: Entries carry their own expiry and are lazily evicted on access, as in a TTL cache

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

use crate::kv_trait::Kv;
use crate::types::{Event, RateLimitOutcome};

/// Cap on how many entries an exec/replay event buffer retains before the
/// oldest are dropped.
const EVENT_BUFFER_CAP: usize = 4096;

fn now() -> DateTime<Utc> {
    Utc::now()
}

struct Lease {
    sandbox_id: String,
    expires_at: DateTime<Utc>,
}

struct RateWindow {
    remaining: u32,
    limit: u32,
    reset_at: DateTime<Utc>,
}

struct EventBuffer {
    events: Vec<Event>,
    expires_at: DateTime<Utc>,
}

struct LeaderLock {
    instance_id: String,
    expires_at: DateTime<Utc>,
}

/// Default, process-local `Kv` backend. Suitable for a single control-plane
/// instance or as the fake used by tests; a multi-instance deployment would
/// swap this for a shared store behind the same trait.
#[derive(Default)]
pub struct InMemoryKv {
    slot_leases: DashMap<(String, u32), Lease>,
    rate_limits: DashMap<(String, String), RateWindow>,
    exec_events: DashMap<String, EventBuffer>,
    replay_events: DashMap<String, EventBuffer>,
    artifact_paths: DashMap<String, HashSet<String>>,
    leader_locks: DashMap<String, LeaderLock>,
    node_heartbeats: DashMap<String, DateTime<Utc>>,
    ttl_warned: DashMap<String, DateTime<Utc>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_event(buffers: &DashMap<String, EventBuffer>, key: &str, event: Event, ttl_seconds: u64) {
        let expires_at = now() + ChronoDuration::seconds(ttl_seconds as i64);
        match buffers.get_mut(key) {
            Some(mut buffer) => {
                buffer.events.push(event);
                if buffer.events.len() > EVENT_BUFFER_CAP {
                    let drop_count = buffer.events.len() - EVENT_BUFFER_CAP;
                    buffer.events.drain(0..drop_count);
                }
                buffer.expires_at = expires_at;
            }
            None => {
                buffers.insert(
                    key.to_string(),
                    EventBuffer {
                        events: vec![event],
                        expires_at,
                    },
                );
            }
        }
    }

    fn get_events(buffers: &DashMap<String, EventBuffer>, key: &str, after_seq: u64) -> Vec<Event> {
        match buffers.get(key) {
            Some(buffer) if buffer.expires_at > now() => buffer
                .events
                .iter()
                .filter(|e| e.seq > after_seq)
                .cloned()
                .collect(),
            Some(_) => {
                buffers.remove(key);
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl Kv for InMemoryKv {
    async fn acquire_slot_lease(
        &self,
        node_id: &str,
        slot: u32,
        sandbox_id: &str,
        ttl_seconds: u64,
    ) -> bool {
        let key = (node_id.to_string(), slot);
        if let Some(existing) = self.slot_leases.get(&key) {
            if existing.expires_at > now() {
                return false;
            }
        }
        self.slot_leases.insert(
            key,
            Lease {
                sandbox_id: sandbox_id.to_string(),
                expires_at: now() + ChronoDuration::seconds(ttl_seconds as i64),
            },
        );
        true
    }

    async fn release_slot_lease(&self, node_id: &str, slot: u32) {
        self.slot_leases.remove(&(node_id.to_string(), slot));
    }

    async fn renew_slot_lease(&self, node_id: &str, slot: u32, ttl_seconds: u64) -> bool {
        let key = (node_id.to_string(), slot);
        match self.slot_leases.get_mut(&key) {
            Some(mut lease) if lease.expires_at > now() => {
                lease.expires_at = now() + ChronoDuration::seconds(ttl_seconds as i64);
                true
            }
            Some(_) => {
                drop(self.slot_leases.remove(&key));
                false
            }
            None => false,
        }
    }

    async fn check_rate_limit(
        &self,
        org_id: &str,
        category: &str,
        limit: u32,
        window_seconds: u64,
    ) -> RateLimitOutcome {
        let key = (org_id.to_string(), category.to_string());
        let window = ChronoDuration::seconds(window_seconds as i64);
        let mut entry = self
            .rate_limits
            .entry(key)
            .or_insert_with(|| RateWindow {
                remaining: limit,
                limit,
                reset_at: now() + window,
            });

        if entry.reset_at <= now() || entry.limit != limit {
            entry.remaining = limit;
            entry.limit = limit;
            entry.reset_at = now() + window;
        }

        let allowed = entry.remaining > 0;
        if allowed {
            entry.remaining -= 1;
        }

        RateLimitOutcome {
            allowed,
            remaining: entry.remaining,
            reset_at: entry.reset_at,
        }
    }

    async fn push_exec_event(&self, exec_id: &str, event: Event, ttl_seconds: u64) {
        Self::push_event(&self.exec_events, exec_id, event, ttl_seconds);
    }

    async fn get_exec_events(&self, exec_id: &str, after_seq: u64) -> Vec<Event> {
        Self::get_events(&self.exec_events, exec_id, after_seq)
    }

    async fn push_replay_event(&self, sandbox_id: &str, event: Event, ttl_seconds: u64) {
        Self::push_event(&self.replay_events, sandbox_id, event, ttl_seconds);
    }

    async fn get_replay_events(&self, sandbox_id: &str, after_seq: u64) -> Vec<Event> {
        Self::get_events(&self.replay_events, sandbox_id, after_seq)
    }

    async fn add_artifact_paths(&self, sandbox_id: &str, paths: &[String]) -> usize {
        let mut set = self.artifact_paths.entry(sandbox_id.to_string()).or_default();
        let mut added = 0;
        for path in paths {
            if set.insert(path.clone()) {
                added += 1;
            }
        }
        added
    }

    async fn get_artifact_paths(&self, sandbox_id: &str) -> Vec<String> {
        self.artifact_paths
            .get(sandbox_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn count_artifact_paths(&self, sandbox_id: &str) -> usize {
        self.artifact_paths.get(sandbox_id).map(|set| set.len()).unwrap_or(0)
    }

    async fn acquire_leader_lock(
        &self,
        worker_name: &str,
        instance_id: &str,
        ttl_ms: u64,
    ) -> bool {
        let now_ts = now();
        if let Some(existing) = self.leader_locks.get(worker_name) {
            if existing.expires_at > now_ts && existing.instance_id != instance_id {
                return false;
            }
        }
        self.leader_locks.insert(
            worker_name.to_string(),
            LeaderLock {
                instance_id: instance_id.to_string(),
                expires_at: now_ts + ChronoDuration::milliseconds(ttl_ms as i64),
            },
        );
        true
    }

    async fn register_node_heartbeat(&self, node_id: &str, ttl_seconds: u64) {
        self.node_heartbeats
            .insert(node_id.to_string(), now() + ChronoDuration::seconds(ttl_seconds as i64));
    }

    async fn has_node_heartbeat(&self, node_id: &str) -> bool {
        match self.node_heartbeats.get(node_id) {
            Some(expires_at) if *expires_at > now() => true,
            Some(_) => {
                self.node_heartbeats.remove(node_id);
                false
            }
            None => false,
        }
    }

    async fn mark_ttl_warned(&self, sandbox_id: &str, ttl_seconds: u64) -> bool {
        let now_ts = now();
        if let Some(existing) = self.ttl_warned.get(sandbox_id) {
            if *existing > now_ts {
                return false;
            }
        }
        self.ttl_warned
            .insert(sandbox_id.to_string(), now_ts + ChronoDuration::seconds(ttl_seconds as i64));
        true
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(seq: u64) -> Event {
        Event {
            seq,
            ts: now(),
            data: json!({"t": "stdout", "data": "x"}),
        }
    }

    #[tokio::test]
    async fn slot_lease_acquires_once_until_released() {
        let kv = InMemoryKv::new();
        assert!(kv.acquire_slot_lease("node-1", 0, "sb_a", 60).await);
        assert!(!kv.acquire_slot_lease("node-1", 0, "sb_b", 60).await);
        kv.release_slot_lease("node-1", 0).await;
        assert!(kv.acquire_slot_lease("node-1", 0, "sb_b", 60).await);
    }

    #[tokio::test]
    async fn renew_fails_once_lease_is_gone() {
        let kv = InMemoryKv::new();
        assert!(!kv.renew_slot_lease("node-1", 0, 60).await);
        kv.acquire_slot_lease("node-1", 0, "sb_a", 60).await;
        assert!(kv.renew_slot_lease("node-1", 0, 60).await);
    }

    #[tokio::test]
    async fn rate_limit_decrements_until_exhausted() {
        let kv = InMemoryKv::new();
        let first = kv.check_rate_limit("org_1", "sandbox_create", 2, 60).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        let second = kv.check_rate_limit("org_1", "sandbox_create", 2, 60).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        let third = kv.check_rate_limit("org_1", "sandbox_create", 2, 60).await;
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test]
    async fn rate_limit_is_scoped_per_org_and_category() {
        let kv = InMemoryKv::new();
        kv.check_rate_limit("org_1", "sandbox_create", 1, 60).await;
        let other_org = kv.check_rate_limit("org_2", "sandbox_create", 1, 60).await;
        assert!(other_org.allowed);
        let other_category = kv.check_rate_limit("org_1", "exec", 1, 60).await;
        assert!(other_category.allowed);
    }

    #[tokio::test]
    async fn exec_events_return_in_order_after_given_seq() {
        let kv = InMemoryKv::new();
        kv.push_exec_event("ex_1", event(1), 60).await;
        kv.push_exec_event("ex_1", event(2), 60).await;
        kv.push_exec_event("ex_1", event(3), 60).await;

        let all = kv.get_exec_events("ex_1", 0).await;
        assert_eq!(all.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);

        let after_one = kv.get_exec_events("ex_1", 1).await;
        assert_eq!(after_one.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn replay_events_are_keyed_separately_from_exec_events() {
        let kv = InMemoryKv::new();
        kv.push_exec_event("shared_key", event(1), 60).await;
        kv.push_replay_event("shared_key", event(9), 60).await;

        assert_eq!(kv.get_exec_events("shared_key", 0).await.len(), 1);
        assert_eq!(kv.get_replay_events("shared_key", 0).await.len(), 1);
    }

    #[tokio::test]
    async fn artifact_paths_deduplicate() {
        let kv = InMemoryKv::new();
        let added = kv
            .add_artifact_paths("sb_1", &["/out/a.txt".into(), "/out/b.txt".into()])
            .await;
        assert_eq!(added, 2);
        let added_again = kv
            .add_artifact_paths("sb_1", &["/out/a.txt".into(), "/out/c.txt".into()])
            .await;
        assert_eq!(added_again, 1);
        assert_eq!(kv.count_artifact_paths("sb_1").await, 3);
    }

    #[tokio::test]
    async fn leader_lock_is_not_reentrant_across_instances() {
        let kv = InMemoryKv::new();
        assert!(kv.acquire_leader_lock("ttl_sweeper", "instance-a", 10_000).await);
        assert!(!kv.acquire_leader_lock("ttl_sweeper", "instance-b", 10_000).await);
        assert!(kv.acquire_leader_lock("ttl_sweeper", "instance-a", 10_000).await);
    }

    #[tokio::test]
    async fn node_heartbeat_reports_presence_until_ttl_elapses() {
        let kv = InMemoryKv::new();
        assert!(!kv.has_node_heartbeat("node-1").await);
        kv.register_node_heartbeat("node-1", 60).await;
        assert!(kv.has_node_heartbeat("node-1").await);
    }

    #[tokio::test]
    async fn ttl_warned_fires_exactly_once() {
        let kv = InMemoryKv::new();
        assert!(kv.mark_ttl_warned("sb_1", 300).await);
        assert!(!kv.mark_ttl_warned("sb_1", 300).await);
    }

    #[tokio::test]
    async fn ping_always_succeeds() {
        let kv = InMemoryKv::new();
        assert!(kv.ping().await);
    }
}
