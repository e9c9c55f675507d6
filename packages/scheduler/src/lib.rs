// ABOUTME: First-fit node+slot placement and slot lease lifecycle
// ABOUTME: Favors simplicity and locality on the first online node; fairness comes from org quotas

use tracing::debug;

use sandchest_core::SandchestError;
use sandchest_kv::Kv;
use sandchest_repo::NodeRepo;

/// Initial lease TTL granted to a freshly scheduled slot.
pub const SLOT_LEASE_TTL_SECONDS: u64 = 60;
/// Interval at which a running sandbox's slot lease is renewed.
pub const SLOT_LEASE_RENEWAL_INTERVAL_SECONDS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    pub node_id: String,
    pub slot: u32,
}

pub struct Scheduler<'a> {
    nodes: &'a NodeRepo,
    kv: &'a dyn Kv,
}

impl<'a> Scheduler<'a> {
    pub fn new(nodes: &'a NodeRepo, kv: &'a dyn Kv) -> Self {
        Self { nodes, kv }
    }

    /// Fetches online nodes ordered by name then id, and on each one tries
    /// slot indices `0..slots_total` until a lease acquire succeeds. The
    /// first success wins; `no_capacity` otherwise.
    pub async fn schedule(&self, sandbox_id: &str) -> Result<SlotAssignment, SandchestError> {
        let nodes = self
            .nodes
            .list_online()
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        if nodes.is_empty() {
            return Err(SandchestError::no_capacity("No online nodes available"));
        }

        for node in &nodes {
            for slot in 0..node.slots_total as u32 {
                if self
                    .kv
                    .acquire_slot_lease(&node.id, slot, sandbox_id, SLOT_LEASE_TTL_SECONDS)
                    .await
                {
                    debug!(node_id = %node.id, slot, sandbox_id, "scheduled sandbox");
                    return Ok(SlotAssignment { node_id: node.id.clone(), slot });
                }
            }
        }

        Err(SandchestError::no_capacity("All nodes are at capacity"))
    }

    /// Renews a running sandbox's slot lease. A `false` result means the
    /// lease already expired; the caller should treat the sandbox as lost.
    pub async fn renew(&self, node_id: &str, slot: u32) -> bool {
        self.kv.renew_slot_lease(node_id, slot, SLOT_LEASE_TTL_SECONDS).await
    }

    pub async fn release(&self, node_id: &str, slot: u32) {
        self.kv.release_slot_lease(node_id, slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandchest_kv::InMemoryKv;
    use sandchest_repo::types::{Node, NodeStatus};
    use chrono::Utc;

    async fn setup() -> (NodeRepo, InMemoryKv) {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        (NodeRepo::new(pool), InMemoryKv::default())
    }

    fn online_node(id: &str, name: &str, slots_total: i64) -> Node {
        Node {
            id: id.to_string(),
            name: name.to_string(),
            hostname: format!("{name}.sandchest.internal"),
            slots_total,
            status: NodeStatus::Online,
            last_seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn schedules_onto_the_first_available_slot() {
        let (nodes, kv) = setup().await;
        nodes.upsert(online_node("node_a", "alpha", 2)).await.unwrap();
        let scheduler = Scheduler::new(&nodes, &kv);

        let assignment = scheduler.schedule("sb_1").await.unwrap();
        assert_eq!(assignment.node_id, "node_a");
        assert_eq!(assignment.slot, 0);
    }

    #[tokio::test]
    async fn falls_through_to_a_free_slot_on_the_same_node() {
        let (nodes, kv) = setup().await;
        nodes.upsert(online_node("node_a", "alpha", 2)).await.unwrap();
        let scheduler = Scheduler::new(&nodes, &kv);

        scheduler.schedule("sb_1").await.unwrap();
        let second = scheduler.schedule("sb_2").await.unwrap();
        assert_eq!(second.slot, 1);
    }

    #[tokio::test]
    async fn no_online_nodes_fails_with_the_expected_message() {
        let (nodes, kv) = setup().await;
        let scheduler = Scheduler::new(&nodes, &kv);

        let err = scheduler.schedule("sb_1").await.unwrap_err();
        assert_eq!(err.kind, sandchest_core::ErrorKind::NoCapacity);
        assert_eq!(err.message, "No online nodes available");
    }

    #[tokio::test]
    async fn full_capacity_fails_with_the_expected_message() {
        let (nodes, kv) = setup().await;
        nodes.upsert(online_node("node_a", "alpha", 1)).await.unwrap();
        let scheduler = Scheduler::new(&nodes, &kv);

        scheduler.schedule("sb_1").await.unwrap();
        let err = scheduler.schedule("sb_2").await.unwrap_err();
        assert_eq!(err.message, "All nodes are at capacity");
    }

    #[tokio::test]
    async fn renew_fails_once_the_lease_is_released() {
        let (nodes, kv) = setup().await;
        nodes.upsert(online_node("node_a", "alpha", 1)).await.unwrap();
        let scheduler = Scheduler::new(&nodes, &kv);

        scheduler.schedule("sb_1").await.unwrap();
        scheduler.release("node_a", 0).await;
        assert!(!scheduler.renew("node_a", 0).await);
    }
}
