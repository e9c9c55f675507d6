// Background sweepers: TTL expiry, TTL warning, idle timeout, stuck-queue
// cleanup, and replay expiry/purge. Each acquires a leader lock per worker
// name before running an iteration, so only one control-plane instance
// does the work even when several are deployed side by side. A failing
// sweep logs and moves on; it never propagates to a caller because nothing
// calls these synchronously from the request path.

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};

use sandchest_core::SandchestError;
use sandchest_kv::Kv;
use sandchest_node_client::NodeClient;
use sandchest_repo::types::{FailureReason, Sandbox, SandboxStatus};
use sandchest_repo::{SandboxRepo, StatusPatch};
use sandchest_scheduler::Scheduler;

use crate::object_store::ObjectStore;

const TTL_WARNING_THRESHOLD_SECONDS: i64 = 300;
const IDLE_TIMEOUT_SECONDS: i64 = 1800;
const STUCK_QUEUE_SECONDS: i64 = 120;
const REPLAY_RETENTION_SECONDS: i64 = 30 * 24 * 3600;
const REPLAY_PURGE_WINDOW_SECONDS: i64 = 3600;
const LEADER_LOCK_TTL_MS: u64 = 15_000;
const TTL_WARNED_TTL_SECONDS: u64 = 24 * 3600;

pub struct Sweepers<'a> {
    pub sandboxes: &'a SandboxRepo,
    pub kv: &'a dyn Kv,
    pub scheduler: Scheduler<'a>,
    pub node_client: &'a dyn NodeClient,
    pub object_store: &'a dyn ObjectStore,
    pub instance_id: String,
}

impl<'a> Sweepers<'a> {
    async fn is_leader(&self, worker_name: &str) -> bool {
        self.kv.acquire_leader_lock(worker_name, &self.instance_id, LEADER_LOCK_TTL_MS).await
    }

    /// `startedAt + ttlSeconds < now`: force-stop with `ttl_exceeded`.
    pub async fn sweep_ttl_expiry(&self) -> usize {
        if !self.is_leader("ttl_sweep").await {
            return 0;
        }
        match self.sandboxes.find_expired_ttl().await {
            Ok(expired) => {
                let mut count = 0;
                for sandbox in expired {
                    if let Err(e) = self.force_stop(&sandbox, FailureReason::TtlExceeded).await {
                        error!(sandbox_id = %sandbox.id, error = %e, "ttl sweep failed to stop sandbox");
                        continue;
                    }
                    count += 1;
                }
                if count > 0 {
                    info!(count, "ttl sweep stopped expired sandboxes");
                }
                count
            }
            Err(e) => {
                error!(error = %e, "ttl sweep failed to query expired sandboxes");
                0
            }
        }
    }

    /// One-shot warning, guarded by `markTtlWarned` so it fires exactly once
    /// per sandbox within the warning window.
    pub async fn sweep_ttl_warning(&self) -> usize {
        if !self.is_leader("ttl_warning_sweep").await {
            return 0;
        }
        let near_expiry = match self.sandboxes.find_near_ttl_expiry(TTL_WARNING_THRESHOLD_SECONDS).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "ttl warning sweep failed to query sandboxes");
                return 0;
            }
        };
        let mut warned = 0;
        for sandbox in near_expiry {
            if self.kv.mark_ttl_warned(&sandbox.id, TTL_WARNED_TTL_SECONDS).await {
                warned += 1;
            }
        }
        warned
    }

    /// `lastActivityAt` (fallback `startedAt`, fallback `createdAt`) older
    /// than the idle cutoff: force-stop with `idle_timeout`.
    pub async fn sweep_idle(&self) -> usize {
        if !self.is_leader("idle_sweep").await {
            return 0;
        }
        let cutoff = Utc::now() - ChronoDuration::seconds(IDLE_TIMEOUT_SECONDS);
        match self.sandboxes.find_idle_since(cutoff).await {
            Ok(idle) => {
                let mut count = 0;
                for sandbox in idle {
                    if let Err(e) = self.force_stop(&sandbox, FailureReason::IdleTimeout).await {
                        error!(sandbox_id = %sandbox.id, error = %e, "idle sweep failed to stop sandbox");
                        continue;
                    }
                    count += 1;
                }
                count
            }
            Err(e) => {
                error!(error = %e, "idle sweep failed to query idle sandboxes");
                0
            }
        }
    }

    /// A sandbox stuck `queued` past the admission window never got
    /// scheduled; rather than retry indefinitely, fail it so the caller
    /// sees a terminal state instead of a request that never resolves.
    pub async fn sweep_stuck_queue(&self) -> usize {
        if !self.is_leader("orphan_sweep").await {
            return 0;
        }
        let cutoff = Utc::now() - ChronoDuration::seconds(STUCK_QUEUE_SECONDS);
        match self.sandboxes.find_queued_before(cutoff).await {
            Ok(stuck) => {
                let mut count = 0;
                for sandbox in stuck {
                    let result = self
                        .sandboxes
                        .update_status(
                            &sandbox.id,
                            &sandbox.org_id,
                            SandboxStatus::Failed,
                            StatusPatch {
                                ended_at: Some(Utc::now()),
                                failure_reason: Some(FailureReason::CapacityTimeout),
                                ..Default::default()
                            },
                        )
                        .await;
                    if let Err(e) = result {
                        error!(sandbox_id = %sandbox.id, error = %e, "orphan sweep failed to fail stuck sandbox");
                        continue;
                    }
                    warn!(sandbox_id = %sandbox.id, "orphan sweep failed a sandbox stuck in queued");
                    count += 1;
                }
                count
            }
            Err(e) => {
                error!(error = %e, "orphan sweep failed to query stuck sandboxes");
                0
            }
        }
    }

    /// On terminal transition, `replayExpiresAt` defaults to
    /// `endedAt + replayRetention` if not already set.
    pub async fn sweep_replay_expiry(&self) -> usize {
        if !self.is_leader("replay_expiry_sweep").await {
            return 0;
        }
        let missing = match self.sandboxes.find_missing_replay_expiry().await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "replay expiry sweep failed to query sandboxes");
                return 0;
            }
        };
        let mut count = 0;
        for sandbox in missing {
            let ended_at = sandbox.ended_at.unwrap_or_else(Utc::now);
            let expires_at = ended_at + ChronoDuration::seconds(REPLAY_RETENTION_SECONDS);
            if let Err(e) = self.sandboxes.set_replay_expires_at(&sandbox.id, &sandbox.org_id, expires_at).await {
                error!(sandbox_id = %sandbox.id, error = %e, "replay expiry sweep failed to set expiry");
                continue;
            }
            count += 1;
        }
        count
    }

    /// Deletes object-storage replay data for sandboxes whose
    /// `replayExpiresAt` has fallen into the purge window.
    pub async fn sweep_replay_purge(&self) -> usize {
        if !self.is_leader("replay_purge_sweep").await {
            return 0;
        }
        let cutoff = Utc::now();
        let min_date = cutoff - ChronoDuration::seconds(REPLAY_PURGE_WINDOW_SECONDS);
        let purgable = match self.sandboxes.find_purgable_replays(cutoff, min_date).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "replay purge sweep failed to query sandboxes");
                return 0;
            }
        };
        let mut count = 0;
        for sandbox in purgable {
            let key = format!("replays/{}/events.jsonl", sandbox.id);
            if let Err(e) = self.object_store.delete(&key).await {
                error!(sandbox_id = %sandbox.id, error = %e, "replay purge sweep failed to delete replay data");
                continue;
            }
            count += 1;
        }
        count
    }

    async fn force_stop(&self, sandbox: &Sandbox, reason: FailureReason) -> Result<(), SandchestError> {
        self.sandboxes
            .update_status(&sandbox.id, &sandbox.org_id, SandboxStatus::Stopping, StatusPatch { failure_reason: Some(reason), ..Default::default() })
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let _ = self.node_client.stop_sandbox(&sandbox.id).await;
        if let (Some(node_id), Some(slot)) = (&sandbox.node_id, sandbox.slot) {
            self.scheduler.release(node_id, slot as u32).await;
        }

        self.sandboxes
            .update_status(
                &sandbox.id,
                &sandbox.org_id,
                SandboxStatus::Stopped,
                StatusPatch { ended_at: Some(Utc::now()), failure_reason: Some(reason) },
            )
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandchest_kv::InMemoryKv;
    use sandchest_node_client::FakeNodeClient;
    use sandchest_repo::types::Env;

    async fn setup() -> (SandboxRepo, sandchest_repo::NodeRepo, InMemoryKv, FakeNodeClient, tempfile::TempDir) {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        (SandboxRepo::new(pool.clone()), sandchest_repo::NodeRepo::new(pool), InMemoryKv::default(), FakeNodeClient::new(), dir)
    }

    fn sandbox_started(id: &str, org_id: &str, started_at: chrono::DateTime<Utc>, ttl_seconds: i64) -> Sandbox {
        Sandbox {
            id: id.to_string(),
            org_id: org_id.to_string(),
            node_id: Some("node_a".to_string()),
            slot: Some(0),
            image_id: "img_ubuntu2204".to_string(),
            image_ref: "sandchest://linux/ubuntu-22.04".to_string(),
            profile_id: "prof_small".to_string(),
            profile_name: "small".to_string(),
            status: SandboxStatus::Running,
            env: Env::new(),
            forked_from: None,
            fork_depth: 0,
            fork_count: 0,
            ttl_seconds,
            failure_reason: None,
            replay_public: false,
            replay_expires_at: None,
            last_activity_at: Some(started_at),
            created_at: started_at,
            updated_at: started_at,
            started_at: Some(started_at),
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn ttl_sweep_stops_an_expired_sandbox() {
        let (sandboxes, nodes, kv, node_client, dir) = setup().await;
        let store = crate::object_store::LocalObjectStore::new(dir.path());
        let long_ago = Utc::now() - ChronoDuration::seconds(120);
        sandboxes.create(sandbox_started("sb_1", "org_1", long_ago, 60)).await.unwrap();

        let sweepers = Sweepers {
            sandboxes: &sandboxes,
            kv: &kv,
            scheduler: Scheduler::new(&nodes, &kv),
            node_client: &node_client,
            object_store: &store,
            instance_id: "instance_a".to_string(),
        };

        let count = sweepers.sweep_ttl_expiry().await;
        assert_eq!(count, 1);

        let sandbox = sandboxes.find_by_id("sb_1", "org_1").await.unwrap().unwrap();
        assert_eq!(sandbox.status, SandboxStatus::Stopped);
        assert_eq!(sandbox.failure_reason, Some(FailureReason::TtlExceeded));
    }

    #[tokio::test]
    async fn replay_expiry_sweep_sets_expiry_once_after_termination() {
        let (sandboxes, nodes, kv, node_client, dir) = setup().await;
        let store = crate::object_store::LocalObjectStore::new(dir.path());
        let mut stopped = sandbox_started("sb_1", "org_1", Utc::now(), 3600);
        stopped.status = SandboxStatus::Stopped;
        stopped.ended_at = Some(Utc::now());
        sandboxes.create(stopped).await.unwrap();

        let sweepers = Sweepers {
            sandboxes: &sandboxes,
            kv: &kv,
            scheduler: Scheduler::new(&nodes, &kv),
            node_client: &node_client,
            object_store: &store,
            instance_id: "instance_a".to_string(),
        };

        assert_eq!(sweepers.sweep_replay_expiry().await, 1);
        let sandbox = sandboxes.find_by_id("sb_1", "org_1").await.unwrap().unwrap();
        assert!(sandbox.replay_expires_at.is_some());
    }
}
