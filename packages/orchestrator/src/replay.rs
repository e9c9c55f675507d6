// Assembles the replay bundle for a sandbox: metadata, its exec/session/
// artifact history, and the fork subtree rooted at its top-level ancestor.
// The companion event stream (exec/replay SSE) reuses the same KV buffer
// semantics as the exec controller's stream.

use sandchest_core::SandchestError;
use sandchest_kv::types::Event;
use sandchest_kv::Kv;
use sandchest_repo::types::Sandbox;
use sandchest_repo::{ArtifactRepo, ExecListFilter, ExecRepo, SandboxRepo, SessionRepo};

use crate::types::{replay_status, ReplayAccess, ReplayBundle};

pub struct ReplayAggregator<'a> {
    pub sandboxes: &'a SandboxRepo,
    pub execs: &'a ExecRepo,
    pub sessions: &'a SessionRepo,
    pub artifacts: &'a ArtifactRepo,
    pub kv: &'a dyn Kv,
}

impl<'a> ReplayAggregator<'a> {
    /// Resolves access and loads the sandbox: an authenticated caller may
    /// view any replay within their org; an unauthenticated caller may
    /// only view sandboxes with `replayPublic = true`.
    async fn resolve(&self, id: &str, org_id: Option<&str>) -> Result<(Sandbox, ReplayAccess), SandchestError> {
        match org_id {
            Some(org_id) => {
                let sandbox = self
                    .sandboxes
                    .find_by_id(id, org_id)
                    .await
                    .map_err(|e| SandchestError::internal(e.to_string()))?
                    .ok_or_else(|| SandchestError::not_found(format!("sandbox {id} not found")))?;
                Ok((sandbox, ReplayAccess::Private))
            }
            None => {
                let sandbox = self
                    .sandboxes
                    .find_by_id_public(id)
                    .await
                    .map_err(|e| SandchestError::internal(e.to_string()))?
                    .ok_or_else(|| SandchestError::not_found(format!("sandbox {id} not found")))?;
                Ok((sandbox, ReplayAccess::Public))
            }
        }
    }

    pub async fn bundle(&self, id: &str, org_id: Option<&str>) -> Result<(ReplayBundle, ReplayAccess), SandchestError> {
        let (sandbox, access) = self.resolve(id, org_id).await?;
        let org_id = &sandbox.org_id;

        let fork_tree = self
            .sandboxes
            .get_fork_tree(id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::not_found(format!("sandbox {id} not found")))?;

        let execs = self
            .execs
            .list(id, org_id, ExecListFilter::default())
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .rows;
        let sessions = self
            .sessions
            .list(id, org_id, None, None)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .rows;
        let artifacts = self
            .artifacts
            .list(id, org_id, None, None)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .rows;

        let total_duration_ms = match (sandbox.started_at, sandbox.ended_at) {
            (Some(started), Some(ended)) => Some((ended - started).num_milliseconds()),
            _ => None,
        };

        let bundle = ReplayBundle {
            version: 1,
            sandbox_id: sandbox.id.clone(),
            status: replay_status(&sandbox),
            image: sandbox.image_ref.clone(),
            profile: sandbox.profile_name.clone(),
            started_at: sandbox.started_at,
            ended_at: sandbox.ended_at,
            total_duration_ms,
            forked_from: sandbox.forked_from.clone(),
            fork_tree,
            execs,
            sessions,
            artifacts,
            events_url: format!("/v1/sandboxes/{}/replay/events", sandbox.id),
        };

        Ok((bundle, access))
    }

    pub async fn stream(&self, sandbox_id: &str, last_event_id: Option<u64>) -> Vec<Event> {
        self.kv.get_replay_events(sandbox_id, last_event_id.unwrap_or(0)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sandchest_kv::InMemoryKv;
    use sandchest_repo::types::{Env, SandboxStatus};

    async fn setup() -> (SandboxRepo, ExecRepo, SessionRepo, ArtifactRepo, InMemoryKv) {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        (
            SandboxRepo::new(pool.clone()),
            ExecRepo::new(pool.clone()),
            SessionRepo::new(pool.clone()),
            ArtifactRepo::new(pool),
            InMemoryKv::default(),
        )
    }

    fn stopped_sandbox(id: &str, org_id: &str, replay_public: bool) -> Sandbox {
        let now = Utc::now();
        Sandbox {
            id: id.to_string(),
            org_id: org_id.to_string(),
            node_id: Some("node_a".to_string()),
            slot: Some(0),
            image_id: "img_ubuntu2204".to_string(),
            image_ref: "sandchest://linux/ubuntu-22.04".to_string(),
            profile_id: "prof_small".to_string(),
            profile_name: "small".to_string(),
            status: SandboxStatus::Stopped,
            env: Env::new(),
            forked_from: None,
            fork_depth: 0,
            fork_count: 0,
            ttl_seconds: 3600,
            failure_reason: None,
            replay_public,
            replay_expires_at: None,
            last_activity_at: Some(now),
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            ended_at: Some(now),
        }
    }

    #[tokio::test]
    async fn unauthenticated_caller_can_view_a_public_replay() {
        let (sandboxes, execs, sessions, artifacts, kv) = setup().await;
        sandboxes.create(stopped_sandbox("sb_1", "org_1", true)).await.unwrap();
        let aggregator = ReplayAggregator { sandboxes: &sandboxes, execs: &execs, sessions: &sessions, artifacts: &artifacts, kv: &kv };

        let (bundle, access) = aggregator.bundle("sb_1", None).await.unwrap();
        assert_eq!(bundle.status, "complete");
        assert!(matches!(access, ReplayAccess::Public));
    }

    #[tokio::test]
    async fn unauthenticated_caller_cannot_view_a_private_replay() {
        let (sandboxes, execs, sessions, artifacts, kv) = setup().await;
        sandboxes.create(stopped_sandbox("sb_1", "org_1", false)).await.unwrap();
        let aggregator = ReplayAggregator { sandboxes: &sandboxes, execs: &execs, sessions: &sessions, artifacts: &artifacts, kv: &kv };

        let err = aggregator.bundle("sb_1", None).await.unwrap_err();
        assert_eq!(err.kind, sandchest_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn authenticated_caller_sees_duration_once_sandbox_has_ended() {
        let (sandboxes, execs, sessions, artifacts, kv) = setup().await;
        sandboxes.create(stopped_sandbox("sb_1", "org_1", false)).await.unwrap();
        let aggregator = ReplayAggregator { sandboxes: &sandboxes, execs: &execs, sessions: &sessions, artifacts: &artifacts, kv: &kv };

        let (bundle, _) = aggregator.bundle("sb_1", Some("org_1")).await.unwrap();
        assert!(bundle.total_duration_ms.is_some());
    }
}
