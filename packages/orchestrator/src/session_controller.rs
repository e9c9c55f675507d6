// Persistent shell sessions: create against a running sandbox, inject raw
// input, run a session-scoped exec, destroy.

use chrono::Utc;

use sandchest_billing::quota_gate;
use sandchest_core::SandchestError;
use sandchest_node_client::NodeClient;
use sandchest_repo::types::{SandboxSession, SandboxStatus, SessionStatus};
use sandchest_repo::{OrgQuotaRepo, SandboxRepo, SessionRepo};

use crate::types::CreateSessionInput;

const DEFAULT_SHELL: &str = "/bin/bash";

pub struct SessionController<'a> {
    pub sandboxes: &'a SandboxRepo,
    pub sessions: &'a SessionRepo,
    pub quotas: &'a OrgQuotaRepo,
    pub node_client: &'a dyn NodeClient,
}

impl<'a> SessionController<'a> {
    pub async fn create(&self, input: CreateSessionInput) -> Result<SandboxSession, SandchestError> {
        let sandbox = self
            .sandboxes
            .find_by_id(&input.sandbox_id, &input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::not_found(format!("sandbox {} not found", input.sandbox_id)))?;
        if sandbox.status != SandboxStatus::Running {
            return Err(SandchestError::sandbox_not_running(format!(
                "sandbox {} is not running",
                input.sandbox_id
            )));
        }

        let quota = self.quotas.get(&input.org_id).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        let active = self
            .sessions
            .count_active(&input.sandbox_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        quota_gate::check_sessions_per_sandbox(&quota, active)?;

        let shell = input.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string());
        let id = sandchest_core::ids::Id::generate(sandchest_core::ids::Prefix::Session).to_string();
        let now = Utc::now();
        let session = SandboxSession {
            id: id.clone(),
            sandbox_id: input.sandbox_id.clone(),
            org_id: input.org_id.clone(),
            shell: shell.clone(),
            status: SessionStatus::Running,
            destroyed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.node_client
            .create_session(&input.sandbox_id, &id, &shell)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        let created = self.sessions.create(session).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .touch_last_activity(&input.sandbox_id, &input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        Ok(created)
    }

    pub async fn get(&self, id: &str, org_id: &str) -> Result<SandboxSession, SandchestError> {
        self.sessions
            .find_by_id(id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::not_found(format!("session {id} not found")))
    }

    /// Forwards raw bytes to the guest shell without any framing.
    pub async fn input(&self, id: &str, org_id: &str, data: &[u8]) -> Result<(), SandchestError> {
        let session = self.get(id, org_id).await?;
        if session.status != SessionStatus::Running {
            return Err(SandchestError::conflict(format!("session {id} is not running")));
        }
        self.node_client.session_input(id, data).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .touch_last_activity(&session.sandbox_id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))
    }

    /// Idempotent: destroying an already-destroyed session is a no-op.
    pub async fn destroy(&self, id: &str, org_id: &str) -> Result<(), SandchestError> {
        let session = self.get(id, org_id).await?;
        if session.status == SessionStatus::Running {
            let _ = self.node_client.destroy_session(id).await;
        }
        self.sessions.destroy(id, org_id).await.map_err(|e| SandchestError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandchest_node_client::FakeNodeClient;
    use sandchest_repo::types::{Env, Sandbox};

    async fn setup() -> (SandboxRepo, SessionRepo, OrgQuotaRepo, FakeNodeClient) {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        (SandboxRepo::new(pool.clone()), SessionRepo::new(pool.clone()), OrgQuotaRepo::new(pool), FakeNodeClient::new())
    }

    fn running_sandbox(id: &str, org_id: &str) -> Sandbox {
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
            status: SandboxStatus::Running,
            env: Env::new(),
            forked_from: None,
            fork_depth: 0,
            fork_count: 0,
            ttl_seconds: 3600,
            failure_reason: None,
            replay_public: false,
            replay_expires_at: None,
            last_activity_at: Some(now),
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn create_defaults_shell_to_bash() {
        let (sandboxes, sessions, quotas, node_client) = setup().await;
        sandboxes.create(running_sandbox("sb_1", "org_1")).await.unwrap();
        node_client
            .create_sandbox(&sandchest_node_client::SandboxSpec {
                sandbox_id: "sb_1".to_string(),
                image_ref: "sandchest://linux/ubuntu-22.04".to_string(),
                cpu_cores: 1,
                memory_mb: 1024,
                env: Env::new(),
            })
            .await
            .unwrap();
        let controller = SessionController { sandboxes: &sandboxes, sessions: &sessions, quotas: &quotas, node_client: &node_client };

        let session = controller
            .create(CreateSessionInput { org_id: "org_1".to_string(), sandbox_id: "sb_1".to_string(), shell: None })
            .await
            .unwrap();

        assert_eq!(session.shell, "/bin/bash");
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn create_against_stopped_sandbox_is_rejected() {
        let (sandboxes, sessions, quotas, node_client) = setup().await;
        let mut stopped = running_sandbox("sb_1", "org_1");
        stopped.status = SandboxStatus::Stopped;
        sandboxes.create(stopped).await.unwrap();
        let controller = SessionController { sandboxes: &sandboxes, sessions: &sessions, quotas: &quotas, node_client: &node_client };

        let err = controller
            .create(CreateSessionInput { org_id: "org_1".to_string(), sandbox_id: "sb_1".to_string(), shell: None })
            .await
            .unwrap_err();

        assert_eq!(err.kind, sandchest_core::ErrorKind::SandboxNotRunning);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let (sandboxes, sessions, quotas, node_client) = setup().await;
        sandboxes.create(running_sandbox("sb_1", "org_1")).await.unwrap();
        node_client
            .create_sandbox(&sandchest_node_client::SandboxSpec {
                sandbox_id: "sb_1".to_string(),
                image_ref: "sandchest://linux/ubuntu-22.04".to_string(),
                cpu_cores: 1,
                memory_mb: 1024,
                env: Env::new(),
            })
            .await
            .unwrap();
        let controller = SessionController { sandboxes: &sandboxes, sessions: &sessions, quotas: &quotas, node_client: &node_client };
        let session = controller
            .create(CreateSessionInput { org_id: "org_1".to_string(), sandbox_id: "sb_1".to_string(), shell: None })
            .await
            .unwrap();

        controller.destroy(&session.id, "org_1").await.unwrap();
        controller.destroy(&session.id, "org_1").await.unwrap();

        let fetched = controller.get(&session.id, "org_1").await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Destroyed);
    }
}
