// Sandbox lifecycle: admission, the state machine transitions described in
// the data model, and forking. Background sweepers (sweepers.rs) drive the
// rest of the transitions (ttl/idle/node-lost) outside the request path.

use chrono::Utc;

use sandchest_billing::billing_gate::BillingGate;
use sandchest_billing::quota_gate;
use sandchest_core::SandchestError;
use sandchest_node_client::{NodeClient, SandboxSpec};
use sandchest_repo::types::{Env, FailureReason, Sandbox, SandboxStatus};
use sandchest_repo::{catalog, ForkInput, OrgQuotaRepo, SandboxRepo, StatusPatch};
use sandchest_scheduler::Scheduler;

use crate::types::{CreateSandboxInput, ForkSandboxInput};

pub struct SandboxController<'a> {
    pub sandboxes: &'a SandboxRepo,
    pub quotas: &'a OrgQuotaRepo,
    pub billing: &'a BillingGate,
    pub scheduler: Scheduler<'a>,
    pub node_client: &'a dyn NodeClient,
}

impl<'a> SandboxController<'a> {
    /// Admits a new sandbox: billing and quota checks, scheduling, then
    /// provisioning on the assigned node. On any failure after the row is
    /// inserted, the row is left in a terminal `failed` state rather than
    /// removed, so the caller can still retrieve the failure reason.
    pub async fn create(&self, input: CreateSandboxInput) -> Result<Sandbox, SandchestError> {
        let decision = self.billing.check(&input.org_id, "sandbox_create").await?;
        if !decision.allowed {
            return Err(SandchestError::billing_limit(
                decision.reason.unwrap_or_else(|| "monthly sandbox_create limit reached".to_string()),
            ));
        }

        let quota = self.quotas.get(&input.org_id).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        let active = self
            .sandboxes
            .count_active(&input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        quota_gate::check_concurrent_sandboxes(&quota, active)?;

        let image = catalog::find_image(&input.image_id)
            .ok_or_else(|| SandchestError::validation(format!("unknown image id {}", input.image_id)))?;
        let profile = catalog::find_profile_by_name(&input.profile_name)
            .ok_or_else(|| SandchestError::validation(format!("unknown profile {}", input.profile_name)))?;

        let now = Utc::now();
        let id = sandchest_core::ids::Id::generate(sandchest_core::ids::Prefix::Sandbox).to_string();
        let sandbox = Sandbox {
            id: id.clone(),
            org_id: input.org_id.clone(),
            node_id: None,
            slot: None,
            image_id: image.id.to_string(),
            image_ref: image.uri.to_string(),
            profile_id: profile.id.to_string(),
            profile_name: profile.name.to_string(),
            status: SandboxStatus::Queued,
            env: input.env,
            forked_from: None,
            fork_depth: 0,
            fork_count: 0,
            ttl_seconds: input.ttl_seconds,
            failure_reason: None,
            replay_public: false,
            replay_expires_at: None,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
        };
        self.sandboxes.create(sandbox).await.map_err(|e| SandchestError::internal(e.to_string()))?;

        let assignment = match self.scheduler.schedule(&id).await {
            Ok(assignment) => assignment,
            Err(e) => {
                self.fail(&id, &input.org_id, FailureReason::CapacityTimeout).await;
                return Err(e);
            }
        };

        self.sandboxes
            .update_status(&id, &input.org_id, SandboxStatus::Provisioning, StatusPatch::default())
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .assign_node(&id, &input.org_id, &assignment.node_id, assignment.slot)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let spec = SandboxSpec {
            sandbox_id: id.clone(),
            image_ref: image.uri.to_string(),
            cpu_cores: profile.cpu_cores,
            memory_mb: profile.memory_mb,
            env: Env::new(),
        };
        if self.node_client.create_sandbox(&spec).await.is_err() {
            self.scheduler.release(&assignment.node_id, assignment.slot).await;
            self.fail(&id, &input.org_id, FailureReason::ProvisionFailed).await;
            return Err(SandchestError::internal("node failed to provision sandbox"));
        }

        self.sandboxes
            .update_status(
                &id,
                &input.org_id,
                SandboxStatus::Running,
                StatusPatch { started_at: Some(Utc::now()), ..Default::default() },
            )
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .touch_last_activity(&id, &input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        self.billing.track(&input.user_id, &input.org_id, "sandbox_create").await;

        self.sandboxes
            .find_by_id(&id, &input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::internal("sandbox vanished immediately after creation"))
    }

    pub async fn get(&self, id: &str, org_id: &str) -> Result<Sandbox, SandchestError> {
        self.sandboxes
            .find_by_id(id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::not_found(format!("sandbox {id} not found")))
    }

    /// Creates a child sandbox from a `running` parent. The child is placed
    /// on the parent's node (no new scheduling round) and starts `running`
    /// immediately, matching the repo's `createFork` semantics.
    pub async fn fork(&self, input: ForkSandboxInput) -> Result<Sandbox, SandchestError> {
        let parent = self.get(&input.parent_id, &input.org_id).await?;
        if parent.status != SandboxStatus::Running {
            return Err(SandchestError::sandbox_not_running(format!(
                "sandbox {} is not running",
                input.parent_id
            )));
        }

        let quota = self.quotas.get(&input.org_id).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        quota_gate::check_fork_depth(&quota, parent.fork_depth + 1)?;

        let child_id = sandchest_core::ids::Id::generate(sandchest_core::ids::Prefix::Sandbox).to_string();
        let mut child_source = parent.clone();
        child_source.id = child_id.clone();

        let child = self
            .sandboxes
            .create_fork(ForkInput { source: child_source, env: input.env, ttl_seconds: input.ttl_seconds })
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let spec = SandboxSpec {
            sandbox_id: child.id.clone(),
            image_ref: child.image_ref.clone(),
            cpu_cores: 0,
            memory_mb: 0,
            env: Env::new(),
        };
        self.node_client
            .fork_sandbox(&parent.id, &spec)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        self.sandboxes
            .increment_fork_count(&parent.id, &input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        Ok(child)
    }

    /// Explicit stop: `running` -> `stopping`, then the node is asked to
    /// shut the sandbox down and the row moves to `stopped`.
    pub async fn stop(&self, id: &str, org_id: &str) -> Result<(), SandchestError> {
        let sandbox = self.get(id, org_id).await?;
        if sandbox.status != SandboxStatus::Running {
            return Err(SandchestError::sandbox_not_running(format!("sandbox {id} is not running")));
        }

        self.sandboxes
            .update_status(id, org_id, SandboxStatus::Stopping, StatusPatch::default())
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let _ = self.node_client.stop_sandbox(id).await;
        if let (Some(node_id), Some(slot)) = (&sandbox.node_id, sandbox.slot) {
            self.scheduler.release(node_id, slot as u32).await;
        }

        self.sandboxes
            .update_status(
                id,
                org_id,
                SandboxStatus::Stopped,
                StatusPatch { ended_at: Some(Utc::now()), failure_reason: None },
            )
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))
    }

    /// Soft delete: any non-terminal status moves to `deleted`;
    /// `failureReason` is set to `sandbox_deleted` if not already set.
    pub async fn delete(&self, id: &str, org_id: &str) -> Result<(), SandchestError> {
        let sandbox = self.get(id, org_id).await?;
        let _ = self.node_client.destroy_sandbox(id).await;
        if let (Some(node_id), Some(slot)) = (&sandbox.node_id, sandbox.slot) {
            self.scheduler.release(node_id, slot as u32).await;
        }
        self.sandboxes.soft_delete(id, org_id).await.map_err(|e| SandchestError::internal(e.to_string()))
    }

    async fn fail(&self, id: &str, org_id: &str, reason: FailureReason) {
        let _ = self
            .sandboxes
            .update_status(
                id,
                org_id,
                SandboxStatus::Failed,
                StatusPatch { ended_at: Some(Utc::now()), failure_reason: Some(reason) },
            )
            .await;
    }
}
