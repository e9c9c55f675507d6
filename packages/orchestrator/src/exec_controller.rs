// Exec admission, the sync run-to-completion path, the async queue path, and
// SSE-style event replay for a single exec's output buffer.

use chrono::Utc;
use serde_json::json;

use sandchest_billing::billing_gate::BillingGate;
use sandchest_billing::quota_gate;
use sandchest_core::SandchestError;
use sandchest_kv::types::Event;
use sandchest_kv::Kv;
use sandchest_node_client::{ExecRequest, NodeClient};
use sandchest_repo::types::{CmdFormat, Env, Exec, ExecStatus, SandboxStatus};
use sandchest_repo::{ExecRepo, ExecStatusPatch, OrgQuotaRepo, SandboxRepo};

use crate::types::{CmdInput, CreateExecInput, ExecOutcomeResponse};

const DEFAULT_TIMEOUT_SECONDS: i64 = 300;
const SYNC_WAIT_CEILING_SECONDS: i64 = 300;
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
const EVENT_BUFFER_TTL_SECONDS: u64 = 3600;

pub struct ExecController<'a> {
    pub sandboxes: &'a SandboxRepo,
    pub execs: &'a ExecRepo,
    pub quotas: &'a OrgQuotaRepo,
    pub billing: &'a BillingGate,
    pub kv: &'a dyn Kv,
    pub node_client: &'a dyn NodeClient,
}

fn normalize_cmd(cmd: CmdInput) -> Result<(String, CmdFormat, Vec<String>), SandchestError> {
    match cmd {
        CmdInput::Array(argv) => {
            if argv.is_empty() {
                return Err(SandchestError::validation("cmd must not be empty"));
            }
            let cmd = serde_json::to_string(&argv).map_err(|e| SandchestError::internal(e.to_string()))?;
            Ok((cmd, CmdFormat::Array, argv))
        }
        CmdInput::Shell(shell) => {
            if shell.trim().is_empty() {
                return Err(SandchestError::validation("cmd must not be empty"));
            }
            let argv = vec!["/bin/sh".to_string(), "-c".to_string(), shell.clone()];
            Ok((shell, CmdFormat::Shell, argv))
        }
    }
}

impl<'a> ExecController<'a> {
    pub async fn create(
        &self,
        user_id: &str,
        input: CreateExecInput,
    ) -> Result<ExecOutcomeResponse, SandchestError> {
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

        let (cmd, cmd_format, argv) = normalize_cmd(input.cmd)?;

        let quota = self.quotas.get(&input.org_id).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        let timeout_seconds = input.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        if !(1..=i64::MAX).contains(&timeout_seconds) {
            return Err(SandchestError::validation("timeout_seconds must be at least 1"));
        }
        quota_gate::check_exec_timeout(&quota, timeout_seconds)?;
        if input.wait && timeout_seconds > SYNC_WAIT_CEILING_SECONDS {
            return Err(SandchestError::validation(format!(
                "timeout_seconds {timeout_seconds} exceeds the synchronous wait ceiling of {SYNC_WAIT_CEILING_SECONDS}"
            )));
        }

        let decision = self.billing.check(&input.org_id, "exec_create").await?;
        if !decision.allowed {
            return Err(SandchestError::billing_limit(
                decision.reason.unwrap_or_else(|| "monthly exec_create limit reached".to_string()),
            ));
        }

        let mut env = sandbox.env.clone();
        env.extend(input.env);
        let cwd = input.cwd.unwrap_or_else(|| "/root".to_string());

        let seq = self
            .execs
            .next_seq(&input.sandbox_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        let id = sandchest_core::ids::Id::generate(sandchest_core::ids::Prefix::Exec).to_string();
        let now = Utc::now();

        if !input.wait {
            let exec = Exec {
                id: id.clone(),
                sandbox_id: input.sandbox_id.clone(),
                session_id: input.session_id,
                org_id: input.org_id.clone(),
                seq,
                cmd,
                cmd_format,
                cwd,
                env,
                status: ExecStatus::Queued,
                exit_code: None,
                cpu_ms: None,
                peak_memory_bytes: None,
                duration_ms: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                ended_at: None,
            };
            self.execs.create(exec).await.map_err(|e| SandchestError::internal(e.to_string()))?;
            self.billing.track(user_id, &input.org_id, "exec_create").await;
            return Ok(ExecOutcomeResponse {
                exec_id: id,
                status: "queued",
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let exec = Exec {
            id: id.clone(),
            sandbox_id: input.sandbox_id.clone(),
            session_id: input.session_id,
            org_id: input.org_id.clone(),
            seq,
            cmd,
            cmd_format,
            cwd: cwd.clone(),
            env: env.clone(),
            status: ExecStatus::Running,
            exit_code: None,
            cpu_ms: None,
            peak_memory_bytes: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            ended_at: None,
        };
        self.execs.create(exec).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .touch_last_activity(&input.sandbox_id, &input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let request = ExecRequest {
            sandbox_id: input.sandbox_id.clone(),
            exec_id: id.clone(),
            cmd: argv,
            cwd,
            env,
            timeout_seconds: timeout_seconds as u64,
        };
        let outcome = self
            .node_client
            .exec(&request)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let mut buffer_seq = 0u64;
        if !outcome.stdout.is_empty() {
            buffer_seq += 1;
            self.push_event(&id, buffer_seq, json!({"t": "stdout", "data": String::from_utf8_lossy(&outcome.stdout)}))
                .await;
        }
        if !outcome.stderr.is_empty() {
            buffer_seq += 1;
            self.push_event(&id, buffer_seq, json!({"t": "stderr", "data": String::from_utf8_lossy(&outcome.stderr)}))
                .await;
        }
        buffer_seq += 1;
        self.push_event(
            &id,
            buffer_seq,
            json!({
                "t": "exit",
                "code": outcome.exit_code,
                "duration_ms": outcome.duration_ms,
                "resource_usage": {
                    "cpu_ms": outcome.resource_usage.cpu_ms,
                    "peak_memory_bytes": outcome.resource_usage.peak_memory_bytes,
                },
            }),
        )
        .await;

        let final_status = if outcome.timed_out { ExecStatus::TimedOut } else { ExecStatus::Done };
        self.execs
            .update_status(
                &id,
                &input.org_id,
                final_status,
                ExecStatusPatch {
                    ended_at: Some(Utc::now()),
                    exit_code: Some(outcome.exit_code),
                    cpu_ms: Some(outcome.resource_usage.cpu_ms as i64),
                    peak_memory_bytes: Some(outcome.resource_usage.peak_memory_bytes as i64),
                    duration_ms: Some(outcome.duration_ms as i64),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        self.billing.track(user_id, &input.org_id, "exec_create").await;

        Ok(ExecOutcomeResponse {
            exec_id: id,
            status: if outcome.timed_out { "timed_out" } else { "done" },
            exit_code: Some(outcome.exit_code),
            stdout: truncate_utf8(&outcome.stdout),
            stderr: truncate_utf8(&outcome.stderr),
        })
    }

    pub async fn get(&self, id: &str, org_id: &str) -> Result<Exec, SandchestError> {
        self.execs
            .find_by_id(id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::not_found(format!("exec {id} not found")))
    }

    /// Events with `seq > last_event_id`, framed by the caller as
    /// `id: <seq>\ndata: <json>\n\n`. Returns an empty vec when there is
    /// nothing new; that is not an error.
    pub async fn stream(&self, exec_id: &str, last_event_id: Option<u64>) -> Vec<Event> {
        self.kv.get_exec_events(exec_id, last_event_id.unwrap_or(0)).await
    }

    async fn push_event(&self, exec_id: &str, seq: u64, data: serde_json::Value) {
        self.kv.push_exec_event(exec_id, Event { seq, ts: Utc::now(), data }, EVENT_BUFFER_TTL_SECONDS).await;
    }
}

fn truncate_utf8(bytes: &[u8]) -> String {
    let capped = if bytes.len() > MAX_RESPONSE_BYTES { &bytes[..MAX_RESPONSE_BYTES] } else { bytes };
    String::from_utf8_lossy(capped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandchest_billing::billing_gate::BillingLimits;
    use sandchest_kv::InMemoryKv;
    use sandchest_node_client::FakeNodeClient;
    use sandchest_repo::types::{Sandbox, SandboxStatus as Status};
    use sandchest_repo::{SandboxRepo, UsageRepo};

    async fn setup() -> (SandboxRepo, ExecRepo, OrgQuotaRepo, BillingGate, InMemoryKv, FakeNodeClient) {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        let sandboxes = SandboxRepo::new(pool.clone());
        let execs = ExecRepo::new(pool.clone());
        let quotas = OrgQuotaRepo::new(pool.clone());
        let billing = BillingGate::new(UsageRepo::new(pool), BillingLimits::default());
        (sandboxes, execs, quotas, billing, InMemoryKv::default(), FakeNodeClient::new())
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
            status: Status::Running,
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
    async fn echo_exec_returns_stdout_and_pushes_events() {
        let (sandboxes, execs, quotas, billing, kv, node_client) = setup().await;
        sandboxes.create(running_sandbox("sb_1", "org_1")).await.unwrap();
        node_client.create_sandbox(&sandchest_node_client::SandboxSpec {
            sandbox_id: "sb_1".to_string(),
            image_ref: "sandchest://linux/ubuntu-22.04".to_string(),
            cpu_cores: 1,
            memory_mb: 1024,
            env: Env::new(),
        }).await.unwrap();
        let controller = ExecController { sandboxes: &sandboxes, execs: &execs, quotas: &quotas, billing: &billing, kv: &kv, node_client: &node_client };

        let response = controller
            .create(
                "user_1",
                CreateExecInput {
                    org_id: "org_1".to_string(),
                    sandbox_id: "sb_1".to_string(),
                    session_id: None,
                    cmd: CmdInput::Array(vec!["echo".to_string(), "hello".to_string()]),
                    cwd: None,
                    env: Env::new(),
                    timeout_seconds: None,
                    wait: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.status, "done");
        assert_eq!(response.exit_code, Some(0));
        assert_eq!(response.stdout.trim(), "hello");

        let events = controller.stream(&response.exec_id, None).await;
        assert!(events.iter().any(|e| e.data["t"] == "stdout"));
        assert!(events.iter().any(|e| e.data["t"] == "exit"));
    }

    #[tokio::test]
    async fn exec_against_non_running_sandbox_is_rejected() {
        let (sandboxes, execs, quotas, billing, kv, node_client) = setup().await;
        let mut queued = running_sandbox("sb_1", "org_1");
        queued.status = Status::Queued;
        sandboxes.create(queued).await.unwrap();
        let controller = ExecController { sandboxes: &sandboxes, execs: &execs, quotas: &quotas, billing: &billing, kv: &kv, node_client: &node_client };

        let err = controller
            .create(
                "user_1",
                CreateExecInput {
                    org_id: "org_1".to_string(),
                    sandbox_id: "sb_1".to_string(),
                    session_id: None,
                    cmd: CmdInput::Shell("echo hi".to_string()),
                    cwd: None,
                    env: Env::new(),
                    timeout_seconds: None,
                    wait: true,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, sandchest_core::ErrorKind::SandboxNotRunning);
    }

    #[tokio::test]
    async fn empty_cmd_array_is_a_validation_error() {
        let (sandboxes, execs, quotas, billing, kv, node_client) = setup().await;
        sandboxes.create(running_sandbox("sb_1", "org_1")).await.unwrap();
        let controller = ExecController { sandboxes: &sandboxes, execs: &execs, quotas: &quotas, billing: &billing, kv: &kv, node_client: &node_client };

        let err = controller
            .create(
                "user_1",
                CreateExecInput {
                    org_id: "org_1".to_string(),
                    sandbox_id: "sb_1".to_string(),
                    session_id: None,
                    cmd: CmdInput::Array(vec![]),
                    cwd: None,
                    env: Env::new(),
                    timeout_seconds: None,
                    wait: true,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, sandchest_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn async_path_queues_without_calling_the_node() {
        let (sandboxes, execs, quotas, billing, kv, node_client) = setup().await;
        sandboxes.create(running_sandbox("sb_1", "org_1")).await.unwrap();
        let controller = ExecController { sandboxes: &sandboxes, execs: &execs, quotas: &quotas, billing: &billing, kv: &kv, node_client: &node_client };

        let response = controller
            .create(
                "user_1",
                CreateExecInput {
                    org_id: "org_1".to_string(),
                    sandbox_id: "sb_1".to_string(),
                    session_id: None,
                    cmd: CmdInput::Array(vec!["sleep".to_string(), "1".to_string()]),
                    cwd: None,
                    env: Env::new(),
                    timeout_seconds: None,
                    wait: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.status, "queued");
        let exec = controller.get(&response.exec_id, "org_1").await.unwrap();
        assert_eq!(exec.status, ExecStatus::Queued);
    }
}
