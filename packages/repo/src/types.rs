use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sandchest_storage::StorageError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Queued,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Failed,
    Deleted,
}

impl SandboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxStatus::Queued => "queued",
            SandboxStatus::Provisioning => "provisioning",
            SandboxStatus::Running => "running",
            SandboxStatus::Stopping => "stopping",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Failed => "failed",
            SandboxStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "queued" => Ok(SandboxStatus::Queued),
            "provisioning" => Ok(SandboxStatus::Provisioning),
            "running" => Ok(SandboxStatus::Running),
            "stopping" => Ok(SandboxStatus::Stopping),
            "stopped" => Ok(SandboxStatus::Stopped),
            "failed" => Ok(SandboxStatus::Failed),
            "deleted" => Ok(SandboxStatus::Deleted),
            other => Err(StorageError::InvalidValue {
                field: "sandboxes.status",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxStatus::Stopped | SandboxStatus::Failed | SandboxStatus::Deleted)
    }

    pub fn is_active(self) -> bool {
        matches!(self, SandboxStatus::Queued | SandboxStatus::Provisioning | SandboxStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ProvisionFailed,
    CapacityTimeout,
    NodeLost,
    TtlExceeded,
    IdleTimeout,
    SandboxDeleted,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::ProvisionFailed => "provision_failed",
            FailureReason::CapacityTimeout => "capacity_timeout",
            FailureReason::NodeLost => "node_lost",
            FailureReason::TtlExceeded => "ttl_exceeded",
            FailureReason::IdleTimeout => "idle_timeout",
            FailureReason::SandboxDeleted => "sandbox_deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "provision_failed" => Ok(FailureReason::ProvisionFailed),
            "capacity_timeout" => Ok(FailureReason::CapacityTimeout),
            "node_lost" => Ok(FailureReason::NodeLost),
            "ttl_exceeded" => Ok(FailureReason::TtlExceeded),
            "idle_timeout" => Ok(FailureReason::IdleTimeout),
            "sandbox_deleted" => Ok(FailureReason::SandboxDeleted),
            other => Err(StorageError::InvalidValue {
                field: "sandboxes.failure_reason",
                value: other.to_string(),
            }),
        }
    }
}

pub type Env = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: String,
    pub org_id: String,
    pub node_id: Option<String>,
    pub slot: Option<i64>,
    pub image_id: String,
    pub image_ref: String,
    pub profile_id: String,
    pub profile_name: String,
    pub status: SandboxStatus,
    pub env: Env,
    pub forked_from: Option<String>,
    pub fork_depth: i64,
    pub fork_count: i64,
    pub ttl_seconds: i64,
    pub failure_reason: Option<FailureReason>,
    pub replay_public: bool,
    pub replay_expires_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Destroyed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Destroyed => "destroyed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "destroyed" => Ok(SessionStatus::Destroyed),
            other => Err(StorageError::InvalidValue {
                field: "sandbox_sessions.status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSession {
    pub id: String,
    pub sandbox_id: String,
    pub org_id: String,
    pub shell: String,
    pub status: SessionStatus,
    pub destroyed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Queued,
    Running,
    Done,
    Failed,
    TimedOut,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Queued => "queued",
            ExecStatus::Running => "running",
            ExecStatus::Done => "done",
            ExecStatus::Failed => "failed",
            ExecStatus::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "queued" => Ok(ExecStatus::Queued),
            "running" => Ok(ExecStatus::Running),
            "done" => Ok(ExecStatus::Done),
            "failed" => Ok(ExecStatus::Failed),
            "timed_out" => Ok(ExecStatus::TimedOut),
            other => Err(StorageError::InvalidValue {
                field: "execs.status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdFormat {
    Array,
    Shell,
}

impl CmdFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            CmdFormat::Array => "array",
            CmdFormat::Shell => "shell",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "array" => Ok(CmdFormat::Array),
            "shell" => Ok(CmdFormat::Shell),
            other => Err(StorageError::InvalidValue {
                field: "execs.cmd_format",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exec {
    pub id: String,
    pub sandbox_id: String,
    pub session_id: Option<String>,
    pub org_id: String,
    pub seq: i64,
    pub cmd: String,
    pub cmd_format: CmdFormat,
    pub cwd: String,
    pub env: Env,
    pub status: ExecStatus,
    pub exit_code: Option<i64>,
    pub cpu_ms: Option<i64>,
    pub peak_memory_bytes: Option<i64>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub sandbox_id: String,
    pub org_id: String,
    pub exec_id: Option<String>,
    pub name: String,
    pub mime: String,
    pub bytes: i64,
    pub sha256: String,
    pub object_ref: String,
    pub created_at: DateTime<Utc>,
    pub retention_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Draining,
    Disabled,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Draining => "draining",
            NodeStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            "draining" => Ok(NodeStatus::Draining),
            "disabled" => Ok(NodeStatus::Disabled),
            other => Err(StorageError::InvalidValue {
                field: "nodes.status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub slots_total: i64,
    pub status: NodeStatus,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgQuota {
    pub org_id: String,
    pub max_concurrent_sandboxes: Option<i64>,
    pub max_exec_timeout_seconds: Option<i64>,
    pub max_fork_depth: Option<i64>,
    pub max_sessions_per_sandbox: Option<i64>,
    pub max_file_bytes: Option<i64>,
    pub max_artifact_bytes_per_org: Option<i64>,
}

impl OrgQuota {
    /// The defaults applied when an org has no override row.
    pub fn defaults(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            max_concurrent_sandboxes: Some(10),
            max_exec_timeout_seconds: Some(300),
            max_fork_depth: Some(5),
            max_sessions_per_sandbox: Some(4),
            max_file_bytes: Some(100 * 1024 * 1024),
            max_artifact_bytes_per_org: Some(10 * 1024 * 1024 * 1024),
        }
    }

    /// Merges stored overrides over the default values, field by field.
    pub fn merged_with_defaults(mut self) -> Self {
        let defaults = Self::defaults(self.org_id.clone());
        self.max_concurrent_sandboxes = self.max_concurrent_sandboxes.or(defaults.max_concurrent_sandboxes);
        self.max_exec_timeout_seconds = self.max_exec_timeout_seconds.or(defaults.max_exec_timeout_seconds);
        self.max_fork_depth = self.max_fork_depth.or(defaults.max_fork_depth);
        self.max_sessions_per_sandbox = self.max_sessions_per_sandbox.or(defaults.max_sessions_per_sandbox);
        self.max_file_bytes = self.max_file_bytes.or(defaults.max_file_bytes);
        self.max_artifact_bytes_per_org = self.max_artifact_bytes_per_org.or(defaults.max_artifact_bytes_per_org);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

impl IdempotencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IdempotencyStatus::InProgress => "in_progress",
            IdempotencyStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "in_progress" => Ok(IdempotencyStatus::InProgress),
            "completed" => Ok(IdempotencyStatus::Completed),
            other => Err(StorageError::InvalidValue {
                field: "idempotency_keys.status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub org_id: String,
    pub status: IdempotencyStatus,
    pub response_status: Option<i64>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
}
