use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use sandchest_repo::types::{Artifact, Exec, Sandbox, SandboxSession};

pub struct CreateSandboxInput {
    pub org_id: String,
    pub user_id: String,
    pub image_id: String,
    pub profile_name: String,
    pub env: HashMap<String, String>,
    pub ttl_seconds: i64,
}

pub struct ForkSandboxInput {
    pub org_id: String,
    pub parent_id: String,
    pub env: HashMap<String, String>,
    pub ttl_seconds: i64,
}

/// `cmd` as given by the caller, before normalization to argv form.
pub enum CmdInput {
    Array(Vec<String>),
    Shell(String),
}

pub struct CreateExecInput {
    pub org_id: String,
    pub sandbox_id: String,
    pub session_id: Option<String>,
    pub cmd: CmdInput,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout_seconds: Option<i64>,
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcomeResponse {
    pub exec_id: String,
    pub status: &'static str,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
}

pub struct CreateSessionInput {
    pub org_id: String,
    pub sandbox_id: String,
    pub shell: Option<String>,
}

pub struct PutFileInput {
    pub org_id: String,
    pub sandbox_id: String,
    pub path: String,
    pub data: Vec<u8>,
    pub batch: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PutFileResponse {
    pub path: String,
    pub bytes_written: u64,
    pub batch: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntryResponse {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileEntryResponse>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayBundle {
    pub version: u8,
    pub sandbox_id: String,
    pub status: &'static str,
    pub image: String,
    pub profile: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_duration_ms: Option<i64>,
    pub forked_from: Option<String>,
    pub fork_tree: sandchest_repo::ForkTreeNode,
    pub execs: Vec<Exec>,
    pub sessions: Vec<SandboxSession>,
    pub artifacts: Vec<Artifact>,
    pub events_url: String,
}

pub enum ReplayAccess {
    Public,
    Private,
}

impl ReplayAccess {
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ReplayAccess::Public => "public",
            ReplayAccess::Private => "private",
        }
    }
}

pub(crate) fn replay_status(sandbox: &Sandbox) -> &'static str {
    if sandbox.status.is_terminal() {
        "complete"
    } else {
        "in_progress"
    }
}
