use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_ms: u64,
    pub peak_memory_bytes: u64,
}

/// Parameters for a new sandbox, as handed to `create_sandbox`/`fork_sandbox`.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub sandbox_id: String,
    pub image_ref: String,
    pub cpu_cores: u32,
    pub memory_mb: u32,
    pub env: HashMap<String, String>,
}

/// `Exec` request body. `cmd` is already normalized to argv form; shell-form
/// commands become `["/bin/sh", "-c", cmd]` before reaching this layer.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub sandbox_id: String,
    pub exec_id: String,
    pub cmd: Vec<String>,
    pub cwd: String,
    pub env: HashMap<String, String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration_ms: u64,
    pub resource_usage: ResourceUsage,
    pub timed_out: bool,
}

/// A single frame of the server-streamed `Exec`/`SessionExec` response.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit { code: i64, duration_ms: u64, resource_usage: ResourceUsage },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEntryType {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub file_type: FileEntryType,
}

/// Node → Control frames, all multiplexed over a single `StreamEvents` call
/// in the real protocol; here each is just a variant a fake client can emit.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Heartbeat { node_id: String },
    ExecOutput { exec_id: String, event: ExecEvent },
    SessionOutput { session_id: String, data: Vec<u8> },
    ExecCompleted { exec_id: String, outcome: ExecOutcome },
    SandboxEvent { sandbox_id: String, kind: SandboxEventKind },
    ArtifactReport { sandbox_id: String, paths: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxEventKind {
    Created,
    Ready,
    Stopped,
    Failed,
    Forked,
    TtlWarning,
}
