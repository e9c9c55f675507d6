use async_trait::async_trait;

use crate::error::NodeClientError;
use crate::types::{ExecOutcome, ExecRequest, FileEntry, SandboxSpec};

type Result<T> = std::result::Result<T, NodeClientError>;

/// Control→Node RPC surface. One implementation per backend (a fake for
/// tests and local development, a gRPC/mTLS client for real node daemons).
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<()>;

    async fn create_sandbox_from_snapshot(&self, spec: &SandboxSpec, snapshot_ref: &str) -> Result<()>;

    async fn fork_sandbox(&self, parent_sandbox_id: &str, spec: &SandboxSpec) -> Result<()>;

    /// Runs `request` to completion (or timeout) and returns the full
    /// outcome. Real backends stream `ExecEvent`s as they arrive; this
    /// blocking form is what the exec controller's sync path needs.
    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutcome>;

    async fn create_session(&self, sandbox_id: &str, session_id: &str, shell: &str) -> Result<()>;

    async fn session_exec(&self, session_id: &str, request: &ExecRequest) -> Result<ExecOutcome>;

    async fn session_input(&self, session_id: &str, data: &[u8]) -> Result<()>;

    async fn destroy_session(&self, session_id: &str) -> Result<()>;

    async fn put_file(&self, sandbox_id: &str, path: &str, data: &[u8], batch: bool) -> Result<u64>;

    async fn get_file(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>>;

    async fn list_files(&self, sandbox_id: &str, path: &str) -> Result<Vec<FileEntry>>;

    async fn delete_file(&self, sandbox_id: &str, path: &str) -> Result<()>;

    /// Instructs the node to collect previously registered artifact paths
    /// and return their bytes so the control plane can persist them.
    async fn collect_artifacts(&self, sandbox_id: &str, paths: &[String]) -> Result<Vec<(String, Vec<u8>)>>;

    async fn stop_sandbox(&self, sandbox_id: &str) -> Result<()>;

    async fn destroy_sandbox(&self, sandbox_id: &str) -> Result<()>;
}
