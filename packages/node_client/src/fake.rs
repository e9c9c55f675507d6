use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use crate::client::NodeClient;
use crate::error::NodeClientError;
use crate::types::{ExecOutcome, ExecRequest, FileEntry, FileEntryType, ResourceUsage, SandboxSpec};

type Result<T> = std::result::Result<T, NodeClientError>;

/// An in-process stand-in for a real node daemon: each sandbox gets a
/// tempdir, `exec` actually forks and waits on the host, files are plain
/// reads/writes under that dir. Good enough for the control plane's own
/// tests and for local development without a fleet of real microVMs.
///
/// Resource usage is always zero; a real backend would read it from the
/// guest's cgroup or hypervisor accounting.
#[derive(Default)]
pub struct FakeNodeClient {
    roots: Mutex<HashMap<String, TempDir>>,
}

impl FakeNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn root_for(&self, sandbox_id: &str) -> Result<PathBuf> {
        let roots = self.roots.lock().unwrap();
        roots
            .get(sandbox_id)
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| NodeClientError::Rpc(format!("unknown sandbox {sandbox_id}")))
    }

    fn guest_path(root: &Path, path: &str) -> PathBuf {
        root.join(path.trim_start_matches('/'))
    }

    async fn run(root: &Path, request: &ExecRequest) -> Result<ExecOutcome> {
        let Some((program, args)) = request.cmd.split_first() else {
            return Err(NodeClientError::Rpc("empty cmd".to_string()));
        };

        let cwd = Self::guest_path(root, &request.cwd);
        tokio::fs::create_dir_all(&cwd).await.ok();

        let mut command = Command::new(program);
        command.args(args).current_dir(&cwd).envs(&request.env);

        let start = Instant::now();
        let run = command.output();
        let timeout = tokio::time::Duration::from_secs(request.timeout_seconds);

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => Ok(ExecOutcome {
                exit_code: output.status.code().unwrap_or(-1) as i64,
                stdout: output.stdout,
                stderr: output.stderr,
                duration_ms: start.elapsed().as_millis() as u64,
                resource_usage: ResourceUsage::default(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(NodeClientError::Io(e)),
            Err(_) => Ok(ExecOutcome {
                exit_code: -1,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration_ms: start.elapsed().as_millis() as u64,
                resource_usage: ResourceUsage::default(),
                timed_out: true,
            }),
        }
    }
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<()> {
        let dir = TempDir::new()?;
        self.roots.lock().unwrap().insert(spec.sandbox_id.clone(), dir);
        Ok(())
    }

    async fn create_sandbox_from_snapshot(&self, spec: &SandboxSpec, _snapshot_ref: &str) -> Result<()> {
        self.create_sandbox(spec).await
    }

    async fn fork_sandbox(&self, parent_sandbox_id: &str, spec: &SandboxSpec) -> Result<()> {
        let parent_root = self.root_for(parent_sandbox_id)?;
        let dir = TempDir::new()?;
        copy_dir_recursive(&parent_root, dir.path())?;
        self.roots.lock().unwrap().insert(spec.sandbox_id.clone(), dir);
        Ok(())
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutcome> {
        let root = self.root_for(&request.sandbox_id)?;
        Self::run(&root, request).await
    }

    async fn create_session(&self, _sandbox_id: &str, _session_id: &str, _shell: &str) -> Result<()> {
        Ok(())
    }

    async fn session_exec(&self, _session_id: &str, request: &ExecRequest) -> Result<ExecOutcome> {
        let root = self.root_for(&request.sandbox_id)?;
        Self::run(&root, request).await
    }

    async fn session_input(&self, _session_id: &str, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn destroy_session(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    async fn put_file(&self, sandbox_id: &str, path: &str, data: &[u8], _batch: bool) -> Result<u64> {
        let root = self.root_for(sandbox_id)?;
        let dest = Self::guest_path(&root, path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, data).await?;
        Ok(data.len() as u64)
    }

    async fn get_file(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>> {
        let root = self.root_for(sandbox_id)?;
        Ok(tokio::fs::read(Self::guest_path(&root, path)).await?)
    }

    async fn list_files(&self, sandbox_id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let root = self.root_for(sandbox_id)?;
        let dir = Self::guest_path(&root, path);
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_type = if entry.file_type().await?.is_dir() { FileEntryType::Dir } else { FileEntryType::File };
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(FileEntry { path: format!("{}/{}", path.trim_end_matches('/'), name), name, file_type });
        }
        Ok(entries)
    }

    async fn delete_file(&self, sandbox_id: &str, path: &str) -> Result<()> {
        let root = self.root_for(sandbox_id)?;
        match tokio::fs::remove_file(Self::guest_path(&root, path)).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn collect_artifacts(&self, sandbox_id: &str, paths: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
        let root = self.root_for(sandbox_id)?;
        let mut collected = Vec::new();
        for path in paths {
            if let Ok(bytes) = tokio::fs::read(Self::guest_path(&root, path)).await {
                collected.push((path.clone(), bytes));
            }
        }
        Ok(collected)
    }

    async fn stop_sandbox(&self, _sandbox_id: &str) -> Result<()> {
        Ok(())
    }

    async fn destroy_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.roots.lock().unwrap().remove(sandbox_id);
        Ok(())
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn spec(id: &str) -> SandboxSpec {
        SandboxSpec { sandbox_id: id.to_string(), image_ref: "sandchest://linux/ubuntu-22.04".to_string(), cpu_cores: 1, memory_mb: 1024, env: Map::new() }
    }

    fn exec_req(sandbox_id: &str, cmd: &[&str]) -> ExecRequest {
        ExecRequest {
            sandbox_id: sandbox_id.to_string(),
            exec_id: "ex_test".to_string(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            cwd: "/root".to_string(),
            env: Map::new(),
            timeout_seconds: 10,
        }
    }

    #[tokio::test]
    async fn echo_exec_succeeds_with_expected_stdout() {
        let client = FakeNodeClient::new();
        client.create_sandbox(&spec("sb_1")).await.unwrap();

        let outcome = client.exec(&exec_req("sb_1", &["echo", "hello"])).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(String::from_utf8_lossy(&outcome.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn file_round_trips_through_put_and_get() {
        let client = FakeNodeClient::new();
        client.create_sandbox(&spec("sb_1")).await.unwrap();

        let bytes = vec![0x00, 0x01, 0x02, 0xFF];
        client.put_file("sb_1", "/work/test.bin", &bytes, false).await.unwrap();
        let read_back = client.get_file("sb_1", "/work/test.bin").await.unwrap();
        assert_eq!(read_back, bytes);
    }

    #[tokio::test]
    async fn fork_copies_parent_filesystem_state() {
        let client = FakeNodeClient::new();
        client.create_sandbox(&spec("sb_parent")).await.unwrap();
        client.put_file("sb_parent", "/work/seed.txt", b"seed", false).await.unwrap();

        client.fork_sandbox("sb_parent", &spec("sb_child")).await.unwrap();
        let read_back = client.get_file("sb_child", "/work/seed.txt").await.unwrap();
        assert_eq!(read_back, b"seed");
    }

    #[tokio::test]
    async fn destroy_sandbox_makes_it_unknown() {
        let client = FakeNodeClient::new();
        client.create_sandbox(&spec("sb_1")).await.unwrap();
        client.destroy_sandbox("sb_1").await.unwrap();

        assert!(client.exec(&exec_req("sb_1", &["echo", "hi"])).await.is_err());
    }
}
