// Guest filesystem access: put (optionally as an archive), get, list, delete.
// Every mutating and reading call touches `lastActivityAt` per the sandbox
// activity model; sweepers rely on this to detect idle sandboxes.

use sandchest_billing::quota_gate;
use sandchest_core::SandchestError;
use sandchest_node_client::NodeClient;
use sandchest_repo::types::SandboxStatus;
use sandchest_repo::{OrgQuotaRepo, SandboxRepo};

use crate::types::{FileEntryResponse, ListFilesResponse, PutFileInput, PutFileResponse};

const MAX_LIST_LIMIT: u32 = 200;

pub struct FileController<'a> {
    pub sandboxes: &'a SandboxRepo,
    pub quotas: &'a OrgQuotaRepo,
    pub node_client: &'a dyn NodeClient,
}

impl<'a> FileController<'a> {
    async fn require_running(&self, sandbox_id: &str, org_id: &str) -> Result<(), SandchestError> {
        let sandbox = self
            .sandboxes
            .find_by_id(sandbox_id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::not_found(format!("sandbox {sandbox_id} not found")))?;
        if sandbox.status != SandboxStatus::Running {
            return Err(SandchestError::sandbox_not_running(format!("sandbox {sandbox_id} is not running")));
        }
        Ok(())
    }

    pub async fn put(&self, input: PutFileInput) -> Result<PutFileResponse, SandchestError> {
        if !input.path.starts_with('/') {
            return Err(SandchestError::validation("path must be absolute"));
        }
        self.require_running(&input.sandbox_id, &input.org_id).await?;

        let quota = self.quotas.get(&input.org_id).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        quota_gate::check_file_bytes(&quota, input.data.len() as i64)?;

        let bytes_written = self
            .node_client
            .put_file(&input.sandbox_id, &input.path, &input.data, input.batch)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .touch_last_activity(&input.sandbox_id, &input.org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        Ok(PutFileResponse { path: input.path, bytes_written, batch: input.batch })
    }

    pub async fn get(&self, sandbox_id: &str, org_id: &str, path: &str) -> Result<Vec<u8>, SandchestError> {
        self.require_running(sandbox_id, org_id).await?;
        let data = self
            .node_client
            .get_file(sandbox_id, path)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .touch_last_activity(sandbox_id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;
        Ok(data)
    }

    /// Cursor-based listing sits above the node's flat directory listing:
    /// the node has no notion of pages, so the cursor here is just an
    /// index into the full listing, encoded opaquely.
    pub async fn list(
        &self,
        sandbox_id: &str,
        org_id: &str,
        path: &str,
        cursor: Option<String>,
        limit: Option<u32>,
    ) -> Result<ListFilesResponse, SandchestError> {
        self.require_running(sandbox_id, org_id).await?;
        let limit = limit.unwrap_or(100).clamp(1, MAX_LIST_LIMIT) as usize;
        let offset = cursor.as_deref().and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);

        let entries =
            self.node_client.list_files(sandbox_id, path).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        self.sandboxes
            .touch_last_activity(sandbox_id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let page: Vec<_> = entries.iter().skip(offset).take(limit + 1).collect();
        let next_cursor = if page.len() > limit { Some((offset + limit).to_string()) } else { None };
        let files = page
            .into_iter()
            .take(limit)
            .map(|entry| FileEntryResponse {
                name: entry.name.clone(),
                path: entry.path.clone(),
                kind: match entry.file_type {
                    sandchest_node_client::FileEntryType::File => "file",
                    sandchest_node_client::FileEntryType::Dir => "dir",
                },
            })
            .collect();

        Ok(ListFilesResponse { files, next_cursor })
    }

    /// Idempotent: deleting a path that is already gone still returns ok.
    pub async fn delete(&self, sandbox_id: &str, org_id: &str, path: &str) -> Result<(), SandchestError> {
        self.require_running(sandbox_id, org_id).await?;
        let _ = self.node_client.delete_file(sandbox_id, path).await;
        self.sandboxes
            .touch_last_activity(sandbox_id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sandchest_node_client::FakeNodeClient;
    use sandchest_repo::types::{Env, Sandbox};

    async fn setup() -> (SandboxRepo, OrgQuotaRepo, FakeNodeClient) {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        (SandboxRepo::new(pool.clone()), OrgQuotaRepo::new(pool), FakeNodeClient::new())
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
    async fn put_then_get_round_trips_bytes() {
        let (sandboxes, quotas, node_client) = setup().await;
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
        let controller = FileController { sandboxes: &sandboxes, quotas: &quotas, node_client: &node_client };

        let response = controller
            .put(PutFileInput {
                org_id: "org_1".to_string(),
                sandbox_id: "sb_1".to_string(),
                path: "/root/hello.txt".to_string(),
                data: b"hi there".to_vec(),
                batch: false,
            })
            .await
            .unwrap();
        assert_eq!(response.bytes_written, 8);

        let fetched = controller.get("sb_1", "org_1", "/root/hello.txt").await.unwrap();
        assert_eq!(fetched, b"hi there");
    }

    #[tokio::test]
    async fn relative_path_is_rejected() {
        let (sandboxes, quotas, node_client) = setup().await;
        sandboxes.create(running_sandbox("sb_1", "org_1")).await.unwrap();
        let controller = FileController { sandboxes: &sandboxes, quotas: &quotas, node_client: &node_client };

        let err = controller
            .put(PutFileInput {
                org_id: "org_1".to_string(),
                sandbox_id: "sb_1".to_string(),
                path: "relative.txt".to_string(),
                data: vec![],
                batch: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, sandchest_core::ErrorKind::Validation);
    }
}
