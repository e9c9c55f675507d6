// Artifact path registration, collection on sandbox termination, and
// signed-download mediation. Registration is deduplicated by the KV path
// set so repeated registrations of the same path are a no-op; collection
// happens once, driven by the sandbox controller when a sandbox reaches a
// terminal state.

use chrono::Utc;
use sha2::{Digest, Sha256};

use sandchest_billing::quota_gate;
use sandchest_core::SandchestError;
use sandchest_kv::Kv;
use sandchest_node_client::NodeClient;
use sandchest_repo::types::Artifact;
use sandchest_repo::{ArtifactRepo, OrgQuotaRepo};

use crate::object_store::ObjectStore;

pub struct ArtifactController<'a> {
    pub artifacts: &'a ArtifactRepo,
    pub quotas: &'a OrgQuotaRepo,
    pub kv: &'a dyn Kv,
    pub node_client: &'a dyn NodeClient,
    pub object_store: &'a dyn ObjectStore,
}

impl<'a> ArtifactController<'a> {
    /// Marks `paths` for collection on termination. Returns how many were
    /// newly registered (already-registered paths are silently skipped).
    pub async fn register(&self, sandbox_id: &str, paths: &[String]) -> usize {
        self.kv.add_artifact_paths(sandbox_id, paths).await
    }

    pub async fn get(&self, id: &str, org_id: &str) -> Result<Artifact, SandchestError> {
        self.artifacts
            .find_by_id(id, org_id)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::not_found(format!("artifact {id} not found")))
    }

    /// Fetches every registered path from the node, persists each as an
    /// artifact row plus an object-store blob. Called once a sandbox has
    /// reached a terminal state; a sandbox with no registered paths
    /// collects nothing.
    pub async fn collect(&self, sandbox_id: &str, org_id: &str) -> Result<Vec<Artifact>, SandchestError> {
        let paths = self.kv.get_artifact_paths(sandbox_id).await;
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let collected = self
            .node_client
            .collect_artifacts(sandbox_id, &paths)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        let quota = self.quotas.get(org_id).await.map_err(|e| SandchestError::internal(e.to_string()))?;
        let mut bytes_so_far = self.artifacts.sum_bytes_for_org(org_id).await.map_err(|e| SandchestError::internal(e.to_string()))?;

        let mut artifacts = Vec::with_capacity(collected.len());
        for (path, data) in collected {
            quota_gate::check_artifact_bytes_per_org(&quota, bytes_so_far, data.len() as i64)?;

            let id = sandchest_core::ids::Id::generate(sandchest_core::ids::Prefix::Artifact).to_string();
            let name = path.rsplit('/').next().unwrap_or(&path).to_string();
            let sha256 = hex::encode(Sha256::digest(&data));
            let object_ref = format!("artifacts/{org_id}/{sandbox_id}/{id}/{name}");

            self.object_store.put(&object_ref, &data).await.map_err(|e| SandchestError::internal(e.to_string()))?;

            let artifact = Artifact {
                id,
                sandbox_id: sandbox_id.to_string(),
                org_id: org_id.to_string(),
                exec_id: None,
                name,
                mime: "application/octet-stream".to_string(),
                bytes: data.len() as i64,
                sha256,
                object_ref,
                created_at: Utc::now(),
                retention_until: None,
            };
            let created = self.artifacts.create(artifact).await.map_err(|e| SandchestError::internal(e.to_string()))?;
            bytes_so_far += created.bytes;
            artifacts.push(created);
        }

        Ok(artifacts)
    }

    /// Tenant-scoped download URL, except for replay-public artifacts which
    /// any caller (including unauthenticated ones) may fetch.
    pub fn presign(&self, artifact: &Artifact) -> String {
        self.object_store.presign_url(&artifact.object_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandchest_kv::InMemoryKv;
    use sandchest_node_client::FakeNodeClient;
    use sandchest_repo::types::Env;

    async fn setup() -> (ArtifactRepo, OrgQuotaRepo, InMemoryKv, FakeNodeClient, tempfile::TempDir) {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        (ArtifactRepo::new(pool.clone()), OrgQuotaRepo::new(pool), InMemoryKv::default(), FakeNodeClient::new(), dir)
    }

    #[tokio::test]
    async fn collect_persists_every_registered_path_with_its_hash() {
        let (artifacts, quotas, kv, node_client, dir) = setup().await;
        let store = crate::object_store::LocalObjectStore::new(dir.path());
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
        node_client.put_file("sb_1", "/root/out.log", b"done", false).await.unwrap();

        let controller = ArtifactController { artifacts: &artifacts, quotas: &quotas, kv: &kv, node_client: &node_client, object_store: &store };
        controller.register("sb_1", &["/root/out.log".to_string()]).await;

        let collected = controller.collect("sb_1", "org_1").await.unwrap();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].bytes, 4);
        assert_eq!(collected[0].name, "out.log");

        let fetched = store.get(&collected[0].object_ref).await.unwrap();
        assert_eq!(fetched, b"done");
    }

    #[tokio::test]
    async fn register_is_deduplicated() {
        let (artifacts, quotas, kv, node_client, dir) = setup().await;
        let store = crate::object_store::LocalObjectStore::new(dir.path());
        let controller = ArtifactController { artifacts: &artifacts, quotas: &quotas, kv: &kv, node_client: &node_client, object_store: &store };

        let first = controller.register("sb_1", &["/root/a".to_string(), "/root/b".to_string()]).await;
        let second = controller.register("sb_1", &["/root/b".to_string(), "/root/c".to_string()]).await;

        assert_eq!(first, 2);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn collect_with_no_registered_paths_is_empty() {
        let (artifacts, quotas, kv, node_client, dir) = setup().await;
        let store = crate::object_store::LocalObjectStore::new(dir.path());
        let controller = ArtifactController { artifacts: &artifacts, quotas: &quotas, kv: &kv, node_client: &node_client, object_store: &store };

        let collected = controller.collect("sb_1", "org_1").await.unwrap();
        assert!(collected.is_empty());
    }
}
