// Object storage for artifacts and replay event logs. `LocalObjectStore` is a
// disk-backed implementation good enough for tests and single-node
// deployments; a production deployment plugs in an S3-compatible backend the
// way the teacher's cloud-sync crate does (`aws-sdk-s3` behind the same
// trait).

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, ObjectStoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// A URL a client can use to fetch `key` directly. The local store
    /// returns a `file://` path; a real backend returns a time-limited
    /// presigned URL.
    fn presign_url(&self, key: &str) -> String;
}

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.path_for(key))
            .await
            .map_err(|_| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    fn presign_url(&self, key: &str) -> String {
        format!("file://{}", self.path_for(key).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bytes_through_a_temp_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put("artifacts/org_1/sb_1/art_1/out.tar.gz", b"payload").await.unwrap();

        let bytes = store.get("artifacts/org_1/sb_1/art_1/out.tar.gz").await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(matches!(store.get("nope").await, Err(ObjectStoreError::NotFound(_))));
    }
}
