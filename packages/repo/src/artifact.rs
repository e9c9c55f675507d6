use sqlx::{Row, SqlitePool};

use sandchest_storage::{pagination::paginate, Page, StorageError};

use crate::types::Artifact;

pub struct ArtifactRepo {
    pool: SqlitePool,
}

impl ArtifactRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Immutable once created.
    pub async fn create(&self, artifact: Artifact) -> Result<Artifact, StorageError> {
        sqlx::query(
            "INSERT INTO artifacts (id, sandbox_id, org_id, exec_id, name, mime, bytes, sha256, object_ref, created_at, retention_until)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        )
        .bind(&artifact.id)
        .bind(&artifact.sandbox_id)
        .bind(&artifact.org_id)
        .bind(&artifact.exec_id)
        .bind(&artifact.name)
        .bind(&artifact.mime)
        .bind(artifact.bytes)
        .bind(&artifact.sha256)
        .bind(&artifact.object_ref)
        .bind(artifact.created_at)
        .bind(artifact.retention_until)
        .execute(&self.pool)
        .await?;
        Ok(artifact)
    }

    pub async fn find_by_id(&self, id: &str, org_id: &str) -> Result<Option<Artifact>, StorageError> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = ?1 AND org_id = ?2")
            .bind(id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_artifact(&r)).transpose()
    }

    pub async fn list(
        &self,
        sandbox_id: &str,
        org_id: &str,
        cursor: Option<String>,
        limit: Option<u32>,
    ) -> Result<Page<Artifact>, StorageError> {
        let limit = sandchest_storage::pagination::normalize_limit(limit);
        let rows = match &cursor {
            Some(cursor) => {
                sqlx::query(
                    "SELECT * FROM artifacts WHERE sandbox_id = ?1 AND org_id = ?2 AND id < ?3
                     ORDER BY id DESC LIMIT ?4",
                )
                .bind(sandbox_id)
                .bind(org_id)
                .bind(cursor)
                .bind((limit + 1) as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM artifacts WHERE sandbox_id = ?1 AND org_id = ?2
                     ORDER BY id DESC LIMIT ?3",
                )
                .bind(sandbox_id)
                .bind(org_id)
                .bind((limit + 1) as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        let artifacts = rows.iter().map(row_to_artifact).collect::<Result<Vec<_>, _>>()?;
        Ok(paginate(artifacts, limit, |a| a.id.clone()))
    }

    pub async fn sum_bytes_for_org(&self, org_id: &str) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COALESCE(SUM(bytes), 0) as total FROM artifacts WHERE org_id = ?1")
            .bind(org_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("total"))
    }

    pub async fn delete_by_org_id(&self, org_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM artifacts WHERE org_id = ?1")
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_artifact(row: &sqlx::sqlite::SqliteRow) -> Result<Artifact, StorageError> {
    Ok(Artifact {
        id: row.get("id"),
        sandbox_id: row.get("sandbox_id"),
        org_id: row.get("org_id"),
        exec_id: row.get("exec_id"),
        name: row.get("name"),
        mime: row.get("mime"),
        bytes: row.get("bytes"),
        sha256: row.get("sha256"),
        object_ref: row.get("object_ref"),
        created_at: row.get("created_at"),
        retention_until: row.get("retention_until"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_artifact(id: &str, sandbox_id: &str, org_id: &str, bytes: i64) -> Artifact {
        Artifact {
            id: id.to_string(),
            sandbox_id: sandbox_id.to_string(),
            org_id: org_id.to_string(),
            exec_id: None,
            name: "out.tar.gz".to_string(),
            mime: "application/gzip".to_string(),
            bytes,
            sha256: "deadbeef".to_string(),
            object_ref: format!("artifacts/{org_id}/{sandbox_id}/{id}/out.tar.gz"),
            created_at: Utc::now(),
            retention_until: None,
        }
    }

    async fn setup() -> SqlitePool {
        sandchest_storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn sum_bytes_aggregates_across_sandboxes_for_the_org() {
        let pool = setup().await;
        let repo = ArtifactRepo::new(pool);
        repo.create(new_artifact("art_1", "sb_1", "org_1", 100)).await.unwrap();
        repo.create(new_artifact("art_2", "sb_2", "org_1", 250)).await.unwrap();
        repo.create(new_artifact("art_3", "sb_1", "org_2", 999)).await.unwrap();

        assert_eq!(repo.sum_bytes_for_org("org_1").await.unwrap(), 350);
    }
}
