use sqlx::{Row, SqlitePool};

use sandchest_storage::StorageError;

use crate::types::OrgQuota;

pub struct OrgQuotaRepo {
    pool: SqlitePool,
}

impl OrgQuotaRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the org's stored overrides merged with defaults; absence of a
    /// row or a field means "use defaults".
    pub async fn get(&self, org_id: &str) -> Result<OrgQuota, StorageError> {
        let row = sqlx::query("SELECT * FROM org_quotas WHERE org_id = ?1")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;

        let quota = match row {
            Some(row) => OrgQuota {
                org_id: row.get("org_id"),
                max_concurrent_sandboxes: row.get("max_concurrent_sandboxes"),
                max_exec_timeout_seconds: row.get("max_exec_timeout_seconds"),
                max_fork_depth: row.get("max_fork_depth"),
                max_sessions_per_sandbox: row.get("max_sessions_per_sandbox"),
                max_file_bytes: row.get("max_file_bytes"),
                max_artifact_bytes_per_org: row.get("max_artifact_bytes_per_org"),
            },
            None => OrgQuota {
                org_id: org_id.to_string(),
                max_concurrent_sandboxes: None,
                max_exec_timeout_seconds: None,
                max_fork_depth: None,
                max_sessions_per_sandbox: None,
                max_file_bytes: None,
                max_artifact_bytes_per_org: None,
            },
        };

        Ok(quota.merged_with_defaults())
    }

    pub async fn upsert(&self, quota: OrgQuota) -> Result<OrgQuota, StorageError> {
        sqlx::query(
            "INSERT INTO org_quotas (org_id, max_concurrent_sandboxes, max_exec_timeout_seconds,
                max_fork_depth, max_sessions_per_sandbox, max_file_bytes, max_artifact_bytes_per_org)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(org_id) DO UPDATE SET
                max_concurrent_sandboxes = excluded.max_concurrent_sandboxes,
                max_exec_timeout_seconds = excluded.max_exec_timeout_seconds,
                max_fork_depth = excluded.max_fork_depth,
                max_sessions_per_sandbox = excluded.max_sessions_per_sandbox,
                max_file_bytes = excluded.max_file_bytes,
                max_artifact_bytes_per_org = excluded.max_artifact_bytes_per_org",
        )
        .bind(&quota.org_id)
        .bind(quota.max_concurrent_sandboxes)
        .bind(quota.max_exec_timeout_seconds)
        .bind(quota.max_fork_depth)
        .bind(quota.max_sessions_per_sandbox)
        .bind(quota.max_file_bytes)
        .bind(quota.max_artifact_bytes_per_org)
        .execute(&self.pool)
        .await?;
        Ok(quota)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SqlitePool {
        sandchest_storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn absent_org_gets_defaults() {
        let pool = setup().await;
        let repo = OrgQuotaRepo::new(pool);
        let quota = repo.get("org_unknown").await.unwrap();
        assert_eq!(quota.max_concurrent_sandboxes, Some(10));
    }

    #[tokio::test]
    async fn partial_override_merges_with_defaults() {
        let pool = setup().await;
        let repo = OrgQuotaRepo::new(pool);
        repo.upsert(OrgQuota {
            org_id: "org_1".to_string(),
            max_concurrent_sandboxes: Some(50),
            max_exec_timeout_seconds: None,
            max_fork_depth: None,
            max_sessions_per_sandbox: None,
            max_file_bytes: None,
            max_artifact_bytes_per_org: None,
        })
        .await
        .unwrap();

        let quota = repo.get("org_1").await.unwrap();
        assert_eq!(quota.max_concurrent_sandboxes, Some(50));
        assert_eq!(quota.max_fork_depth, Some(5));
    }
}
