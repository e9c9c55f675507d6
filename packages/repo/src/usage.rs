use chrono::{DateTime, Utc};
use nanoid::nanoid;
use sqlx::SqlitePool;

use sandchest_storage::StorageError;

pub struct UsageRepo {
    pool: SqlitePool,
}

impl UsageRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, user_id: &str, org_id: &str, category: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO usage_records (id, user_id, org_id, category, created_at) VALUES (?1,?2,?3,?4,?5)")
            .bind(format!("usage_{}", nanoid!()))
            .bind(user_id)
            .bind(org_id)
            .bind(category)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_since(
        &self,
        org_id: &str,
        category: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM usage_records WHERE org_id = ?1 AND category = ?2 AND created_at >= ?3",
        )
        .bind(org_id)
        .bind(category)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup() -> SqlitePool {
        sandchest_storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn count_since_only_counts_matching_org_and_category() {
        let pool = setup().await;
        let repo = UsageRepo::new(pool);
        repo.record("user_1", "org_1", "sandbox_create").await.unwrap();
        repo.record("user_1", "org_1", "sandbox_create").await.unwrap();
        repo.record("user_1", "org_2", "sandbox_create").await.unwrap();
        repo.record("user_1", "org_1", "exec_create").await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        assert_eq!(repo.count_since("org_1", "sandbox_create", since).await.unwrap(), 2);
    }
}
