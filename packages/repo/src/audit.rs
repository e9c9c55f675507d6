use chrono::Utc;
use nanoid::nanoid;
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;

use sandchest_storage::StorageError;

pub struct AuditRepo {
    pool: SqlitePool,
}

impl AuditRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, actor: &str, action: &str, detail: Option<JsonValue>) -> Result<(), StorageError> {
        let detail_json = detail.map(|v| v.to_string());
        sqlx::query("INSERT INTO audit_log (id, actor, action, detail_json, created_at) VALUES (?1,?2,?3,?4,?5)")
            .bind(format!("audit_{}", nanoid!()))
            .bind(actor)
            .bind(action)
            .bind(detail_json)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_does_not_error_without_detail() {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        let repo = AuditRepo::new(pool);
        repo.record("user_1", "sandbox.delete", None).await.unwrap();
    }
}
