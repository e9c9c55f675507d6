use chrono::Utc;
use sqlx::{Row, SqlitePool};

use sandchest_storage::StorageError;

use crate::types::{IdempotencyRecord, IdempotencyStatus};

pub struct IdempotencyRepo {
    pool: SqlitePool,
}

impl IdempotencyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts an `in_progress` record iff `(key, org_id)` is unused; returns
    /// `None` when a record already exists (the caller should return its
    /// stored response instead of repeating the operation).
    pub async fn begin(&self, key: &str, org_id: &str) -> Result<Option<IdempotencyRecord>, StorageError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO idempotency_keys (key, org_id, status, created_at) VALUES (?1,?2,?3,?4)",
        )
        .bind(key)
        .bind(org_id)
        .bind(IdempotencyStatus::InProgress.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(IdempotencyRecord {
            key: key.to_string(),
            org_id: org_id.to_string(),
            status: IdempotencyStatus::InProgress,
            response_status: None,
            response_body: None,
            created_at: Utc::now(),
        }))
    }

    pub async fn find(&self, key: &str, org_id: &str) -> Result<Option<IdempotencyRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM idempotency_keys WHERE key = ?1 AND org_id = ?2")
            .bind(key)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    pub async fn complete(
        &self,
        key: &str,
        org_id: &str,
        response_status: i64,
        response_body: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE idempotency_keys SET status = ?1, response_status = ?2, response_body = ?3
             WHERE key = ?4 AND org_id = ?5",
        )
        .bind(IdempotencyStatus::Completed.as_str())
        .bind(response_status)
        .bind(response_body)
        .bind(key)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn purge_older_than(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<IdempotencyRecord, StorageError> {
    Ok(IdempotencyRecord {
        key: row.get("key"),
        org_id: row.get("org_id"),
        status: IdempotencyStatus::parse(row.get::<String, _>("status").as_str())?,
        response_status: row.get("response_status"),
        response_body: row.get("response_body"),
        created_at: row.get("created_at"),
    })
}
