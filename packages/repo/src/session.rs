use chrono::Utc;
use sqlx::{Row, SqlitePool};

use sandchest_storage::{pagination::paginate, Page, StorageError};

use crate::types::{SandboxSession, SessionStatus};

pub struct SessionRepo {
    pool: SqlitePool,
}

impl SessionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: SandboxSession) -> Result<SandboxSession, StorageError> {
        sqlx::query(
            "INSERT INTO sandbox_sessions (id, sandbox_id, org_id, shell, status, destroyed_at, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        )
        .bind(&session.id)
        .bind(&session.sandbox_id)
        .bind(&session.org_id)
        .bind(&session.shell)
        .bind(session.status.as_str())
        .bind(session.destroyed_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn find_by_id(&self, id: &str, org_id: &str) -> Result<Option<SandboxSession>, StorageError> {
        let row = sqlx::query("SELECT * FROM sandbox_sessions WHERE id = ?1 AND org_id = ?2")
            .bind(id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    pub async fn list(
        &self,
        sandbox_id: &str,
        org_id: &str,
        cursor: Option<String>,
        limit: Option<u32>,
    ) -> Result<Page<SandboxSession>, StorageError> {
        let limit = sandchest_storage::pagination::normalize_limit(limit);
        let rows = match &cursor {
            Some(cursor) => {
                sqlx::query(
                    "SELECT * FROM sandbox_sessions WHERE sandbox_id = ?1 AND org_id = ?2 AND id < ?3
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
                    "SELECT * FROM sandbox_sessions WHERE sandbox_id = ?1 AND org_id = ?2
                     ORDER BY id DESC LIMIT ?3",
                )
                .bind(sandbox_id)
                .bind(org_id)
                .bind((limit + 1) as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        let sessions = rows.iter().map(row_to_session).collect::<Result<Vec<_>, _>>()?;
        Ok(paginate(sessions, limit, |s| s.id.clone()))
    }

    pub async fn count_active(&self, sandbox_id: &str) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM sandbox_sessions WHERE sandbox_id = ?1 AND status = 'running'",
        )
        .bind(sandbox_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Idempotent: marks `destroyed` with `destroyed_at` set the first time.
    pub async fn destroy(&self, id: &str, org_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sandbox_sessions SET status = 'destroyed', destroyed_at = COALESCE(destroyed_at, ?1), updated_at = ?1
             WHERE id = ?2 AND org_id = ?3",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_by_org_id(&self, org_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM sandbox_sessions WHERE org_id = ?1")
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<SandboxSession, StorageError> {
    Ok(SandboxSession {
        id: row.get("id"),
        sandbox_id: row.get("sandbox_id"),
        org_id: row.get("org_id"),
        shell: row.get("shell"),
        status: SessionStatus::parse(row.get::<String, _>("status").as_str())?,
        destroyed_at: row.get("destroyed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(id: &str, sandbox_id: &str, org_id: &str) -> SandboxSession {
        let now = Utc::now();
        SandboxSession {
            id: id.to_string(),
            sandbox_id: sandbox_id.to_string(),
            org_id: org_id.to_string(),
            shell: "/bin/bash".to_string(),
            status: SessionStatus::Running,
            destroyed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup() -> SqlitePool {
        sandchest_storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let pool = setup().await;
        let repo = SessionRepo::new(pool);
        repo.create(new_session("sess_1", "sb_1", "org_1")).await.unwrap();

        repo.destroy("sess_1", "org_1").await.unwrap();
        let first_destroyed_at = repo.find_by_id("sess_1", "org_1").await.unwrap().unwrap().destroyed_at;

        repo.destroy("sess_1", "org_1").await.unwrap();
        let second_destroyed_at = repo.find_by_id("sess_1", "org_1").await.unwrap().unwrap().destroyed_at;

        assert_eq!(first_destroyed_at, second_destroyed_at);
    }

    #[tokio::test]
    async fn count_active_excludes_destroyed_sessions() {
        let pool = setup().await;
        let repo = SessionRepo::new(pool);
        repo.create(new_session("sess_1", "sb_1", "org_1")).await.unwrap();
        repo.create(new_session("sess_2", "sb_1", "org_1")).await.unwrap();
        repo.destroy("sess_2", "org_1").await.unwrap();

        assert_eq!(repo.count_active("sb_1").await.unwrap(), 1);
    }
}
