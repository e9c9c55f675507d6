use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use sandchest_storage::{pagination::paginate, Page, StorageError};

use crate::types::{CmdFormat, Env, Exec, ExecStatus};

#[derive(Debug, Clone, Default)]
pub struct ExecListFilter {
    pub status: Option<ExecStatus>,
    pub session_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecStatusPatch {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub cpu_ms: Option<i64>,
    pub peak_memory_bytes: Option<i64>,
    pub duration_ms: Option<i64>,
}

pub struct ExecRepo {
    pool: SqlitePool,
}

impl ExecRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically assigns and returns the next per-sandbox sequence number,
    /// starting at 1.
    pub async fn next_seq(&self, sandbox_id: &str) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "INSERT INTO sandbox_seq_counters (sandbox_id, next_seq) VALUES (?1, 2)
             ON CONFLICT(sandbox_id) DO UPDATE SET next_seq = next_seq + 1
             RETURNING next_seq - 1 AS seq",
        )
        .bind(sandbox_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("seq"))
    }

    pub async fn create(&self, exec: Exec) -> Result<Exec, StorageError> {
        sqlx::query(
            "INSERT INTO execs (
                id, sandbox_id, session_id, org_id, seq, cmd, cmd_format, cwd, env_json, status,
                exit_code, cpu_ms, peak_memory_bytes, duration_ms, created_at, updated_at, started_at, ended_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
        )
        .bind(&exec.id)
        .bind(&exec.sandbox_id)
        .bind(&exec.session_id)
        .bind(&exec.org_id)
        .bind(exec.seq)
        .bind(&exec.cmd)
        .bind(exec.cmd_format.as_str())
        .bind(&exec.cwd)
        .bind(serde_json::to_string(&exec.env)?)
        .bind(exec.status.as_str())
        .bind(exec.exit_code)
        .bind(exec.cpu_ms)
        .bind(exec.peak_memory_bytes)
        .bind(exec.duration_ms)
        .bind(exec.created_at)
        .bind(exec.updated_at)
        .bind(exec.started_at)
        .bind(exec.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(exec)
    }

    pub async fn find_by_id(&self, id: &str, org_id: &str) -> Result<Option<Exec>, StorageError> {
        let row = sqlx::query("SELECT * FROM execs WHERE id = ?1 AND org_id = ?2")
            .bind(id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_exec(&r)).transpose()
    }

    pub async fn list(
        &self,
        sandbox_id: &str,
        org_id: &str,
        filter: ExecListFilter,
    ) -> Result<Page<Exec>, StorageError> {
        let limit = sandchest_storage::pagination::normalize_limit(filter.limit);

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM execs WHERE sandbox_id = ");
        query.push_bind(sandbox_id.to_string());
        query.push(" AND org_id = ").push_bind(org_id.to_string());

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str().to_string());
        }
        if let Some(session_id) = &filter.session_id {
            query.push(" AND session_id = ").push_bind(session_id.clone());
        }
        if let Some(cursor) = &filter.cursor {
            query.push(" AND id < ").push_bind(cursor.clone());
        }
        query.push(" ORDER BY id DESC LIMIT ").push_bind((limit + 1) as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        let execs = rows.iter().map(row_to_exec).collect::<Result<Vec<_>, _>>()?;
        Ok(paginate(execs, limit, |e| e.id.clone()))
    }

    pub async fn update_status(
        &self,
        id: &str,
        org_id: &str,
        status: ExecStatus,
        patch: ExecStatusPatch,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE execs SET status = ?1, started_at = COALESCE(started_at, ?2), ended_at = COALESCE(ended_at, ?3),
             exit_code = COALESCE(?4, exit_code), cpu_ms = COALESCE(?5, cpu_ms),
             peak_memory_bytes = COALESCE(?6, peak_memory_bytes), duration_ms = COALESCE(?7, duration_ms),
             updated_at = ?8
             WHERE id = ?9 AND org_id = ?10",
        )
        .bind(status.as_str())
        .bind(patch.started_at)
        .bind(patch.ended_at)
        .bind(patch.exit_code)
        .bind(patch.cpu_ms)
        .bind(patch.peak_memory_bytes)
        .bind(patch.duration_ms)
        .bind(Utc::now())
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_exec(row: &sqlx::sqlite::SqliteRow) -> Result<Exec, StorageError> {
    let env: Env = serde_json::from_str(row.get::<String, _>("env_json").as_str())?;
    Ok(Exec {
        id: row.get("id"),
        sandbox_id: row.get("sandbox_id"),
        session_id: row.get("session_id"),
        org_id: row.get("org_id"),
        seq: row.get("seq"),
        cmd: row.get("cmd"),
        cmd_format: CmdFormat::parse(row.get::<String, _>("cmd_format").as_str())?,
        cwd: row.get("cwd"),
        env,
        status: ExecStatus::parse(row.get::<String, _>("status").as_str())?,
        exit_code: row.get("exit_code"),
        cpu_ms: row.get("cpu_ms"),
        peak_memory_bytes: row.get("peak_memory_bytes"),
        duration_ms: row.get("duration_ms"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_exec(id: &str, sandbox_id: &str, org_id: &str, seq: i64) -> Exec {
        let now = Utc::now();
        Exec {
            id: id.to_string(),
            sandbox_id: sandbox_id.to_string(),
            session_id: None,
            org_id: org_id.to_string(),
            seq,
            cmd: "echo hi".to_string(),
            cmd_format: CmdFormat::Shell,
            cwd: "/root".to_string(),
            env: Env::new(),
            status: ExecStatus::Running,
            exit_code: None,
            cpu_ms: None,
            peak_memory_bytes: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            ended_at: None,
        }
    }

    async fn setup() -> SqlitePool {
        sandchest_storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn next_seq_is_contiguous_and_starts_at_one() {
        let pool = setup().await;
        let repo = ExecRepo::new(pool);
        assert_eq!(repo.next_seq("sb_1").await.unwrap(), 1);
        assert_eq!(repo.next_seq("sb_1").await.unwrap(), 2);
        assert_eq!(repo.next_seq("sb_1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn next_seq_is_scoped_per_sandbox() {
        let pool = setup().await;
        let repo = ExecRepo::new(pool);
        assert_eq!(repo.next_seq("sb_1").await.unwrap(), 1);
        assert_eq!(repo.next_seq("sb_2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_status_sets_terminal_fields_once() {
        let pool = setup().await;
        let repo = ExecRepo::new(pool);
        repo.create(new_exec("ex_1", "sb_1", "org_1", 1)).await.unwrap();

        repo.update_status(
            "ex_1",
            "org_1",
            ExecStatus::Done,
            ExecStatusPatch {
                ended_at: Some(Utc::now()),
                exit_code: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let exec = repo.find_by_id("ex_1", "org_1").await.unwrap().unwrap();
        assert_eq!(exec.status, ExecStatus::Done);
        assert_eq!(exec.exit_code, Some(0));
    }

    #[tokio::test]
    async fn list_filters_by_session_id() {
        let pool = setup().await;
        let repo = ExecRepo::new(pool);
        let mut with_session = new_exec("ex_1", "sb_1", "org_1", 1);
        with_session.session_id = Some("sess_1".to_string());
        repo.create(with_session).await.unwrap();
        repo.create(new_exec("ex_2", "sb_1", "org_1", 2)).await.unwrap();

        let page = repo
            .list(
                "sb_1",
                "org_1",
                ExecListFilter {
                    session_id: Some("sess_1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].id, "ex_1");
    }
}
