use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use sandchest_storage::{pagination::paginate, Page, StorageError};

use crate::types::{Env, FailureReason, Sandbox, SandboxStatus};

/// Filters accepted by [`SandboxRepo::list`].
#[derive(Debug, Clone, Default)]
pub struct SandboxListFilter {
    pub status: Option<SandboxStatus>,
    pub forked_from: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

/// Patch applied by [`SandboxRepo::update_status`].
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
}

/// Inputs to [`SandboxRepo::create_fork`].
pub struct ForkInput {
    pub source: Sandbox,
    pub env: Env,
    pub ttl_seconds: i64,
}

/// One node of the fork subtree returned by [`SandboxRepo::get_fork_tree`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ForkTreeNode {
    pub sandbox: Sandbox,
    pub children: Vec<ForkTreeNode>,
}

pub struct SandboxRepo {
    pool: SqlitePool,
}

impl SandboxRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, sandbox: Sandbox) -> Result<Sandbox, StorageError> {
        sqlx::query(
            "INSERT INTO sandboxes (
                id, org_id, node_id, slot, image_id, image_ref, profile_id, profile_name, status,
                env_json, forked_from, fork_depth, fork_count, ttl_seconds, failure_reason,
                replay_public, replay_expires_at, last_activity_at, created_at, updated_at,
                started_at, ended_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)",
        )
        .bind(&sandbox.id)
        .bind(&sandbox.org_id)
        .bind(&sandbox.node_id)
        .bind(sandbox.slot)
        .bind(&sandbox.image_id)
        .bind(&sandbox.image_ref)
        .bind(&sandbox.profile_id)
        .bind(&sandbox.profile_name)
        .bind(sandbox.status.as_str())
        .bind(serde_json::to_string(&sandbox.env)?)
        .bind(&sandbox.forked_from)
        .bind(sandbox.fork_depth)
        .bind(sandbox.fork_count)
        .bind(sandbox.ttl_seconds)
        .bind(sandbox.failure_reason.map(FailureReason::as_str))
        .bind(sandbox.replay_public)
        .bind(sandbox.replay_expires_at)
        .bind(sandbox.last_activity_at)
        .bind(sandbox.created_at)
        .bind(sandbox.updated_at)
        .bind(sandbox.started_at)
        .bind(sandbox.ended_at)
        .execute(&self.pool)
        .await?;

        Ok(sandbox)
    }

    pub async fn find_by_id(&self, id: &str, org_id: &str) -> Result<Option<Sandbox>, StorageError> {
        let row = sqlx::query("SELECT * FROM sandboxes WHERE id = ?1 AND org_id = ?2")
            .bind(id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_sandbox(&r)).transpose()
    }

    /// Unscoped by org; only returns a row when `replay_public = true`.
    pub async fn find_by_id_public(&self, id: &str) -> Result<Option<Sandbox>, StorageError> {
        let row = sqlx::query("SELECT * FROM sandboxes WHERE id = ?1 AND replay_public = 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_sandbox(&r)).transpose()
    }

    pub async fn list(&self, org_id: &str, filter: SandboxListFilter) -> Result<Page<Sandbox>, StorageError> {
        let limit = sandchest_storage::pagination::normalize_limit(filter.limit);

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM sandboxes WHERE org_id = ");
        query.push_bind(org_id);
        query.push(" AND status != 'deleted'");

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str().to_string());
        }
        if let Some(forked_from) = &filter.forked_from {
            query.push(" AND forked_from = ").push_bind(forked_from.clone());
        }
        if let Some(cursor) = &filter.cursor {
            query.push(" AND id < ").push_bind(cursor.clone());
        }
        query.push(" ORDER BY id DESC LIMIT ").push_bind((limit + 1) as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        let sandboxes = rows.iter().map(row_to_sandbox).collect::<Result<Vec<_>, _>>()?;

        Ok(paginate(sandboxes, limit, |s| s.id.clone()))
    }

    pub async fn update_status(
        &self,
        id: &str,
        org_id: &str,
        status: SandboxStatus,
        patch: StatusPatch,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sandboxes SET status = ?1, started_at = COALESCE(started_at, ?2), ended_at = COALESCE(ended_at, ?3),
             failure_reason = COALESCE(failure_reason, ?4), updated_at = ?5
             WHERE id = ?6 AND org_id = ?7",
        )
        .bind(status.as_str())
        .bind(patch.started_at)
        .bind(patch.ended_at)
        .bind(patch.failure_reason.map(FailureReason::as_str))
        .bind(Utc::now())
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sets status to `deleted`; sets `ended_at` if unset. Rows remain
    /// reachable by `find_by_id` but are excluded from `list`.
    pub async fn soft_delete(&self, id: &str, org_id: &str) -> Result<(), StorageError> {
        self.update_status(
            id,
            org_id,
            SandboxStatus::Deleted,
            StatusPatch {
                ended_at: Some(Utc::now()),
                failure_reason: Some(FailureReason::SandboxDeleted),
            },
        )
        .await
    }

    pub async fn create_fork(&self, input: ForkInput) -> Result<Sandbox, StorageError> {
        let now = Utc::now();
        let mut env = input.source.env.clone();
        env.extend(input.env);

        let fork = Sandbox {
            id: input.source.id.clone(),
            org_id: input.source.org_id.clone(),
            node_id: input.source.node_id.clone(),
            slot: input.source.slot,
            image_id: input.source.image_id.clone(),
            image_ref: input.source.image_ref.clone(),
            profile_id: input.source.profile_id.clone(),
            profile_name: input.source.profile_name.clone(),
            status: SandboxStatus::Running,
            env,
            forked_from: Some(input.source.id.clone()),
            fork_depth: input.source.fork_depth + 1,
            fork_count: 0,
            ttl_seconds: input.ttl_seconds,
            failure_reason: None,
            replay_public: false,
            replay_expires_at: None,
            last_activity_at: Some(now),
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            ended_at: None,
        };

        self.create(fork).await
    }

    pub async fn increment_fork_count(&self, id: &str, org_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sandboxes SET fork_count = fork_count + 1, updated_at = ?1 WHERE id = ?2 AND org_id = ?3",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Walks up to the root ancestor then breadth-first back down, scoped to
    /// the caller's org.
    pub async fn get_fork_tree(&self, id: &str, org_id: &str) -> Result<Option<ForkTreeNode>, StorageError> {
        let Some(mut current) = self.find_by_id(id, org_id).await? else {
            return Ok(None);
        };
        while let Some(parent_id) = current.forked_from.clone() {
            match self.find_by_id(&parent_id, org_id).await? {
                Some(parent) => current = parent,
                None => break,
            }
        }
        let root = current;

        let mut children_by_parent: HashMap<String, Vec<Sandbox>> = HashMap::new();
        let rows = sqlx::query("SELECT * FROM sandboxes WHERE org_id = ?1 AND status != 'deleted'")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            let sandbox = row_to_sandbox(row)?;
            if let Some(parent) = &sandbox.forked_from {
                children_by_parent.entry(parent.clone()).or_default().push(sandbox);
            }
        }

        Ok(Some(build_tree(root, &children_by_parent)))
    }

    pub async fn set_replay_public(&self, id: &str, org_id: &str, public: bool) -> Result<(), StorageError> {
        sqlx::query("UPDATE sandboxes SET replay_public = ?1, updated_at = ?2 WHERE id = ?3 AND org_id = ?4")
            .bind(public)
            .bind(Utc::now())
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// No-op unless the sandbox is currently `running`.
    pub async fn touch_last_activity(&self, id: &str, org_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sandboxes SET last_activity_at = ?1, updated_at = ?1
             WHERE id = ?2 AND org_id = ?3 AND status = 'running'",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn assign_node(&self, id: &str, org_id: &str, node_id: &str, slot: u32) -> Result<(), StorageError> {
        sqlx::query("UPDATE sandboxes SET node_id = ?1, slot = ?2, updated_at = ?3 WHERE id = ?4 AND org_id = ?5")
            .bind(node_id)
            .bind(slot as i64)
            .bind(Utc::now())
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_active(&self, org_id: &str) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM sandboxes WHERE org_id = ?1 AND status IN ('queued','provisioning','running')",
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn find_expired_ttl(&self) -> Result<Vec<Sandbox>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM sandboxes WHERE status = 'running'
             AND started_at IS NOT NULL
             AND datetime(started_at, '+' || ttl_seconds || ' seconds') < ?1",
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sandbox).collect()
    }

    pub async fn find_near_ttl_expiry(&self, warning_threshold_seconds: i64) -> Result<Vec<Sandbox>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM sandboxes WHERE status = 'running'
             AND started_at IS NOT NULL
             AND datetime(started_at, '+' || ttl_seconds || ' seconds') < datetime(?1, '+' || ?2 || ' seconds')
             AND datetime(started_at, '+' || ttl_seconds || ' seconds') > ?1",
        )
        .bind(Utc::now())
        .bind(warning_threshold_seconds)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sandbox).collect()
    }

    pub async fn find_idle_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Sandbox>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM sandboxes WHERE status = 'running'
             AND COALESCE(last_activity_at, started_at, created_at) < ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sandbox).collect()
    }

    pub async fn find_queued_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Sandbox>, StorageError> {
        let rows = sqlx::query("SELECT * FROM sandboxes WHERE status = 'queued' AND created_at < ?1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_sandbox).collect()
    }

    /// Never reduces an existing value.
    pub async fn set_replay_expires_at(&self, id: &str, org_id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sandboxes SET replay_expires_at = ?1, updated_at = ?2
             WHERE id = ?3 AND org_id = ?4 AND (replay_expires_at IS NULL OR replay_expires_at < ?1)",
        )
        .bind(at)
        .bind(Utc::now())
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_missing_replay_expiry(&self) -> Result<Vec<Sandbox>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM sandboxes WHERE status IN ('stopped','failed','deleted') AND replay_expires_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sandbox).collect()
    }

    pub async fn find_purgable_replays(
        &self,
        cutoff: DateTime<Utc>,
        min_date: DateTime<Utc>,
    ) -> Result<Vec<Sandbox>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM sandboxes WHERE replay_expires_at IS NOT NULL
             AND replay_expires_at <= ?1 AND replay_expires_at >= ?2",
        )
        .bind(cutoff)
        .bind(min_date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sandbox).collect()
    }

    pub async fn delete_by_org_id(&self, org_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM sandboxes WHERE org_id = ?1")
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn build_tree(sandbox: Sandbox, children_by_parent: &HashMap<String, Vec<Sandbox>>) -> ForkTreeNode {
    let children = children_by_parent
        .get(&sandbox.id)
        .map(|kids| kids.iter().cloned().map(|kid| build_tree(kid, children_by_parent)).collect())
        .unwrap_or_default();
    ForkTreeNode { sandbox, children }
}

fn row_to_sandbox(row: &sqlx::sqlite::SqliteRow) -> Result<Sandbox, StorageError> {
    let env: Env = serde_json::from_str(row.get::<String, _>("env_json").as_str())?;
    Ok(Sandbox {
        id: row.get("id"),
        org_id: row.get("org_id"),
        node_id: row.get("node_id"),
        slot: row.get("slot"),
        image_id: row.get("image_id"),
        image_ref: row.get("image_ref"),
        profile_id: row.get("profile_id"),
        profile_name: row.get("profile_name"),
        status: SandboxStatus::parse(row.get::<String, _>("status").as_str())?,
        env,
        forked_from: row.get("forked_from"),
        fork_depth: row.get("fork_depth"),
        fork_count: row.get("fork_count"),
        ttl_seconds: row.get("ttl_seconds"),
        failure_reason: row
            .get::<Option<String>, _>("failure_reason")
            .map(|s| FailureReason::parse(&s))
            .transpose()?,
        replay_public: row.get::<bool, _>("replay_public"),
        replay_expires_at: row.get("replay_expires_at"),
        last_activity_at: row.get("last_activity_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
    })
}
