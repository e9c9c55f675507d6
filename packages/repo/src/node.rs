use chrono::Utc;
use sqlx::{Row, SqlitePool};

use sandchest_storage::StorageError;

use crate::types::{Node, NodeStatus};

pub struct NodeRepo {
    pool: SqlitePool,
}

impl NodeRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, node: Node) -> Result<Node, StorageError> {
        sqlx::query(
            "INSERT INTO nodes (id, name, hostname, slots_total, status, last_seen_at) VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, hostname = excluded.hostname,
             slots_total = excluded.slots_total, status = excluded.status, last_seen_at = excluded.last_seen_at",
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.hostname)
        .bind(node.slots_total)
        .bind(node.status.as_str())
        .bind(node.last_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(node)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Node>, StorageError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_node(&r)).transpose()
    }

    /// Ordered by name then id, as required by the scheduler's tie-break rule.
    pub async fn list_online(&self) -> Result<Vec<Node>, StorageError> {
        let rows = sqlx::query("SELECT * FROM nodes WHERE status = 'online' ORDER BY name ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_node).collect()
    }

    pub async fn list(&self) -> Result<Vec<Node>, StorageError> {
        let rows = sqlx::query("SELECT * FROM nodes ORDER BY name ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_node).collect()
    }

    pub async fn update_status(&self, id: &str, status: NodeStatus) -> Result<(), StorageError> {
        sqlx::query("UPDATE nodes SET status = ?1, last_seen_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_last_seen(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE nodes SET last_seen_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Result<Node, StorageError> {
    Ok(Node {
        id: row.get("id"),
        name: row.get("name"),
        hostname: row.get("hostname"),
        slots_total: row.get("slots_total"),
        status: NodeStatus::parse(row.get::<String, _>("status").as_str())?,
        last_seen_at: row.get("last_seen_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_node(id: &str, name: &str, status: NodeStatus) -> Node {
        Node {
            id: id.to_string(),
            name: name.to_string(),
            hostname: format!("{name}.sandchest.internal"),
            slots_total: 8,
            status,
            last_seen_at: Utc::now(),
        }
    }

    async fn setup() -> SqlitePool {
        sandchest_storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn list_online_orders_by_name_then_id() {
        let pool = setup().await;
        let repo = NodeRepo::new(pool);
        repo.upsert(new_node("node_b", "bravo", NodeStatus::Online)).await.unwrap();
        repo.upsert(new_node("node_a", "alpha", NodeStatus::Online)).await.unwrap();
        repo.upsert(new_node("node_c", "charlie", NodeStatus::Offline)).await.unwrap();

        let online = repo.list_online().await.unwrap();
        assert_eq!(online.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["node_a", "node_b"]);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_id() {
        let pool = setup().await;
        let repo = NodeRepo::new(pool);
        repo.upsert(new_node("node_a", "alpha", NodeStatus::Online)).await.unwrap();
        repo.upsert(new_node("node_a", "alpha", NodeStatus::Draining)).await.unwrap();

        let node = repo.find_by_id("node_a").await.unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Draining);
    }
}
