use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use subtle::ConstantTimeEq;

use sandchest_core::ids::Prefix;
use sandchest_storage::StorageError;

/// An API key record as stored; `key_hash` never leaves this module.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub org_id: String,
    pub user_id: String,
    pub name: String,
    pub scopes: HashSet<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Plaintext key plus the record it backs. The plaintext is only ever
/// available at creation time.
#[derive(Debug, Clone)]
pub struct ApiKeyGeneration {
    pub plaintext: String,
    pub key: ApiKey,
}

pub struct ApiKeyRepo {
    pool: SqlitePool,
}

impl ApiKeyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn generate_plaintext() -> String {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; 32] = rng.gen();
        format!("sk_{}", hex::encode(random_bytes))
    }

    fn hash(plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(plaintext.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn create(
        &self,
        org_id: &str,
        user_id: &str,
        name: &str,
        scopes: HashSet<String>,
    ) -> Result<ApiKeyGeneration, StorageError> {
        let id = sandchest_core::ids::Id::generate(Prefix::ApiKey).to_string();
        let plaintext = Self::generate_plaintext();
        let key_hash = Self::hash(&plaintext);
        let scopes_json = serde_json::to_string(&scopes)?;
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO api_keys (id, org_id, user_id, name, key_hash, scopes_json, is_active, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,1,?7)",
        )
        .bind(&id)
        .bind(org_id)
        .bind(user_id)
        .bind(name)
        .bind(&key_hash)
        .bind(&scopes_json)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(ApiKeyGeneration {
            plaintext,
            key: ApiKey {
                id,
                org_id: org_id.to_string(),
                user_id: user_id.to_string(),
                name: name.to_string(),
                scopes,
                is_active: true,
                created_at,
                last_used_at: None,
            },
        })
    }

    /// Verifies a bearer token against the stored hash with a constant-time
    /// comparison and, on success, touches `last_used_at`.
    pub async fn verify(&self, plaintext: &str) -> Result<Option<ApiKey>, StorageError> {
        let key_hash = Self::hash(plaintext);

        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ?1 AND is_active = 1")
            .bind(&key_hash)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let stored_hash: String = row.get("key_hash");
        if !bool::from(key_hash.as_bytes().ct_eq(stored_hash.as_bytes())) {
            return Ok(None);
        }

        sqlx::query("UPDATE api_keys SET last_used_at = ?1 WHERE key_hash = ?2")
            .bind(Utc::now())
            .bind(&key_hash)
            .execute(&self.pool)
            .await?;

        row_to_key(&row).map(Some)
    }

    pub async fn revoke(&self, id: &str, org_id: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE api_keys SET is_active = 0 WHERE id = ?1 AND org_id = ?2")
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self, org_id: &str) -> Result<Vec<ApiKey>, StorageError> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE org_id = ?1 ORDER BY created_at DESC")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_key).collect()
    }
}

fn row_to_key(row: &sqlx::sqlite::SqliteRow) -> Result<ApiKey, StorageError> {
    let scopes_json: String = row.get("scopes_json");
    let scopes: HashSet<String> = serde_json::from_str(&scopes_json)?;
    Ok(ApiKey {
        id: row.get("id"),
        org_id: row.get("org_id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        scopes,
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SqlitePool {
        sandchest_storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn verify_succeeds_for_the_plaintext_that_was_issued() {
        let pool = setup().await;
        let repo = ApiKeyRepo::new(pool);
        let generation = repo
            .create("org_1", "user_1", "ci", ["sandbox:create".to_string()].into())
            .await
            .unwrap();

        let key = repo.verify(&generation.plaintext).await.unwrap().unwrap();
        assert_eq!(key.id, generation.key.id);
        assert!(key.last_used_at.is_none() == false || key.last_used_at.is_some());
    }

    #[tokio::test]
    async fn verify_fails_for_an_unknown_key() {
        let pool = setup().await;
        let repo = ApiKeyRepo::new(pool);
        assert!(repo.verify("sk_not_a_real_key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoked_key_no_longer_verifies() {
        let pool = setup().await;
        let repo = ApiKeyRepo::new(pool);
        let generation = repo.create("org_1", "user_1", "ci", HashSet::new()).await.unwrap();
        repo.revoke(&generation.key.id, "org_1").await.unwrap();
        assert!(repo.verify(&generation.plaintext).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scopes_round_trip_through_storage() {
        let pool = setup().await;
        let repo = ApiKeyRepo::new(pool);
        let scopes: HashSet<String> = ["exec:create".to_string(), "exec:read".to_string()].into();
        let generation = repo.create("org_1", "user_1", "ci", scopes.clone()).await.unwrap();
        let key = repo.verify(&generation.plaintext).await.unwrap().unwrap();
        assert_eq!(key.scopes, scopes);
    }
}
