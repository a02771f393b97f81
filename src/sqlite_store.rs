//! SQLite-backed [`Store`] implementation.
//!
//! Every key maps to one row of the `kv` table created by
//! [`migrate`](crate::migrate). Values are stored as JSON text and written
//! with an upsert, so each `put` is atomic on its own.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use compliance_harness_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Keys starting with `prefix`, most recently updated first.
    pub async fn keys_with_prefix(&self, prefix: &str, limit: i64) -> Result<Vec<String>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            "SELECT key FROM kv WHERE key LIKE ? ESCAPE '\\' ORDER BY updated_at DESC, key ASC LIMIT ?",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let text: String = row.get("value");
                let value = serde_json::from_str(&text)
                    .with_context(|| format!("Corrupt JSON stored at {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let text = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(text)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::migrate_pool;
    use compliance_harness_core::store::{get_json, put_json};
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = connect_path(&tmp.path().join("data/kv.sqlite")).await.unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let (_tmp, store) = store().await;
        assert!(store.get("run:a").await.unwrap().is_none());

        store.put("run:a", &json!({ "status": "pending" })).await.unwrap();
        store.put("run:a", &json!({ "status": "running" })).await.unwrap();
        let value: serde_json::Value = get_json(&store, "run:a").await.unwrap().unwrap();
        assert_eq!(value["status"], "running");
    }

    #[tokio::test]
    async fn test_keys_with_prefix_escapes_wildcards() {
        let (_tmp, store) = store().await;
        put_json(&store, "run:one", &1).await.unwrap();
        put_json(&store, "run:two", &2).await.unwrap();
        put_json(&store, "doc:x:text", &"t").await.unwrap();
        put_json(&store, "runXsneaky", &3).await.unwrap();

        let mut keys = store.keys_with_prefix("run:", 10).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["run:one", "run:two"]);

        let keys = store.keys_with_prefix("run_", 10).await.unwrap();
        assert!(keys.is_empty());
    }
}
