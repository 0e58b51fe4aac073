//! SQLite database operations
//!
//! The relay's durable state is a single key/value table. Values are JSON
//! documents; see [`super::store`] for the keys in use.

use axum::async_trait;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;

use super::store::StateStore;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (or create) the SQLite file and run migrations.
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
            }
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }
}

#[async_trait]
impl StateStore for Database {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        let row = sqlx::query("SELECT value FROM relay_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("value")?;
        let value = serde_json::from_str(&raw)
            .map_err(|e| AppError::Storage(format!("Corrupt value for {}: {}", key, e)))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError> {
        let raw = serde_json::to_string(&value)?;

        sqlx::query(
            "INSERT INTO relay_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(raw)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::{ERRORS, RELAY_LIST};
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("relay.db");
        let db = Database::connect(&db_path).await.unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn get_returns_none_before_first_write() {
        let (db, _temp_dir) = create_test_db().await;
        assert!(db.get(RELAY_LIST).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_existing_document() {
        let (db, _temp_dir) = create_test_db().await;

        db.set(RELAY_LIST, json!(["https://a.example/inbox"]))
            .await
            .unwrap();
        db.set(
            RELAY_LIST,
            json!(["https://a.example/inbox", "https://b.example/inbox"]),
        )
        .await
        .unwrap();

        let value = db.get(RELAY_LIST).await.unwrap().unwrap();
        assert_eq!(
            value,
            json!(["https://a.example/inbox", "https://b.example/inbox"])
        );
    }

    #[tokio::test]
    async fn documents_survive_reconnect() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("relay.db");

        {
            let db = Database::connect(&db_path).await.unwrap();
            db.set(ERRORS, json!({"https://a.example/inbox": "2026-01-01T00:00:00Z"}))
                .await
                .unwrap();
        }

        let db = Database::connect(&db_path).await.unwrap();
        let value = db.get(ERRORS).await.unwrap().unwrap();
        assert_eq!(value["https://a.example/inbox"], "2026-01-01T00:00:00Z");
    }
}
