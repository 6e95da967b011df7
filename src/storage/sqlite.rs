//! SQLite persistence backend
//!
//! A single `kv_store` table holds one blob per key. Calls run on the
//! tokio-rusqlite connection thread.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use tokio_rusqlite::Connection;

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::{
    errors::{FogWalletError, FogWalletResult},
    storage::PersistenceAdapter,
};

pub struct SqlitePersistence {
    connection: Connection,
}

impl SqlitePersistence {
    /// Open (or create) the database at `database_path`
    pub async fn new<P: AsRef<Path>>(database_path: P) -> FogWalletResult<Self> {
        let connection = Connection::open(database_path).await.map_err(|e| {
            FogWalletError::StorageError(format!("Failed to open SQLite database: {e}"))
        })?;
        Self::with_connection(connection).await
    }

    /// In-memory database, mostly for tests
    pub async fn new_in_memory() -> FogWalletResult<Self> {
        let connection = Connection::open_in_memory().await.map_err(|e| {
            FogWalletError::StorageError(format!("Failed to create in-memory database: {e}"))
        })?;
        Self::with_connection(connection).await
    }

    async fn with_connection(connection: Connection) -> FogWalletResult<Self> {
        let storage = Self { connection };
        storage.create_schema().await?;
        Ok(storage)
    }

    async fn create_schema(&self) -> FogWalletResult<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
        "#;

        self.connection
            .call(move |conn| Ok(conn.execute_batch(sql)?))
            .await
            .map_err(|e| FogWalletError::StorageError(format!("Failed to create schema: {e}")))?;

        #[cfg(feature = "tracing")]
        debug!("SQLite persistence schema ready");
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistence {
    async fn get(&self, key: &str) -> FogWalletResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?")?;
                let value: Option<Vec<u8>> = stmt
                    .query_row(params![key], |row| row.get(0))
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(|e| FogWalletError::StorageError(format!("Failed to read key: {e}")))
    }

    async fn set(&self, key: &str, value: &[u8]) -> FogWalletResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.connection
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO kv_store (key, value) VALUES (?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                    params![key, value],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| FogWalletError::StorageError(format!("Failed to write key: {e}")))
    }

    async fn has(&self, key: &str) -> FogWalletResult<bool> {
        let key = key.to_string();
        self.connection
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM kv_store WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(|e| FogWalletError::StorageError(format!("Failed to check key: {e}")))
    }

    async fn clear(&self, key: &str) -> FogWalletResult<()> {
        let key = key.to_string();
        self.connection
            .call(move |conn| {
                conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
                Ok(())
            })
            .await
            .map_err(|e| FogWalletError::StorageError(format!("Failed to clear key: {e}")))
    }
}
