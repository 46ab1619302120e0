//! SQLite backend implementation
//!
//! All collections share one `documents` table keyed by `(collection, id)`.
//! Each session owns a single connection, opened on first use, so that a
//! broken connection is confined to the session that hit it.

use crate::{Collection, Document, Result, StoreError, StoreSession};
use anyhow::Context;
use async_trait::async_trait;
use corral_core_resilience::PooledSession;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (collection, id)
)";

/// SQLite-backed document store
#[derive(Clone)]
pub struct SqliteStore {
    options: Arc<SqliteConnectOptions>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the specified path
    ///
    /// Creates the schema if it is missing.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        // Configure connection with WAL mode for better concurrency
        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let mut conn = options
            .connect()
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        sqlx::query(SCHEMA)
            .execute(&mut conn)
            .await
            .context("Failed to create schema")?;
        conn.close().await.context("Failed to close setup connection")?;

        info!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            options: Arc::new(options),
        })
    }

    /// Returns an unconnected session.
    pub fn session(&self) -> SqliteSession {
        SqliteSession {
            options: Arc::clone(&self.options),
            conn: OnceCell::new(),
            dead: AtomicBool::new(false),
        }
    }
}

/// A session holding at most one SQLite connection.
pub struct SqliteSession {
    options: Arc<SqliteConnectOptions>,
    conn: OnceCell<Mutex<SqliteConnection>>,
    dead: AtomicBool,
}

impl SqliteSession {
    async fn connection(&self) -> Result<&Mutex<SqliteConnection>> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected("session is dead".into()));
        }
        self.conn
            .get_or_try_init(|| async {
                debug!("Connecting SQLite session");
                self.options.connect().await.map(Mutex::new)
            })
            .await
            .map_err(|e| self.classify(e))
    }

    /// Maps a driver error, marking the session dead on transport failures.
    fn classify(&self, err: sqlx::Error) -> StoreError {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                warn!(error = %err, "SQLite session lost its connection");
                self.dead.store(true, Ordering::SeqCst);
                StoreError::Disconnected(err.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }

    async fn current_version(&self, collection: Collection, id: &str) -> Result<Option<u64>> {
        let mut conn = self.connection().await?.lock().await;
        let row = sqlx::query("SELECT version FROM documents WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| self.classify(e))?;
        row.map(|r| r.try_get::<i64, _>("version").map(|v| v as u64))
            .transpose()
            .map_err(|e| self.classify(e))
    }
}

// Helper to convert SqliteRow to Document
fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let id: String = row
        .try_get("id")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let body: String = row
        .try_get("body")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let body = serde_json::from_str(&body).map_err(|e| StoreError::Malformed {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    Ok(Document {
        id,
        version: version as u64,
        body,
    })
}

impl PooledSession for SqliteSession {
    fn renew(&self) -> Self {
        Self {
            options: Arc::clone(&self.options),
            conn: OnceCell::new(),
            dead: AtomicBool::new(false),
        }
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn close(&self) {
        // The connection itself closes when the last lease drops the session.
        self.dead.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn get(&self, collection: Collection, id: &str) -> Result<Document> {
        let mut conn = self.connection().await?.lock().await;
        let row = sqlx::query(
            "SELECT id, version, body FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| self.classify(e))?;

        match row {
            Some(r) => row_to_document(&r),
            None => Err(StoreError::NotFound {
                collection: collection.as_str(),
                id: id.to_string(),
            }),
        }
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        body: serde_json::Value,
    ) -> Result<Document> {
        let mut conn = self.connection().await?.lock().await;
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, version, body) VALUES (?, ?, 1, ?)",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(body.to_string())
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(Document {
                id: id.to_string(),
                version: 1,
                body,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::AlreadyExists {
                    collection: collection.as_str(),
                    id: id.to_string(),
                })
            }
            Err(e) => Err(self.classify(e)),
        }
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        expected_version: u64,
        body: serde_json::Value,
    ) -> Result<Document> {
        let affected = {
            let mut conn = self.connection().await?.lock().await;
            sqlx::query(
                "UPDATE documents SET body = ?, version = version + 1
                 WHERE collection = ? AND id = ? AND version = ?",
            )
            .bind(body.to_string())
            .bind(collection.as_str())
            .bind(id)
            .bind(expected_version as i64)
            .execute(&mut *conn)
            .await
            .map_err(|e| self.classify(e))?
            .rows_affected()
        };

        if affected == 1 {
            return Ok(Document {
                id: id.to_string(),
                version: expected_version + 1,
                body,
            });
        }

        match self.current_version(collection, id).await? {
            None => Err(StoreError::NotFound {
                collection: collection.as_str(),
                id: id.to_string(),
            }),
            Some(_) => Err(StoreError::Conflict {
                collection: collection.as_str(),
                id: id.to_string(),
                expected: expected_version,
            }),
        }
    }

    async fn remove(&self, collection: Collection, id: &str) -> Result<()> {
        let mut conn = self.connection().await?.lock().await;
        let affected = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| self.classify(e))?
            .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound {
                collection: collection.as_str(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn scan(&self, collection: Collection, prefix: &str) -> Result<Vec<Document>> {
        let mut conn = self.connection().await?.lock().await;
        let rows = sqlx::query(
            "SELECT id, version, body FROM documents
             WHERE collection = ?1 AND substr(id, 1, length(?2)) = ?2
             ORDER BY id ASC",
        )
        .bind(collection.as_str())
        .bind(prefix)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| self.classify(e))?;

        rows.iter().map(row_to_document).collect()
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?.lock().await;
        conn.ping().await.map_err(|e| self.classify(e))
    }
}
