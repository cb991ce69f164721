//! Local SQLite backing for the document store.
//!
//! Uses rusqlite with WAL mode. Documents are stored as JSON text in a
//! single `documents` table keyed by (collection, id); merge semantics are
//! applied in code via `store::merge_patch`. Provides schema migrations and
//! a delete-and-retry open path for corrupted database files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{merge_patch, Document, DocumentStore};

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// SQLite-backed [`DocumentStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    pub db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `{data_dir}/kulfi.db`.
    ///
    /// Creates the directory if needed, opens the connection, sets pragmas,
    /// and runs any pending migrations. On corruption or open failure,
    /// deletes the file and retries once.
    pub fn init(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)
            .map_err(|e| StoreError::Backend(format!("create data dir: {e}")))?;

        let db_path = data_dir.join("kulfi.db");
        info!("Opening database at {}", db_path.display());

        let conn = match open_and_configure(&db_path) {
            Ok(c) => c,
            Err(first_err) => {
                warn!(
                    "Database open failed ({}), deleting and retrying once",
                    first_err
                );
                if db_path.exists() {
                    let _ = fs::remove_file(&db_path);
                    // Also remove WAL/SHM files if present
                    let _ = fs::remove_file(db_path.with_extension("db-wal"));
                    let _ = fs::remove_file(db_path.with_extension("db-shm"));
                }
                open_and_configure(&db_path).map_err(|e| {
                    StoreError::Backend(format!("database open failed after retry: {e}"))
                })?
            }
        };

        run_migrations(&conn)?;

        info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database, mainly for tests and scratch sessions.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("sqlite open: {e}")))?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| StoreError::Backend(format!("pragma setup: {e}")))?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, StoreError> {
    let conn =
        Connection::open(path).map_err(|e| StoreError::Backend(format!("sqlite open: {e}")))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| StoreError::Backend(format!("pragma setup: {e}")))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| StoreError::Backend(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: the documents table.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        -- documents (one row per collection/id, JSON body)
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (collection, id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        StoreError::Backend(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1 (documents table)");
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError> {
        let conn = self.lock()?;
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(&data)
            .map_err(|e| StoreError::Backend(format!("encode document: {e}")))?;
        conn.execute(
            "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
            params![collection, id, body],
        )
        .map_err(|e| StoreError::Backend(format!("insert document: {e}")))?;
        Ok(Document { id, data })
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, data FROM documents WHERE collection = ?1 ORDER BY id")
            .map_err(|e| StoreError::Backend(format!("prepare read_all: {e}")))?;

        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StoreError::Backend(format!("query read_all: {e}")))?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, body) = row.map_err(|e| StoreError::Backend(format!("read row: {e}")))?;
            match serde_json::from_str(&body) {
                Ok(data) => documents.push(Document { id, data }),
                Err(e) => warn!(collection, id = %id, "skipping malformed document: {e}"),
            }
        }
        Ok(documents)
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("read document: {e}")))?;

        match body {
            Some(body) => {
                let data = serde_json::from_str(&body)
                    .map_err(|e| StoreError::Backend(format!("decode document {id}: {e}")))?;
                Ok(Some(Document {
                    id: id.to_string(),
                    data,
                }))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("read for update: {e}")))?;

        let mut target = match existing {
            Some(body) => serde_json::from_str(&body)
                .map_err(|e| StoreError::Backend(format!("decode document {id}: {e}")))?,
            None => Value::Object(Map::new()),
        };
        merge_patch(&mut target, &patch);

        let body = serde_json::to_string(&target)
            .map_err(|e| StoreError::Backend(format!("encode document: {e}")))?;
        conn.execute(
            "INSERT INTO documents (collection, id, data, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(collection, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![collection, id, body],
        )
        .map_err(|e| StoreError::Backend(format!("upsert document: {e}")))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )
        .map_err(|e| StoreError::Backend(format!("delete document: {e}")))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_migrations_create_documents_table() {
        let store = SqliteStore::open_in_memory().expect("open");
        let conn = store.conn.lock().expect("lock");
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
                [],
                |row| row.get(0),
            )
            .expect("table lookup");
        assert_eq!(count, 1, "documents table should exist");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("read schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let store = SqliteStore::open_in_memory().expect("open");
        let conn = store.conn.lock().expect("lock");
        run_migrations(&conn).expect("second run should succeed");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("read schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_wal_mode_on_file_db() {
        // WAL only works on file-backed databases; in-memory always returns
        // "memory". Use a temp dir to exercise the full init path.
        let dir = std::env::temp_dir().join("kulfi_ops_test_wal");
        let _ = std::fs::remove_dir_all(&dir);

        let store = SqliteStore::init(&dir).expect("init temp db");
        {
            let conn = store.conn.lock().expect("lock");
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .expect("read journal_mode");
            assert_eq!(mode.to_lowercase(), "wal", "journal_mode should be WAL");
        }

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteStore::open_in_memory().expect("open");

        let created = store
            .create("kulfiCarts", json!({"address": "MG Road"}))
            .await
            .expect("create");

        let all = store.read_all("kulfiCarts").await.expect("read_all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, created.id);
        assert_eq!(all[0].data["address"], "MG Road");

        store
            .delete("kulfiCarts", &created.id)
            .await
            .expect("delete");
        assert!(store
            .read("kulfiCarts", &created.id)
            .await
            .expect("read")
            .is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_merge_and_dotted_paths() {
        let store = SqliteStore::open_in_memory().expect("open");

        store
            .update(
                "warehouseInventory",
                "stickKulfi",
                json!({"quantity": 100, "costPrice": 7.5, "sellingPrice": 10.0}),
            )
            .await
            .expect("seed");
        store
            .update("warehouseInventory", "stickKulfi", json!({"quantity": 70}))
            .await
            .expect("merge");

        let doc = store
            .read("warehouseInventory", "stickKulfi")
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(
            doc.data,
            json!({"quantity": 70, "costPrice": 7.5, "sellingPrice": 10.0})
        );

        store
            .update(
                "dailyStockSummary/2025/months",
                "04",
                json!({"dailySummaries.2025-04-28.stickSold": 25}),
            )
            .await
            .expect("dotted upsert");
        let month = store
            .read("dailyStockSummary/2025/months", "04")
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(month.data["dailySummaries"]["2025-04-28"]["stickSold"], 25);
    }
}
