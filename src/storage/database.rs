//! SQLite table store backing every operation log.
//!
//! Each log is its own table with the fixed shape
//! `(id INTEGER PRIMARY KEY AUTOINCREMENT, account_id INTEGER, payload TEXT)`.
//! Every call opens a short-lived connection on the blocking pool; nothing
//! holds a connection across an await point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::error::AppError;

/// One raw row of a log table, payload still serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: i64,
    pub account_id: i64,
    pub payload: String,
}

/// SQLite database handle.
#[derive(Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Initializes the database at the given path.
    /// Creates parent directories if needed, opens the SQLite file and configures it.
    pub async fn init(db_path: PathBuf) -> Result<Self, AppError> {
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::Storage(format!("Failed to create database directory: {e}"))
                    })?;
                }
            }

            open(&path)?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Database init task failed: {e}")))??;

        Ok(Self { db_path })
    }

    /// Returns the database path for use by other storage modules.
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Simple health check: executes SELECT 1.
    pub async fn health_check(&self) -> Result<(), AppError> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;

            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AppError::Storage(format!("Health check failed: {e}")))?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Health check task failed: {e}")))??;

        Ok(())
    }

    /// Creates the log table and its account index if they do not exist.
    pub async fn create_log_table(&self, table: &str) -> Result<(), AppError> {
        validate_table_name(table)?;
        let db_path = self.db_path.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            ensure_table(&conn, &table)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Create table task failed: {e}")))?
    }

    /// Returns true if the table exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool, AppError> {
        validate_table_name(table)?;
        let db_path = self.db_path.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            table_present(&conn, &table)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Table lookup task failed: {e}")))?
    }

    /// Drops the table. Dropping a missing table is not an error.
    pub async fn drop_table(&self, table: &str) -> Result<(), AppError> {
        validate_table_name(table)?;
        let db_path = self.db_path.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;

            conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))
                .map_err(|e| AppError::Storage(format!("Failed to drop {table}: {e}")))?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Drop table task failed: {e}")))?
    }

    /// Inserts rows in one transaction, creating the table first if needed.
    /// Returns the assigned ids in input order. Either every row lands or none does.
    pub async fn insert_rows(
        &self,
        table: &str,
        rows: Vec<(i64, String)>,
    ) -> Result<Vec<i64>, AppError> {
        validate_table_name(table)?;
        let db_path = self.db_path.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;

            let tx = conn
                .transaction()
                .map_err(|e| AppError::Storage(format!("Failed to start transaction: {e}")))?;

            ensure_table(&tx, &table)?;

            let mut ids = Vec::with_capacity(rows.len());
            {
                let mut stmt = tx
                    .prepare(&format!(
                        "INSERT INTO {table} (account_id, payload) VALUES (?1, ?2)"
                    ))
                    .map_err(|e| AppError::Storage(format!("Failed to prepare insert: {e}")))?;

                for (account_id, payload) in &rows {
                    stmt.execute(rusqlite::params![account_id, payload])
                        .map_err(|e| AppError::Storage(format!("Failed to insert into {table}: {e}")))?;
                    ids.push(tx.last_insert_rowid());
                }
            }

            tx.commit()
                .map_err(|e| AppError::Storage(format!("Failed to commit insert: {e}")))?;

            Ok::<_, AppError>(ids)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Insert task failed: {e}")))?
    }

    /// Reads up to `limit` rows with `id > after_id`, in id order.
    /// A missing table reads as empty.
    pub async fn read_page(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredRow>, AppError> {
        validate_table_name(table)?;
        let db_path = self.db_path.clone();
        let table = table.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;

            if !table_present(&conn, &table)? {
                return Ok(Vec::new());
            }

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, account_id, payload FROM {table} WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
                ))
                .map_err(|e| AppError::Storage(format!("Failed to prepare query: {e}")))?;

            let rows = stmt
                .query_map(rusqlite::params![after_id, limit], |row| {
                    Ok(StoredRow {
                        id: row.get(0)?,
                        account_id: row.get(1)?,
                        payload: row.get(2)?,
                    })
                })
                .map_err(|e| AppError::Storage(format!("Failed to query {table}: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::Storage(format!("Failed to collect rows: {e}")))?;

            Ok::<_, AppError>(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Read page task failed: {e}")))?
    }

    /// Reads a single row by id.
    pub async fn read_row(&self, table: &str, id: i64) -> Result<Option<StoredRow>, AppError> {
        validate_table_name(table)?;
        let db_path = self.db_path.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;

            if !table_present(&conn, &table)? {
                return Ok(None);
            }

            conn.query_row(
                &format!("SELECT id, account_id, payload FROM {table} WHERE id = ?1"),
                [id],
                |row| {
                    Ok(StoredRow {
                        id: row.get(0)?,
                        account_id: row.get(1)?,
                        payload: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("Failed to read row {id}: {e}")))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Read row task failed: {e}")))?
    }

    /// Number of rows in the table; a missing table counts as zero.
    pub async fn count_rows(&self, table: &str) -> Result<i64, AppError> {
        validate_table_name(table)?;
        let db_path = self.db_path.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;

            if !table_present(&conn, &table)? {
                return Ok(0);
            }

            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(|e| AppError::Storage(format!("Failed to count {table}: {e}")))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Count task failed: {e}")))?
    }

    /// Replaces the payload of each listed row in one transaction.
    /// Returns the number of rows actually changed.
    pub async fn update_payloads(
        &self,
        table: &str,
        updates: Vec<(i64, String)>,
    ) -> Result<usize, AppError> {
        validate_table_name(table)?;
        if updates.is_empty() {
            return Ok(0);
        }

        let db_path = self.db_path.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;

            let tx = conn
                .transaction()
                .map_err(|e| AppError::Storage(format!("Failed to start transaction: {e}")))?;

            let mut changed = 0;
            {
                let mut stmt = tx
                    .prepare(&format!("UPDATE {table} SET payload = ?1 WHERE id = ?2"))
                    .map_err(|e| AppError::Storage(format!("Failed to prepare update: {e}")))?;

                for (id, payload) in &updates {
                    changed += stmt
                        .execute(rusqlite::params![payload, id])
                        .map_err(|e| AppError::Storage(format!("Failed to update row {id}: {e}")))?;
                }
            }

            tx.commit()
                .map_err(|e| AppError::Storage(format!("Failed to commit update: {e}")))?;

            Ok::<_, AppError>(changed)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Update task failed: {e}")))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Table names are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub fn validate_table_name(name: &str) -> Result<(), AppError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid && !name.to_ascii_lowercase().starts_with("sqlite_") {
        Ok(())
    } else {
        Err(AppError::InvalidLogName(name.to_string()))
    }
}

fn open(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path)
        .map_err(|e| AppError::Storage(format!("Failed to open database: {e}")))?;

    configure_connection(&conn)?;

    Ok(conn)
}

/// Configures connection with busy timeout and WAL mode.
fn configure_connection(conn: &Connection) -> Result<(), AppError> {
    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| AppError::Storage(format!("Failed to set busy timeout: {e}")))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Storage(format!("Failed to set WAL mode: {e}")))?;

    Ok(())
}

fn ensure_table(conn: &Connection, table: &str) -> Result<(), AppError> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_account_id ON {table}(account_id);
        "#
    ))
    .map_err(|e| AppError::Storage(format!("Failed to create {table}: {e}")))
}

fn table_present(conn: &Connection, table: &str) -> Result<bool, AppError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
    .map_err(|e| AppError::Storage(format!("Failed to look up table {table}: {e}")))
}
