//! Application state shared by every command.
//!
//! Holds the database handle, the loaded configuration and two lazily
//! populated caches keyed by log name: operation-log handles and the lowest
//! identifier seen in each log.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::adwords::Operation;
use crate::config::Config;
use crate::error::AppError;
use crate::storage::{Database, Ledger, OperationLog};

// ─────────────────────────────────────────────────────────────────────────────
// Application State
// ─────────────────────────────────────────────────────────────────────────────

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    logs: RwLock<HashMap<String, OperationLog<Operation>>>,
    /// Lowest identifier per log, never above `dispatch.min_id_floor`.
    min_ids: RwLock<HashMap<String, i64>>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            db: Arc::new(db),
            config,
            logs: RwLock::new(HashMap::new()),
            min_ids: RwLock::new(HashMap::new()),
        }
    }

    /// Validates the configuration and opens the configured database.
    pub async fn open(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let db = Database::init(config.storage.database_path.clone()).await?;
        Ok(Self::new(db, config))
    }

    /// Returns the handle for `name`, creating and caching it on first use.
    pub async fn operation_log(&self, name: &str) -> Result<OperationLog<Operation>, AppError> {
        if let Some(log) = self.logs.read().await.get(name) {
            return Ok(log.clone());
        }

        let log = OperationLog::new(
            self.db.clone(),
            name,
            self.config.storage.stream_page_size,
        )?;

        let mut logs = self.logs.write().await;
        Ok(logs.entry(name.to_string()).or_insert(log).clone())
    }

    pub fn ledger(&self) -> Result<Ledger, AppError> {
        Ledger::new(
            self.db.clone(),
            &self.config.dispatch.ledger_name,
            self.config.storage.stream_page_size,
        )
    }

    /// Folds a newly inserted identifier into the cached minimum.
    ///
    /// Without a cached value nothing is recorded; the next `min_id` call
    /// scans the whole log, new rows included.
    pub async fn observe_min_id(&self, name: &str, candidate: i64) {
        if let Some(current) = self.min_ids.write().await.get_mut(name) {
            *current = (*current).min(candidate);
        }
    }

    /// Lowest identifier in the log, bounded above by the configured floor.
    pub async fn min_id(&self, log: &OperationLog<Operation>) -> Result<i64, AppError> {
        if let Some(min) = self.min_ids.read().await.get(log.name()) {
            return Ok(*min);
        }

        let mut min = self.config.dispatch.min_id_floor;
        let mut stream = log.stream();
        while let Some(record) = stream.next().await? {
            min = min.min(record.payload.min_id());
        }

        debug!("[STATE] computed min id {} for {}", min, log.name());
        self.min_ids
            .write()
            .await
            .insert(log.name().to_string(), min);
        Ok(min)
    }

    /// Drops both cached entries for `name`.
    pub async fn forget_log(&self, name: &str) {
        self.logs.write().await.remove(name);
        self.min_ids.write().await.remove(name);
    }
}
