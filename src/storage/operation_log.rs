//! Typed, append-only operation logs.
//!
//! An [`OperationLog<P>`] is a view over one table of the [`Database`] whose
//! payload column holds JSON-encoded `P`. Records are never mutated by the
//! dispatch path; the ledger reuses the same shape and rewrites payloads in
//! place through [`OperationLog::update_payloads`].

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::database::{validate_table_name, Database, StoredRow};

/// One record of a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord<P> {
    pub id: i64,
    pub account_id: i64,
    pub payload: P,
}

// ─────────────────────────────────────────────────────────────────────────────
// OperationLog
// ─────────────────────────────────────────────────────────────────────────────

pub struct OperationLog<P> {
    db: Arc<Database>,
    name: String,
    page_size: usize,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for OperationLog<P> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            name: self.name.clone(),
            page_size: self.page_size,
            _payload: PhantomData,
        }
    }
}

impl<P> std::fmt::Debug for OperationLog<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLog")
            .field("name", &self.name)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl<P> OperationLog<P>
where
    P: Serialize + DeserializeOwned,
{
    /// Opens a handle on the named log. Nothing is created until the first
    /// [`create`](Self::create) or append.
    pub fn new(db: Arc<Database>, name: &str, page_size: usize) -> Result<Self, AppError> {
        validate_table_name(name)?;

        Ok(Self {
            db,
            name: name.to_string(),
            page_size: page_size.max(1),
            _payload: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the backing table if absent.
    pub async fn create(&self) -> Result<(), AppError> {
        self.db.create_log_table(&self.name).await
    }

    pub async fn exists(&self) -> Result<bool, AppError> {
        self.db.table_exists(&self.name).await
    }

    /// Appends one record and returns its id.
    pub async fn append(&self, account_id: i64, payload: &P) -> Result<i64, AppError> {
        let encoded = encode(payload)?;
        let ids = self.db.insert_rows(&self.name, vec![(account_id, encoded)]).await?;

        ids.into_iter()
            .next()
            .ok_or_else(|| AppError::Storage("Insert returned no id".to_string()))
    }

    /// Appends every record in one transaction; on failure nothing is stored.
    pub async fn append_many<'a, I>(&self, records: I) -> Result<Vec<i64>, AppError>
    where
        I: IntoIterator<Item = (i64, &'a P)>,
        P: 'a,
    {
        let rows = records
            .into_iter()
            .map(|(account_id, payload)| Ok((account_id, encode(payload)?)))
            .collect::<Result<Vec<_>, AppError>>()?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        self.db.insert_rows(&self.name, rows).await
    }

    /// Lazily reads the log in insertion order. Call again to restart.
    pub fn stream(&self) -> LogStream<P> {
        LogStream {
            log: self.clone(),
            after_id: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Reads one record by id.
    pub async fn get(&self, id: i64) -> Result<Option<LogRecord<P>>, AppError> {
        self.db
            .read_row(&self.name, id)
            .await?
            .map(decode)
            .transpose()
    }

    /// Number of stored records; zero if the log was never created.
    pub async fn count(&self) -> Result<i64, AppError> {
        self.db.count_rows(&self.name).await
    }

    /// Rewrites the payload of each `(id, payload)` pair in one transaction.
    pub async fn update_payloads(&self, updates: &[(i64, P)]) -> Result<usize, AppError> {
        let rows = updates
            .iter()
            .map(|(id, payload)| Ok((*id, encode(payload)?)))
            .collect::<Result<Vec<_>, AppError>>()?;

        self.db.update_payloads(&self.name, rows).await
    }

    /// Drops the backing table. Irreversible.
    pub async fn drop_log(&self) -> Result<(), AppError> {
        self.db.drop_table(&self.name).await
    }

    async fn fetch_page(&self, after_id: i64) -> Result<Vec<StoredRow>, AppError> {
        self.db.read_page(&self.name, after_id, self.page_size).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LogStream
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered cursor over a log, fetched page by page (`id > last ORDER BY id`).
///
/// Rows appended while a stream is open are picked up if their id is past
/// the cursor.
pub struct LogStream<P> {
    log: OperationLog<P>,
    after_id: i64,
    buffer: VecDeque<StoredRow>,
    exhausted: bool,
}

impl<P> LogStream<P>
where
    P: Serialize + DeserializeOwned,
{
    /// Next record, or `None` at the end of the log.
    ///
    /// A payload that does not decode surfaces as `InvalidOperation` carrying
    /// the row id; the cursor has already moved past it.
    pub async fn next(&mut self) -> Result<Option<LogRecord<P>>, AppError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self.log.fetch_page(self.after_id).await?;
            if page.len() < self.log.page_size {
                self.exhausted = true;
            }
            self.buffer.extend(page);
        }

        match self.buffer.pop_front() {
            Some(row) => {
                self.after_id = row.id;
                decode(row).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Drains the remaining records.
    pub async fn collect_all(mut self) -> Result<Vec<LogRecord<P>>, AppError> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }
}

fn encode<P: Serialize>(payload: &P) -> Result<String, AppError> {
    serde_json::to_string(payload)
        .map_err(|e| AppError::Internal(format!("Failed to serialize payload: {e}")))
}

fn decode<P: DeserializeOwned>(row: StoredRow) -> Result<LogRecord<P>, AppError> {
    let payload = serde_json::from_str(&row.payload).map_err(|e| AppError::InvalidOperation {
        record_id: row.id,
        message: format!("undecodable payload: {e}"),
    })?;

    Ok(LogRecord {
        id: row.id,
        account_id: row.account_id,
        payload,
    })
}
