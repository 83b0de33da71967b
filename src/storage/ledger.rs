//! Batch job ledger.
//!
//! The ledger is an [`OperationLog`] whose payloads are [`LedgerRecord`]s, one
//! row per remote job. Dispatch appends a row as soon as a job exists remotely,
//! and the tracker rewrites that same row (addressed by row id) whenever the
//! remote status changes. Rows survive restarts, so a later `wait_jobs` can
//! pick up jobs created by an earlier process.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adwords::BatchJobStatus;
use crate::error::AppError;
use crate::storage::operation_log::{LogRecord, OperationLog};

pub type Ledger = OperationLog<LedgerRecord>;

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Last known state of one remote batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Unix timestamp (seconds) of job creation.
    pub creation_time: i64,
    pub account_id: i64,
    pub job_id: String,
    #[serde(default)]
    pub upload_url: String,
    #[serde(default)]
    pub result_url: String,
    /// Operation log the job was dispatched from.
    #[serde(default)]
    pub source_log: String,
    pub status: BatchJobStatus,
    /// Set once the final chunk has been uploaded.
    #[serde(default)]
    pub uploaded: bool,
    /// Ids of the first and last source-log records sent to this job.
    #[serde(default)]
    pub first_record_id: i64,
    #[serde(default)]
    pub last_record_id: i64,
    /// Set when the source log was cleared; the id range no longer refers
    /// to any stored record.
    #[serde(default)]
    pub retired: bool,
    /// Progress counters, keys lower-cased.
    #[serde(flatten)]
    pub progress: BTreeMap<String, i64>,
}

impl LedgerRecord {
    pub fn new(
        account_id: i64,
        job_id: &str,
        upload_url: &str,
        source_log: &str,
        status: BatchJobStatus,
    ) -> Self {
        Self {
            creation_time: current_timestamp(),
            account_id,
            job_id: job_id.to_string(),
            upload_url: upload_url.to_string(),
            result_url: String::new(),
            source_log: source_log.to_string(),
            status,
            uploaded: false,
            first_record_id: 0,
            last_record_id: 0,
            retired: false,
            progress: BTreeMap::new(),
        }
    }
}

/// A ledger row: the record plus the row id every update must target.
pub type LedgerEntry = LogRecord<LedgerRecord>;

// ─────────────────────────────────────────────────────────────────────────────
// Storage Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Appends a ledger row for a freshly created job.
pub async fn record_job(ledger: &Ledger, record: LedgerRecord) -> Result<LedgerEntry, AppError> {
    let row_id = ledger.append(record.account_id, &record).await?;

    info!(
        "[LEDGER] recorded job {} for account {} (row {})",
        redact_id(&record.job_id),
        record.account_id,
        row_id
    );

    Ok(LogRecord {
        id: row_id,
        account_id: record.account_id,
        payload: record,
    })
}

/// Flags a job as fully uploaded.
pub async fn mark_uploaded(ledger: &Ledger, entry: &mut LedgerEntry) -> Result<(), AppError> {
    entry.payload.uploaded = true;
    ledger
        .update_payloads(&[(entry.id, entry.payload.clone())])
        .await?;
    Ok(())
}

/// Does this row prove that `record_id` of `source_log` was fully uploaded?
pub fn covers(record: &LedgerRecord, source_log: &str, record_id: i64) -> bool {
    record.uploaded
        && !record.retired
        && record.source_log == source_log
        && (record.first_record_id..=record.last_record_id).contains(&record_id)
}

/// Marks every live row dispatched from `source_log` as retired, in one
/// transaction. Returns the number of rows changed.
pub async fn retire_source(ledger: &Ledger, source_log: &str) -> Result<usize, AppError> {
    let updates: Vec<(i64, LedgerRecord)> = load_entries(ledger)
        .await?
        .into_iter()
        .filter(|entry| entry.payload.source_log == source_log && !entry.payload.retired)
        .map(|mut entry| {
            entry.payload.retired = true;
            (entry.id, entry.payload)
        })
        .collect();

    if updates.is_empty() {
        return Ok(0);
    }

    let changed = ledger.update_payloads(&updates).await?;
    info!("[LEDGER] retired {} rows for {}", changed, source_log);
    Ok(changed)
}

/// Every ledger row in insertion order.
pub async fn load_entries(ledger: &Ledger) -> Result<Vec<LedgerEntry>, AppError> {
    ledger.stream().collect_all().await
}

/// Rows whose last known status is non-terminal.
pub async fn load_pending(ledger: &Ledger) -> Result<Vec<LedgerEntry>, AppError> {
    Ok(load_entries(ledger)
        .await?
        .into_iter()
        .filter(|entry| !entry.payload.status.is_terminal())
        .collect())
}

/// Rows whose job reached DONE or CANCELED.
pub async fn load_completed(ledger: &Ledger) -> Result<Vec<LedgerEntry>, AppError> {
    Ok(load_entries(ledger)
        .await?
        .into_iter()
        .filter(|entry| entry.payload.status.is_terminal())
        .collect())
}

/// Returns current unix timestamp in seconds.
fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Redacts a job ID for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::storage::Database;

    async fn test_ledger() -> (TempDir, Ledger) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::init(temp_dir.path().join("test.db"))
            .await
            .expect("Failed to init DB");
        let ledger = Ledger::new(Arc::new(db), "batchlog_table", 100).expect("valid name");
        (temp_dir, ledger)
    }

    #[tokio::test]
    async fn record_and_load_roundtrip() {
        let (_dir, ledger) = test_ledger().await;

        let entry = record_job(
            &ledger,
            LedgerRecord::new(111, "job-1", "https://upload/1", "ops", BatchJobStatus::Active),
        )
        .await
        .expect("record_job");

        let loaded = load_entries(&ledger).await.unwrap();
        assert_eq!(loaded, vec![entry]);
        assert!(!loaded[0].payload.uploaded);
        assert!(loaded[0].payload.creation_time > 0);
    }

    #[tokio::test]
    async fn mark_uploaded_persists_flag() {
        let (_dir, ledger) = test_ledger().await;
        let mut entry = record_job(
            &ledger,
            LedgerRecord::new(1, "job-1", "u", "ops", BatchJobStatus::Active),
        )
        .await
        .unwrap();

        mark_uploaded(&ledger, &mut entry).await.unwrap();

        let stored = ledger.get(entry.id).await.unwrap().unwrap();
        assert!(stored.payload.uploaded);
    }

    #[tokio::test]
    async fn pending_and_completed_partition_rows() {
        let (_dir, ledger) = test_ledger().await;

        for (job, status) in [
            ("a", BatchJobStatus::Active),
            ("b", BatchJobStatus::Done),
            ("c", BatchJobStatus::Processing),
            ("d", BatchJobStatus::Canceled),
        ] {
            record_job(&ledger, LedgerRecord::new(1, job, "u", "ops", status))
                .await
                .unwrap();
        }

        let pending: Vec<String> = load_pending(&ledger)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.payload.job_id)
            .collect();
        let completed: Vec<String> = load_completed(&ledger)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.payload.job_id)
            .collect();

        assert_eq!(pending, vec!["a", "c"]);
        assert_eq!(completed, vec!["b", "d"]);
    }

    #[tokio::test]
    async fn retire_source_only_touches_matching_rows() {
        let (_dir, ledger) = test_ledger().await;
        for source in ["ops", "other", "ops"] {
            record_job(
                &ledger,
                LedgerRecord::new(1, "job", "u", source, BatchJobStatus::Active),
            )
            .await
            .unwrap();
        }

        assert_eq!(retire_source(&ledger, "ops").await.unwrap(), 2);
        assert_eq!(retire_source(&ledger, "ops").await.unwrap(), 0);

        let retired: Vec<bool> = load_entries(&ledger)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.payload.retired)
            .collect();
        assert_eq!(retired, vec![true, false, true]);
    }

    #[tokio::test]
    async fn retire_source_on_missing_ledger_is_a_noop() {
        let (_dir, ledger) = test_ledger().await;
        assert_eq!(retire_source(&ledger, "ops").await.unwrap(), 0);
        assert!(!ledger.exists().await.unwrap());
    }

    #[test]
    fn covers_requires_uploaded_live_row_and_id_in_range() {
        let mut record = LedgerRecord::new(1, "job", "u", "ops", BatchJobStatus::Active);
        record.first_record_id = 3;
        record.last_record_id = 5;
        assert!(!covers(&record, "ops", 4), "not uploaded yet");

        record.uploaded = true;
        assert!(covers(&record, "ops", 3));
        assert!(covers(&record, "ops", 5));
        assert!(!covers(&record, "ops", 6));
        assert!(!covers(&record, "other", 4));

        record.retired = true;
        assert!(!covers(&record, "ops", 4));
    }

    #[test]
    fn rows_written_before_range_fields_still_decode() {
        let legacy = r#"{"creation_time":1,"account_id":2,"job_id":"j","status":"DONE","uploaded":true}"#;
        let record: LedgerRecord = serde_json::from_str(legacy).unwrap();
        assert_eq!(record.first_record_id, 0);
        assert!(!record.retired);
        assert!(record.progress.is_empty());
    }

    #[test]
    fn progress_is_flattened_into_record_json() {
        let mut record = LedgerRecord::new(1, "job", "u", "ops", BatchJobStatus::Done);
        record.progress.insert("numoperationsexecuted".into(), 10);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["numoperationsexecuted"], 10);
        assert_eq!(value["status"], "DONE");

        let back: LedgerRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn redact_id_truncates_long_ids() {
        assert_eq!(redact_id("1234567890123"), "12345678...");
        assert_eq!(redact_id("short"), "short");
    }
}
