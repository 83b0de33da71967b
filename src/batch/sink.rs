//! Reconciliation sink: turns remote status payloads into ledger row rewrites.

use tracing::info;

use crate::adwords::batch_job::JobStatusInfo;
use crate::error::AppError;
use crate::storage::ledger::{self, Ledger, LedgerEntry, LedgerRecord};

/// Normalized rewrite of one ledger row.
///
/// `row_id` is the ledger row captured at dispatch time; updates never look
/// rows up by job id.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub row_id: i64,
    pub record: LedgerRecord,
}

pub struct ReconciliationSink {
    ledger: Ledger,
}

impl ReconciliationSink {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Merges a status payload into the stored record.
    ///
    /// Status is replaced, the result URL is taken when present, and progress
    /// counters are merged with lower-cased keys.
    pub fn normalize(entry: &LedgerEntry, info: &JobStatusInfo) -> LedgerUpdate {
        let mut record = entry.payload.clone();
        record.status = info.status;

        if let Some(url) = &info.result_url {
            record.result_url = url.clone();
        }

        for (key, value) in &info.progress {
            record.progress.insert(key.to_lowercase(), *value);
        }

        LedgerUpdate {
            row_id: entry.id,
            record,
        }
    }

    /// Writes every update of one poll cycle in a single transaction.
    pub async fn apply(&self, updates: &[LedgerUpdate]) -> Result<usize, AppError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let rows: Vec<(i64, LedgerRecord)> = updates
            .iter()
            .map(|u| (u.row_id, u.record.clone()))
            .collect();

        let written = self.ledger.update_payloads(&rows).await?;

        info!(
            "[LEDGER] applied {} status updates to {}",
            written,
            self.ledger.name()
        );

        Ok(written)
    }

    /// Terminal ledger rows, for reporting on finished jobs.
    pub async fn completed(&self) -> Result<Vec<LedgerEntry>, AppError> {
        ledger::load_completed(&self.ledger).await
    }
}
