//! Batch dispatcher.
//!
//! Streams an operation log in insertion order, opens one remote job per run
//! of consecutive records for the same account, and uploads the built wire
//! operations in chunks of at most `chunk_size`. The ledger row for a job is
//! written right after the job is created, before any upload.
//!
//! Each ledger row remembers the range of record ids its job received. On a
//! re-run, records inside the range of a fully uploaded, unretired row for the
//! same log are skipped; everything else is dispatched again.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adwords::batch_job::BatchJob;
use crate::adwords::{OperationBuilder, TemporaryIds, WireOperation};
use crate::batch::BatchJobService;
use crate::error::AppError;
use crate::storage::ledger::{self, redact_id, Ledger, LedgerEntry, LedgerRecord};
use crate::storage::OperationLog;

/// Totals for one dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub jobs_created: usize,
    pub uploads: usize,
    pub operations: usize,
    /// Records already delivered by a fully uploaded job of an earlier run.
    pub skipped_records: usize,
}

/// The job currently receiving operations.
struct ActiveJob {
    job: BatchJob,
    entry: LedgerEntry,
    buffer: Vec<WireOperation>,
    in_batch: usize,
    last_record_id: i64,
}

/// Uploaded ledger rows for one log, grouped by account.
struct Coverage {
    source_log: String,
    by_account: HashMap<i64, Vec<LedgerRecord>>,
}

impl Coverage {
    fn covers(&self, account_id: i64, record_id: i64) -> bool {
        self.by_account.get(&account_id).is_some_and(|rows| {
            rows.iter()
                .any(|row| ledger::covers(row, &self.source_log, record_id))
        })
    }

    fn rows(&self) -> usize {
        self.by_account.values().map(Vec::len).sum()
    }
}

pub struct BatchDispatcher<S: BatchJobService> {
    service: Arc<S>,
    chunk_size: usize,
}

impl<S: BatchJobService> BatchDispatcher<S> {
    pub fn new(service: Arc<S>, chunk_size: usize) -> Self {
        Self {
            service,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Dispatches every record of `log`.
    ///
    /// Temporary ids handed to the builder start below `min_id`. A builder
    /// error stops the run immediately; chunks already uploaded stay
    /// committed remotely and the account's ledger row stays un-uploaded.
    pub async fn dispatch<P, B>(
        &self,
        log: &OperationLog<P>,
        ledger: &Ledger,
        builder: &B,
        min_id: i64,
    ) -> Result<DispatchSummary, AppError>
    where
        P: Serialize + DeserializeOwned,
        B: OperationBuilder<P> + ?Sized,
    {
        let mut summary = DispatchSummary::default();

        if log.count().await? == 0 {
            info!("[DISPATCH] {} is empty, nothing to dispatch", log.name());
            return Ok(summary);
        }

        ledger.create().await?;
        let coverage = self.coverage(ledger, log.name()).await?;
        let mut ids = TemporaryIds::below(min_id);

        info!(
            "[DISPATCH] dispatching {} (chunk size {}, {} jobs already uploaded)",
            log.name(),
            self.chunk_size,
            coverage.rows()
        );

        let mut stream = log.stream();
        let mut current_account: Option<i64> = None;
        let mut active: Option<ActiveJob> = None;

        while let Some(record) = stream.next().await? {
            if current_account != Some(record.account_id) {
                if let Some(done) = active.take() {
                    self.finish(done, ledger, &mut summary).await?;
                }
                current_account = Some(record.account_id);
            }

            if coverage.covers(record.account_id, record.id) {
                debug!(
                    "[DISPATCH] record {} of {} already uploaded, skipping",
                    record.id,
                    log.name()
                );
                summary.skipped_records += 1;
                continue;
            }

            if active.is_none() {
                active = Some(
                    self.start(record.account_id, record.id, log.name(), ledger, &mut summary)
                        .await?,
                );
            }
            let Some(job) = active.as_mut() else {
                continue;
            };

            let operations = builder.build(&record, &mut ids).map_err(|e| {
                warn!(
                    "[DISPATCH] builder failed on record {} of {}: {}",
                    record.id,
                    log.name(),
                    e.redacted()
                );
                e
            })?;

            for operation in operations {
                if job.in_batch > 0 && job.in_batch % self.chunk_size == 0 {
                    self.flush(job, false, &mut summary).await?;
                }
                job.buffer.push(operation);
                job.in_batch += 1;
                summary.operations += 1;
            }
            job.last_record_id = record.id;
        }

        if let Some(done) = active.take() {
            self.finish(done, ledger, &mut summary).await?;
        }

        info!(
            "[DISPATCH] {} done: {} jobs, {} uploads, {} operations, {} records skipped",
            log.name(),
            summary.jobs_created,
            summary.uploads,
            summary.operations,
            summary.skipped_records
        );

        Ok(summary)
    }

    async fn coverage(&self, ledger: &Ledger, source_log: &str) -> Result<Coverage, AppError> {
        let mut by_account: HashMap<i64, Vec<LedgerRecord>> = HashMap::new();
        for entry in ledger::load_entries(ledger).await? {
            let row = entry.payload;
            if row.uploaded && !row.retired && row.source_log == source_log {
                by_account.entry(row.account_id).or_default().push(row);
            }
        }

        Ok(Coverage {
            source_log: source_log.to_string(),
            by_account,
        })
    }

    async fn start(
        &self,
        account_id: i64,
        first_record_id: i64,
        source_log: &str,
        ledger: &Ledger,
        summary: &mut DispatchSummary,
    ) -> Result<ActiveJob, AppError> {
        let job = self.service.create_job(account_id).await?;
        summary.jobs_created += 1;

        info!(
            "[DISPATCH] created job {} for account {}",
            redact_id(&job.job_id),
            account_id
        );

        let mut record = LedgerRecord::new(
            account_id,
            &job.job_id,
            &job.upload_url,
            source_log,
            job.status,
        );
        record.first_record_id = first_record_id;
        record.last_record_id = first_record_id;
        let entry = ledger::record_job(ledger, record).await?;

        Ok(ActiveJob {
            job,
            entry,
            buffer: Vec::new(),
            in_batch: 0,
            last_record_id: first_record_id,
        })
    }

    async fn flush(
        &self,
        active: &mut ActiveJob,
        is_final: bool,
        summary: &mut DispatchSummary,
    ) -> Result<(), AppError> {
        debug!(
            "[DISPATCH] uploading {} operations to job {} (final={})",
            active.buffer.len(),
            redact_id(&active.job.job_id),
            is_final
        );

        self.service
            .upload(&active.job, &active.buffer, is_final)
            .await?;
        active.buffer.clear();
        summary.uploads += 1;

        Ok(())
    }

    async fn finish(
        &self,
        mut active: ActiveJob,
        ledger: &Ledger,
        summary: &mut DispatchSummary,
    ) -> Result<(), AppError> {
        self.flush(&mut active, true, summary).await?;
        active.entry.payload.last_record_id = active.last_record_id;
        ledger::mark_uploaded(ledger, &mut active.entry).await?;

        info!(
            "[DISPATCH] job {} for account {} fully uploaded ({} operations)",
            redact_id(&active.job.job_id),
            active.job.account_id,
            active.in_batch
        );

        Ok(())
    }
}
