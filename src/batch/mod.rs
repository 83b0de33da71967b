//! Batch job orchestration: dispatch queued operations to remote jobs, track
//! those jobs to completion and mirror their status into the ledger.

pub mod dispatcher;
pub mod sink;
pub mod tracker;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::adwords::batch_job::{BatchJob, BatchJobHttpClient, JobStatusInfo};
use crate::adwords::WireOperation;
use crate::error::AppError;

pub use dispatcher::{BatchDispatcher, DispatchSummary};
pub use sink::{LedgerUpdate, ReconciliationSink};
pub use tracker::{Backoff, JobCollection, JobTracker};

// ─────────────────────────────────────────────────────────────────────────────
// Remote Service Seam
// ─────────────────────────────────────────────────────────────────────────────

/// Operations the orchestrator needs from the remote batch service.
pub trait BatchJobService: Send + Sync {
    /// Creates an empty job for the account.
    fn create_job(
        &self,
        account_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<BatchJob, AppError>> + Send + '_>>;

    /// Uploads one chunk; `is_final` closes the job's upload stream.
    fn upload<'a>(
        &'a self,
        job: &'a BatchJob,
        operations: &'a [WireOperation],
        is_final: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Current status of every listed job, in one round trip.
    /// Jobs unknown to the remote side are absent from the map.
    fn query_status<'a>(
        &'a self,
        job_ids: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, JobStatusInfo>, AppError>> + Send + 'a>>;
}

impl BatchJobService for BatchJobHttpClient {
    fn create_job(
        &self,
        account_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<BatchJob, AppError>> + Send + '_>> {
        Box::pin(BatchJobHttpClient::create_job(self, account_id))
    }

    fn upload<'a>(
        &'a self,
        job: &'a BatchJob,
        operations: &'a [WireOperation],
        is_final: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(BatchJobHttpClient::upload_operations(
            self, job, operations, is_final,
        ))
    }

    fn query_status<'a>(
        &'a self,
        job_ids: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, JobStatusInfo>, AppError>> + Send + 'a>>
    {
        Box::pin(async move {
            let statuses = BatchJobHttpClient::query_status(self, job_ids).await?;
            Ok(statuses
                .into_iter()
                .map(|info| (info.job_id.clone(), info))
                .collect())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test Fake
// ─────────────────────────────────────────────────────────────────────────────
