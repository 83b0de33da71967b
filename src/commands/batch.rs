//! Batch job commands: dispatch a log, wait for its jobs, report results.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adwords::{build_wire_operations, Operation, OperationBuilder};
use crate::batch::{BatchDispatcher, BatchJobService, DispatchSummary, JobCollection, JobTracker};
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::ledger::{self, LedgerEntry};

/// Dispatches `log_name` with the stock operation builders.
pub async fn dispatch<S: BatchJobService>(
    state: &AppState,
    service: Arc<S>,
    log_name: &str,
) -> Result<DispatchSummary, AppError> {
    dispatch_with(state, service, log_name, &build_wire_operations).await
}

/// Dispatches `log_name`, translating records with a caller-supplied builder.
pub async fn dispatch_with<S, B>(
    state: &AppState,
    service: Arc<S>,
    log_name: &str,
    builder: &B,
) -> Result<DispatchSummary, AppError>
where
    S: BatchJobService,
    B: OperationBuilder<Operation> + ?Sized,
{
    let log = state.operation_log(log_name).await?;
    let ledger = state.ledger()?;
    let min_id = state.min_id(&log).await?;

    let dispatcher = BatchDispatcher::new(service, state.config.dispatch.chunk_size);
    let summary = dispatcher.dispatch(&log, &ledger, builder, min_id).await?;

    info!(
        "[DISPATCH] {}: {} jobs, {} uploads, {} operations, {} records skipped",
        log_name,
        summary.jobs_created,
        summary.uploads,
        summary.operations,
        summary.skipped_records
    );

    Ok(summary)
}

/// Polls every non-terminal job dispatched from `log_name` until all of them
/// are DONE or CANCELED. There is no timeout.
pub async fn wait_jobs<S: BatchJobService>(
    state: &AppState,
    service: Arc<S>,
    log_name: &str,
) -> Result<JobCollection, AppError> {
    let ledger = state.ledger()?;
    let pending = ledger::load_pending(&ledger)
        .await?
        .into_iter()
        .filter(|entry| entry.payload.source_log == log_name);
    let jobs = JobCollection::from_entries(pending);

    let tracker = JobTracker::new(
        service,
        Duration::from_secs(state.config.polling.base_interval_secs),
    );
    tracker.wait_collection(jobs, &ledger).await
}

/// Every terminal ledger entry, with result URLs and progress counters.
pub async fn completed_jobs(state: &AppState) -> Result<Vec<LedgerEntry>, AppError> {
    ledger::load_completed(&state.ledger()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::adwords::{BatchJobStatus, TemporaryIds, WireOperation};
    use crate::batch::fake::{Call, FakeBatchService};
    use crate::commands::operations::{clear, insert, insert_many};
    use crate::config::Config;
    use crate::storage::LogRecord;

    async fn test_state(chunk_size: usize) -> (TempDir, AppState) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.storage.database_path = temp_dir.path().join("batch.db");
        config.dispatch.chunk_size = chunk_size;
        let state = AppState::open(config).await.expect("Failed to open state");
        (temp_dir, state)
    }

    fn rename(adgroup_id: i64) -> Operation {
        Operation::AdGroupName {
            adgroup_id,
            name: format!("group {adgroup_id}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_wait_and_report_end_to_end() {
        let (_dir, state) = test_state(2).await;
        let records: Vec<(i64, Operation)> = vec![
            (100, rename(1)),
            (100, rename(2)),
            (100, rename(3)),
            (200, rename(4)),
        ];
        insert_many(&state, "renames", &records).await.unwrap();

        let service = Arc::new(FakeBatchService::new());
        let summary = dispatch(&state, service.clone(), "renames").await.unwrap();

        assert_eq!(summary.jobs_created, 2);
        assert_eq!(summary.operations, 4);
        assert_eq!(summary.uploads, 3);

        service.push_statuses(&[
            ("job-0", BatchJobStatus::Done),
            ("job-1", BatchJobStatus::Canceled),
        ]);
        let jobs = wait_jobs(&state, service.clone(), "renames").await.unwrap();

        assert!(jobs.pending.is_empty());
        assert_eq!(jobs.done_count(), 2);

        let completed = completed_jobs(&state).await.unwrap();
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].payload.account_id, 100);
        assert_eq!(completed[0].payload.result_url, "https://results.test/job-0");
        assert_eq!(completed[1].payload.status, BatchJobStatus::Canceled);
    }

    #[tokio::test]
    async fn dispatch_of_empty_log_creates_no_jobs() {
        let (_dir, state) = test_state(5000).await;
        let service = Arc::new(FakeBatchService::new());

        let summary = dispatch(&state, service.clone(), "nothing").await.unwrap();

        assert_eq!(summary, DispatchSummary::default());
        assert!(service.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_jobs_ignores_other_logs_and_settled_jobs() {
        let (_dir, state) = test_state(5000).await;
        insert(&state, "a", 1, rename(1)).await.unwrap();
        insert(&state, "b", 2, rename(2)).await.unwrap();

        let service = Arc::new(FakeBatchService::new());
        dispatch(&state, service.clone(), "a").await.unwrap();
        dispatch(&state, service.clone(), "b").await.unwrap();

        // Only job-0 belongs to "a"; it is already DONE after one poll.
        service.push_statuses(&[("job-0", BatchJobStatus::Done)]);
        let jobs = wait_jobs(&state, service.clone(), "a").await.unwrap();
        assert_eq!(jobs.done_count(), 1);
        assert!(jobs.done[&1].contains_key("job-0"));

        let queries: Vec<Call> = service
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Query { .. }))
            .collect();
        assert_eq!(
            queries,
            vec![Call::Query {
                job_ids: vec!["job-0".to_string()]
            }]
        );

        // Nothing left pending for "a": returns at once without querying.
        let again = wait_jobs(&state, service.clone(), "a").await.unwrap();
        assert!(again.pending.is_empty());
        assert_eq!(service.query_count(), 1);
    }

    #[tokio::test]
    async fn clear_then_reuse_dispatches_new_records() {
        let (_dir, state) = test_state(5000).await;
        insert_many(&state, "renames", &[(100, rename(1)), (100, rename(2))])
            .await
            .unwrap();

        let service = Arc::new(FakeBatchService::new());
        dispatch(&state, service.clone(), "renames").await.unwrap();

        clear(&state, "renames").await.unwrap();
        insert(&state, "renames", 100, rename(3)).await.unwrap();

        let summary = dispatch(&state, service.clone(), "renames").await.unwrap();

        assert_eq!(summary.skipped_records, 0);
        assert_eq!(summary.jobs_created, 1);
        assert_eq!(summary.operations, 1);
        assert_eq!(
            service.calls()[2..].to_vec(),
            vec![
                Call::Create { account_id: 100, job_id: "job-1".into() },
                Call::Upload { job_id: "job-1".into(), count: 1, is_final: true },
            ]
        );

        let rows = ledger::load_entries(&state.ledger().unwrap()).await.unwrap();
        assert!(rows[0].payload.retired);
        assert!(!rows[1].payload.retired);
    }

    #[tokio::test]
    async fn dispatch_with_uses_temporary_ids_below_queued_minimum() {
        let (_dir, state) = test_state(5000).await;
        insert(&state, "temps", 1, rename(-7)).await.unwrap();

        let seen = std::sync::Mutex::new(Vec::new());
        let builder = |_record: &LogRecord<Operation>,
                       ids: &mut TemporaryIds|
         -> Result<Vec<WireOperation>, AppError> {
            seen.lock().unwrap().push(ids.next_id());
            Ok(Vec::new())
        };

        let service = Arc::new(FakeBatchService::new());
        dispatch_with(&state, service, "temps", &builder)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![-8]);
    }
}
