//! Operation-log commands: queue, count, read back and drop mutations.

use tracing::info;

use crate::adwords::Operation;
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::ledger;
use crate::storage::LogStream;

/// Appends one operation, creating the log on first use.
pub async fn insert(
    state: &AppState,
    log_name: &str,
    account_id: i64,
    operation: Operation,
) -> Result<i64, AppError> {
    let log = state.operation_log(log_name).await?;
    let id = log.append(account_id, &operation).await?;
    state.observe_min_id(log_name, operation.min_id()).await;
    Ok(id)
}

/// Appends all records in one transaction. Nothing is written if any fails.
pub async fn insert_many(
    state: &AppState,
    log_name: &str,
    records: &[(i64, Operation)],
) -> Result<Vec<i64>, AppError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let log = state.operation_log(log_name).await?;
    let ids = log
        .append_many(records.iter().map(|(account, op)| (*account, op)))
        .await?;

    if let Some(min) = records.iter().map(|(_, op)| op.min_id()).min() {
        state.observe_min_id(log_name, min).await;
    }

    info!("[LOG] queued {} operations in {}", ids.len(), log_name);
    Ok(ids)
}

/// Number of stored records; a log that was never created counts as 0.
pub async fn count(state: &AppState, log_name: &str) -> Result<i64, AppError> {
    state.operation_log(log_name).await?.count().await
}

/// Drops the log and forgets every cached value derived from it.
///
/// Ledger rows dispatched from the log are retired, since ids restart at 1
/// once the table is recreated.
pub async fn clear(state: &AppState, log_name: &str) -> Result<(), AppError> {
    let log = state.operation_log(log_name).await?;
    log.drop_log().await?;
    state.forget_log(log_name).await;
    let retired = ledger::retire_source(&state.ledger()?, log_name).await?;
    info!("[LOG] cleared {} ({} ledger rows retired)", log_name, retired);
    Ok(())
}

/// Lazy insertion-ordered reader. Calling again restarts from the beginning.
pub async fn stream(state: &AppState, log_name: &str) -> Result<LogStream<Operation>, AppError> {
    Ok(state.operation_log(log_name).await?.stream())
}
