//! Job tracker.
//!
//! [`JobCollection`] is the working set: `pending` (non-terminal), `dirty`
//! (statuses returned by the current refresh) and `done` (terminal), each
//! keyed by account id then job id. `dirty` only holds data between a
//! `refresh` and the following `reconcile`.
//!
//! [`JobTracker::wait`] polls every pending job in one remote call per
//! cycle, sleeping `base, 2·base, 4·base, …` between cycles with no upper
//! bound. Callers wanting a deadline wrap it in `tokio::time::timeout`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adwords::batch_job::JobStatusInfo;
use crate::batch::sink::{LedgerUpdate, ReconciliationSink};
use crate::batch::BatchJobService;
use crate::error::AppError;
use crate::storage::ledger::{self, redact_id, Ledger, LedgerEntry};

// ─────────────────────────────────────────────────────────────────────────────
// JobCollection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobCollection {
    pub pending: BTreeMap<i64, BTreeMap<String, LedgerEntry>>,
    pub dirty: BTreeMap<i64, BTreeMap<String, JobStatusInfo>>,
    pub done: BTreeMap<i64, BTreeMap<String, LedgerEntry>>,
}

impl JobCollection {
    /// Partitions ledger rows by their last known status.
    pub fn from_entries<I: IntoIterator<Item = LedgerEntry>>(entries: I) -> Self {
        let mut jobs = Self::default();
        for entry in entries {
            let target = if entry.payload.status.is_terminal() {
                &mut jobs.done
            } else {
                &mut jobs.pending
            };
            target
                .entry(entry.payload.account_id)
                .or_default()
                .insert(entry.payload.job_id.clone(), entry);
        }
        jobs
    }

    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    pub fn done_count(&self) -> usize {
        self.done.values().map(BTreeMap::len).sum()
    }

    pub fn pending_job_ids(&self) -> Vec<String> {
        self.pending
            .values()
            .flat_map(|jobs| jobs.keys().cloned())
            .collect()
    }

    /// Files freshly fetched statuses into `dirty` under their account.
    /// Statuses for jobs that are not pending are ignored.
    pub fn stage(&mut self, statuses: HashMap<String, JobStatusInfo>) {
        let owners: HashMap<&str, i64> = self
            .pending
            .iter()
            .flat_map(|(account, jobs)| jobs.keys().map(move |job| (job.as_str(), *account)))
            .collect();

        let mut staged = BTreeMap::<i64, BTreeMap<String, JobStatusInfo>>::new();
        for (job_id, info) in statuses {
            match owners.get(job_id.as_str()) {
                Some(account) => {
                    staged.entry(*account).or_default().insert(job_id, info);
                }
                None => warn!(
                    "[TRACKER] ignoring status for untracked job {}",
                    redact_id(&job_id)
                ),
            }
        }

        for (account, jobs) in staged {
            self.dirty.entry(account).or_default().extend(jobs);
        }
    }

    /// Drains `dirty` and returns the ledger rewrites it implies.
    ///
    /// Unchanged statuses produce nothing, and so does a status that ranks
    /// below the one already recorded. A changed status rewrites the pending
    /// entry; a terminal one moves it to `done`, dropping the account from
    /// `pending` once its last job leaves.
    pub fn reconcile(&mut self) -> Vec<LedgerUpdate> {
        let mut updates = Vec::new();

        for (account, statuses) in std::mem::take(&mut self.dirty) {
            for (job_id, info) in statuses {
                let Some(account_jobs) = self.pending.get_mut(&account) else {
                    continue;
                };
                let Some(entry) = account_jobs.get_mut(&job_id) else {
                    continue;
                };
                if entry.payload.status == info.status {
                    continue;
                }
                if info.status.rank() < entry.payload.status.rank() {
                    warn!(
                        "[TRACKER] job {} reported {} after {}, keeping {}",
                        redact_id(&job_id),
                        info.status,
                        entry.payload.status,
                        entry.payload.status
                    );
                    continue;
                }

                let update = ReconciliationSink::normalize(entry, &info);
                entry.payload = update.record.clone();

                debug!(
                    "[TRACKER] job {} of account {} -> {}",
                    redact_id(&job_id),
                    account,
                    info.status
                );

                if info.status.is_terminal() {
                    if let Some(finished) = account_jobs.remove(&job_id) {
                        self.done
                            .entry(account)
                            .or_default()
                            .insert(job_id, finished);
                    }
                    if account_jobs.is_empty() {
                        self.pending.remove(&account);
                    }
                }

                updates.push(update);
            }
        }

        updates
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Endless doubling delay sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { next: base }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2);
        Some(current)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobTracker
// ─────────────────────────────────────────────────────────────────────────────

pub struct JobTracker<S: BatchJobService> {
    service: Arc<S>,
    base_interval: Duration,
}

impl<S: BatchJobService> JobTracker<S> {
    pub fn new(service: Arc<S>, base_interval: Duration) -> Self {
        Self {
            service,
            base_interval,
        }
    }

    /// Loads every non-terminal ledger row into `pending`.
    pub async fn collect(&self, ledger: &Ledger) -> Result<JobCollection, AppError> {
        let mut jobs = JobCollection::default();
        for entry in ledger::load_pending(ledger).await? {
            jobs.pending
                .entry(entry.payload.account_id)
                .or_default()
                .insert(entry.payload.job_id.clone(), entry);
        }
        Ok(jobs)
    }

    /// Queries all pending jobs in one call and stages the answers in `dirty`.
    pub async fn refresh(&self, jobs: &mut JobCollection) -> Result<(), AppError> {
        if jobs.pending.is_empty() {
            return Ok(());
        }

        let job_ids = jobs.pending_job_ids();
        let statuses = self.service.query_status(&job_ids).await?;

        debug!(
            "[TRACKER] refreshed {} jobs, {} statuses returned",
            job_ids.len(),
            statuses.len()
        );

        jobs.stage(statuses);
        Ok(())
    }

    /// Applies staged statuses and persists the changes in one transaction.
    /// Returns the number of ledger rows written.
    ///
    /// `jobs` only changes once the write commits; on error it still holds
    /// the staged statuses, so the next call retries them.
    pub async fn reconcile(
        &self,
        jobs: &mut JobCollection,
        ledger: &Ledger,
    ) -> Result<usize, AppError> {
        let mut next = jobs.clone();
        let updates = next.reconcile();
        let written = ReconciliationSink::new(ledger.clone())
            .apply(&updates)
            .await?;
        *jobs = next;
        Ok(written)
    }

    /// Polls until every job recorded in the ledger is terminal.
    pub async fn wait(&self, ledger: &Ledger) -> Result<JobCollection, AppError> {
        let jobs = self.collect(ledger).await?;
        self.wait_collection(jobs, ledger).await
    }

    /// Polls the given collection until `pending` is empty. Returns at once,
    /// without sleeping, when nothing is pending.
    pub async fn wait_collection(
        &self,
        mut jobs: JobCollection,
        ledger: &Ledger,
    ) -> Result<JobCollection, AppError> {
        let mut backoff = Backoff::new(self.base_interval);

        while !jobs.is_settled() {
            let delay = backoff.next().unwrap_or(Duration::MAX);

            info!(
                "[TRACKER] waiting {:?} for {} jobs across {} accounts",
                delay,
                jobs.pending_count(),
                jobs.pending.len()
            );

            tokio::time::sleep(delay).await;
            self.refresh(&mut jobs).await?;
            self.reconcile(&mut jobs, ledger).await?;
        }

        info!("[TRACKER] all {} jobs finished", jobs.done_count());
        Ok(jobs)
    }
}
