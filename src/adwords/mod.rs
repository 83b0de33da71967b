//! Remote batch job service: status model, wire operations and HTTP adapter.

pub mod batch_job;
pub mod operations;

use serde::{Deserialize, Serialize};

pub use batch_job::BatchJobHttpClient;
pub use operations::{
    build_wire_operations, Operation, OperationBuilder, OperationRecord, Operator,
    TemporaryIds, WireOperation,
};

// ─────────────────────────────────────────────────────────────────────────────
// BatchJobStatus Enum
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a remote batch job.
///
/// Deserialization goes through [`BatchJobStatus::parse_lenient`], so ledger
/// rows and remote payloads accept the same spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum BatchJobStatus {
    /// Job created, accepting uploads.
    Active,
    /// Job is waiting for the upload to be completed.
    AwaitingFileUpload,
    /// Upload finished, remote side is applying operations.
    Processing,
    /// Finished; results available at the download URL.
    Done,
    /// Cancelled remotely.
    Canceled,
}

impl BatchJobStatus {
    /// Converts the status to its wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJobStatus::Active => "ACTIVE",
            BatchJobStatus::AwaitingFileUpload => "AWAITING_FILE_UPLOAD",
            BatchJobStatus::Processing => "PROCESSING",
            BatchJobStatus::Done => "DONE",
            BatchJobStatus::Canceled => "CANCELED",
        }
    }

    /// Parses a wire status.
    /// Returns `Processing` for unknown strings so the job keeps being polled.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "ACTIVE" => BatchJobStatus::Active,
            "AWAITING_FILE_UPLOAD" => BatchJobStatus::AwaitingFileUpload,
            "PROCESSING" => BatchJobStatus::Processing,
            "DONE" => BatchJobStatus::Done,
            "CANCELED" | "CANCELLED" => BatchJobStatus::Canceled,
            _ => BatchJobStatus::Processing,
        }
    }

    /// Position in the lifecycle. A job never moves to a lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            BatchJobStatus::Active => 0,
            BatchJobStatus::AwaitingFileUpload => 1,
            BatchJobStatus::Processing => 2,
            BatchJobStatus::Done | BatchJobStatus::Canceled => 3,
        }
    }

    /// Returns true if the job cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchJobStatus::Done | BatchJobStatus::Canceled)
    }
}

impl From<String> for BatchJobStatus {
    fn from(s: String) -> Self {
        Self::parse_lenient(&s)
    }
}

impl std::fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
