use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for log output.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "developer-token",
    "developer_token",
    "access_token",
    "authorization:",
    "upload_url",
    "uploadurl",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for logging.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Structured error summary for callers that surface failures to operators.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Remote ────────────────────────────────────────────────────────────────
    #[error("Remote batch service error: {0}")]
    RemoteError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Operations ────────────────────────────────────────────────────────────
    #[error("Invalid operation record {record_id}: {message}")]
    InvalidOperation { record_id: i64, message: String },

    #[error("Invalid log name: {0}")]
    InvalidLogName(String),

    // ── Storage ───────────────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true for failures that a caller may resolve by re-running the
    /// same dispatch or wait call later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. } | AppError::ConnectionFailed(_)
        )
    }

    /// Display text that is safe to write to logs.
    pub fn redacted(&self) -> String {
        sanitize_message(&self.to_string(), "Error details withheld (sensitive content)")
    }

    /// Converts the error into a presentation suitable for operator-facing output.
    /// Never leaks tokens or signed upload URLs.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Remote ────────────────────────────────────────────────────────
            AppError::RemoteError(msg) => ErrorPresentation {
                title: "Batch Service Error".into(),
                message: sanitize_message(msg, "The remote batch service rejected the request."),
                action: Some("Inspect the batch log and re-run".into()),
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("The batch service is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the batch service. Please check your network connection.".into(),
                action: Some("Check network and retry".into()),
            },

            AppError::NotFound(msg) => ErrorPresentation {
                title: "Not Found".into(),
                message: sanitize_message(msg, "The requested batch job was not found."),
                action: None,
            },

            // ── Operations ────────────────────────────────────────────────────
            AppError::InvalidOperation { record_id, message } => ErrorPresentation {
                title: "Invalid Operation".into(),
                message: format!(
                    "Operation record {} could not be translated: {}",
                    record_id,
                    sanitize_message(message, "invalid payload")
                ),
                action: Some("Fix the record and re-run the dispatch".into()),
            },

            AppError::InvalidLogName(name) => ErrorPresentation {
                title: "Invalid Log Name".into(),
                message: format!(
                    "'{}' is not a valid log name. Use letters, digits and underscores.",
                    name
                ),
                action: Some("Rename the log".into()),
            },

            // ── Storage ───────────────────────────────────────────────────────
            AppError::Storage(_) => ErrorPresentation {
                title: "Storage Error".into(),
                message: "The local operation log could not be read or written.".into(),
                action: Some("Check the database file and retry".into()),
            },

            // ── Configuration ─────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration file is invalid."),
                action: Some("Fix the configuration file".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}
