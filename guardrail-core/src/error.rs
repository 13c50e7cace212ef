//! Error types for guardrail operations.

use thiserror::Error;

/// All error types that guardrail operations can produce.
///
/// Detectors never produce these: malformed SQL degrades to "no finding".
/// Errors here cover configuration, filesystem access, caller input and
/// backend transport.
#[derive(Error, Debug)]
pub enum GuardrailError {
    /// Invalid or missing configuration (TOML parse errors, bad values, etc.).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A filesystem I/O operation failed (reading migration files, config, etc.).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A JSON payload could not be parsed or serialized.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A migration name contained characters outside `[A-Za-z0-9_]`.
    #[error("Invalid migration name '{name}': only letters, digits and underscores are allowed")]
    InvalidName { name: String },

    /// Rollback was requested without the explicit opt-in flag.
    #[error("Rollback is disabled. Set ALLOW_DB_ROLLBACK=1 to permit it.")]
    RollbackNotAllowed,

    /// Static validation found blocking errors in one or more migrations.
    #[error("Validation failed with {error_count} error(s): {details}")]
    ValidationFailed { error_count: usize, details: String },

    /// Lint found one or more errors across migration files.
    #[error("Lint found {error_count} error(s): {details}")]
    LintFailed { error_count: usize, details: String },

    /// The RLS audit found tables without row level security.
    #[error("RLS audit found {count} table(s) without row level security: {tables}")]
    RlsGaps { count: usize, tables: String },

    /// The LLM backend could not be reached or returned an unusable reply.
    #[error("Agent backend error: {0}")]
    BackendError(String),

    /// An orchestrator request was structurally invalid.
    #[error("Invalid agent request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for GuardrailError {
    fn from(e: reqwest::Error) -> Self {
        let mut msg = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(s) = source {
            msg.push_str(&format!(": {}", s));
            source = s.source();
        }
        if e.is_timeout() {
            msg.push_str("\n  Note: the request timed out before the backend replied.");
        }
        GuardrailError::BackendError(msg)
    }
}

/// Convenience type alias for `Result<T, GuardrailError>`.
pub type Result<T> = std::result::Result<T, GuardrailError>;
