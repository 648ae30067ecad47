// error.rs - Centralized error handling using thiserror

use serde::{Deserialize, Serialize};

/// Crate-wide Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the sync engine and CLI surface classify every failure into.
///
/// Uses thiserror for ergonomic error handling and automatic Display impl.
/// All errors are serializable so they can be emitted as JSON in `--json` mode
/// and carried across the daemon IPC socket.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum Error {
    /// Name match yields zero results.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name match yields multiple results and the caller didn't force one.
    #[error("ambiguous match: {0}")]
    Ambiguous(String),

    /// Priority out of range, bad date, invalid color, invalid status, circular parent, etc.
    #[error("validation error: {0}")]
    Validation(String),

    /// Detected during sync: both sides changed since last common ancestor.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient, retryable: local store busy past the configured timeout.
    #[error("database busy: {0}")]
    DbBusy(String),

    /// Capability missing on the target backend.
    #[error("unsupported on this backend: {0}")]
    Unsupported(String),

    /// Credentials missing or rejected.
    #[error("authentication error: {0}")]
    Auth(String),

    /// DNS, connect, timeout, TLS.
    #[error("network error: {0}")]
    Network(String),

    /// Remote signalled throttling.
    #[error("rate limited: {0}")]
    RateLimit {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Bug surface; always logged with context.
    #[error("internal error: {0}")]
    Internal(String),

    /// Encryption/decryption of secrets at rest failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Configuration file missing, malformed, or internally inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization of a payload (queue entry, cache snapshot, IPC message).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem/process-level I/O (PID file, socket, daemon log).
    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the queue should retry an operation that failed with this error,
    /// per the classification in spec §4.3/§7.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DbBusy(_) | Error::Network(_) | Error::RateLimit { .. }
        )
    }

    /// The `{"type": "...", ...}` discriminant name, used for `--json` error output
    /// and for conflict-record/log classification without re-matching on Display text.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::Ambiguous(_) => "Ambiguous",
            Error::Validation(_) => "Validation",
            Error::Conflict(_) => "Conflict",
            Error::DbBusy(_) => "DbBusy",
            Error::Unsupported(_) => "Unsupported",
            Error::Auth(_) => "Auth",
            Error::Network(_) => "Network",
            Error::RateLimit { .. } => "RateLimit",
            Error::Internal(_) => "Internal",
            Error::Crypto(_) => "Crypto",
            Error::Config(_) => "Config",
            Error::Serialization(_) => "Serialization",
            Error::Io(_) => "Io",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.message().contains("database is locked") => {
                Error::DbBusy(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut => Error::DbBusy(err.to_string()),
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            _ => Error::Internal(format!("database error: {err}")),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Error::Network(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                Error::RateLimit {
                    message: err.to_string(),
                    retry_after_secs: None,
                }
            } else if status.is_client_error() {
                Error::Auth(err.to_string())
            } else {
                Error::Network(err.to_string())
            }
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Internal(format!("git error: {err}"))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Serialization(format!("xml error: {err}"))
    }
}
