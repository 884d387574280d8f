use thiserror::Error;

use crate::types::TableId;

/// Convenience alias for `Result<T, FalconError>`.
pub type FalconResult<T> = Result<T, FalconError>;

/// How a caller should react to an error.
///
/// `UserError` covers bad input such as a malformed lock id or an invalid
/// config. `Retryable` means the lock system changed under the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum FalconError {
    #[error("Lock system error: {0}")]
    LockSys(#[from] LockSysError),

    #[error("Lock id error: {0}")]
    LockId(#[from] LockIdError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl FalconError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FalconError::LockId(_) => ErrorKind::UserError,
            FalconError::Config(_) => ErrorKind::UserError,
            FalconError::LockSys(LockSysError::ReadOnlyTrx(_)) => ErrorKind::UserError,
            FalconError::LockSys(LockSysError::UnknownTable(_)) => ErrorKind::UserError,
            FalconError::LockSys(LockSysError::TrxNotFound(_)) => ErrorKind::Retryable,
            FalconError::LockSys(LockSysError::AlreadyWaiting(_)) => ErrorKind::Retryable,
        }
    }
}

/// Lock/transaction manager errors.
///
/// Transactions are addressed by their manager handle, rendered as a plain
/// integer so this crate does not depend on the manager's handle type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockSysError {
    #[error("Transaction handle {0} not found")]
    TrxNotFound(u64),

    #[error("Transaction handle {0} is read-only and cannot take an exclusive lock")]
    ReadOnlyTrx(u64),

    #[error("Transaction handle {0} is already waiting for a lock")]
    AlreadyWaiting(u64),

    #[error("Table not registered: {0}")]
    UnknownTable(TableId),
}

/// Engine lock identifier decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockIdError {
    #[error("empty lock id")]
    Empty,

    #[error("lock id '{0}' has {1} fields, expected 2 (table) or 4 (record)")]
    FieldCount(String, usize),

    #[error("lock id '{id}': field {index} is not an integer")]
    InvalidField { id: String, index: usize },

    #[error("lock id '{id}': field {index} is out of range")]
    OutOfRange { id: String, index: usize },
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
