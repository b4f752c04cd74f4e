//! Error types for mssql_storage.
//!
//! All errors surfaced by the crate are represented by [`StorageError`].
//! Errors are propagated via `Result<T, StorageError>` throughout the codebase.
//!
//! # Error Classification
//!
//! Errors are classified into four categories for logging and alerting:
//! - **User**: bad configuration, invalid change-sets, unknown backends.
//! - **Database**: statements rejected by SQL Server (syntax, constraint,
//!   permission) and connection failures.
//! - **Resource**: a staging relation could not be released.
//! - **Internal**: bugs.
//!
//! # Statement context
//!
//! Every database failure carries the statement text that was actually
//! submitted (after transport reduction) so a failure can be diagnosed
//! without re-running it. Merge failures additionally carry the target and
//! staging relation names.

use std::fmt;

/// Error raised by the underlying database client.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// TDS protocol or server-side error reported by tiberius.
    #[error(transparent)]
    Tds(#[from] tiberius::error::Error),

    /// Socket-level failure while connecting.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other driver failure (used by non-TDS connections).
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Whether the connection this error came from is unusable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            DriverError::Io(_) | DriverError::Tds(tiberius::error::Error::Io { .. })
        )
    }
}

/// A statement rejected by the database.
#[derive(Debug, thiserror::Error)]
#[error("error while running statement: {source}\n{statement}")]
pub struct StatementExecutionError {
    /// The statement text as submitted.
    pub statement: String,
    #[source]
    pub source: DriverError,
}

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    // ── User errors ──────────────────────────────────────────────────────
    /// The storage configuration is incomplete or contradictory.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An invalid argument was provided to an operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No backend is registered under the requested capability name.
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    /// The operation is not available in this build or backend.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The compute catalog has no view with this name.
    #[error("compute view not found: {0}")]
    ViewNotFound(String),

    // ── Database errors ──────────────────────────────────────────────────
    /// The connection to SQL Server could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] DriverError),

    /// A statement was rejected by the database.
    #[error(transparent)]
    StatementExecution(#[from] StatementExecutionError),

    /// The MERGE statement itself failed.
    #[error("merge into {target} from {staging} failed")]
    MergeStatement {
        target: String,
        staging: String,
        #[source]
        source: StatementExecutionError,
    },

    // ── Resource errors ──────────────────────────────────────────────────
    /// The staging relation could not be dropped.
    #[error("failed to drop staging relation {staging}")]
    ResourceCleanup {
        staging: String,
        #[source]
        source: StatementExecutionError,
    },

    /// An earlier failure was followed by a failed staging cleanup.
    /// Both errors are kept; the earlier one is the source.
    #[error("{primary}; staging cleanup also failed: {cleanup}")]
    MergeWithCleanupFailure {
        #[source]
        primary: Box<StorageError>,
        cleanup: Box<StorageError>,
    },

    // ── Internal errors ──────────────────────────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl StorageError {
    /// The statement text attached to this error, if any.
    pub fn statement(&self) -> Option<&str> {
        match self {
            StorageError::StatementExecution(e) => Some(&e.statement),
            StorageError::MergeStatement { source, .. }
            | StorageError::ResourceCleanup { source, .. } => Some(&source.statement),
            StorageError::MergeWithCleanupFailure { primary, .. } => primary.statement(),
            _ => None,
        }
    }

    /// Whether this error is (or wraps) a failed MERGE statement.
    pub fn is_merge_failure(&self) -> bool {
        match self {
            StorageError::MergeStatement { .. } => true,
            StorageError::MergeWithCleanupFailure { primary, .. } => primary.is_merge_failure(),
            _ => false,
        }
    }
}

/// Classification of error kind for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    User,
    Database,
    Resource,
    Internal,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::User => write!(f, "USER"),
            StorageErrorKind::Database => write!(f, "DATABASE"),
            StorageErrorKind::Resource => write!(f, "RESOURCE"),
            StorageErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl StorageError {
    /// Classify the error for monitoring and alerting.
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::InvalidConfig(_)
            | StorageError::InvalidArgument(_)
            | StorageError::UnknownBackend(_)
            | StorageError::Unsupported(_)
            | StorageError::ViewNotFound(_) => StorageErrorKind::User,

            StorageError::ConnectionFailed(_)
            | StorageError::StatementExecution(_)
            | StorageError::MergeStatement { .. } => StorageErrorKind::Database,

            StorageError::ResourceCleanup { .. } | StorageError::MergeWithCleanupFailure { .. } => {
                StorageErrorKind::Resource
            }

            StorageError::InternalError(_) => StorageErrorKind::Internal,
        }
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
