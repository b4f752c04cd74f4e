//! mssql_storage: SQL Server storage backend with merge synchronization.
//!
//! The crate exposes SQL Server as a storage backend selected by name
//! (`mssql`, `spark_mssql`) from the host's configuration. Its core is the
//! merge path: a staged change-set is written to a uniquely named staging
//! relation, pushed into the target with one `MERGE` statement that gates
//! each column on its source satellite's update indicator and optionally
//! soft-deletes, and the staging relation is dropped on every exit path.
//!
//! # Layout
//!
//! - [`gateway`]: one lazily-opened connection and the statement-level
//!   operations (execute, catalog predicates, schema lifecycle, bulk write).
//! - [`merge`]: change-set description, `MERGE` rendering, staging
//!   lifecycle.
//! - [`backend`]: the two capability traits and the concrete backends.
//! - [`registry`]: capability name → backend factory.
//! - [`driver`]: the connection seam and its TDS implementation.

pub mod backend;
pub mod compute;
pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod merge;
pub mod registry;
pub mod sql;
pub mod table;

pub use backend::{
    BulkComputeIntegration, ComputeMssqlBackend, MssqlBackend, RelationalStore, StorageService,
};
pub use compute::{ComputeCatalog, LocalCatalog};
pub use config::StorageConfig;
pub use error::{Result, StorageError, StorageErrorKind};
pub use gateway::Gateway;
pub use merge::{ChangeSet, MergeColumns, MergeStatement};
pub use registry::{BackendContext, open};
pub use sql::{Namespace, WriteMode};
pub use table::{Table, Value};
