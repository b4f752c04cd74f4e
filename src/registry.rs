//! Static registry of backend capability names.
//!
//! The host selects a backend by the `type` field of its storage
//! configuration. Each capability name maps to a factory; the table is
//! fixed at compile time.

use std::sync::Arc;

use crate::backend::{ComputeMssqlBackend, MssqlBackend, StorageService};
use crate::compute::ComputeCatalog;
use crate::config::StorageConfig;
use crate::driver::{Connect, TdsConnector};
use crate::error::{Result, StorageError};

/// Plain SQL Server storage.
pub const MSSQL: &str = "mssql";

/// SQL Server storage integrated with a compute engine.
pub const SPARK_MSSQL: &str = "spark_mssql";

/// Collaborators supplied by the host when opening a backend.
#[derive(Clone, Default)]
pub struct BackendContext {
    pub compute: Option<Arc<dyn ComputeCatalog>>,
}

impl BackendContext {
    pub fn with_compute(compute: Arc<dyn ComputeCatalog>) -> Self {
        Self {
            compute: Some(compute),
        }
    }
}

type Factory<K> = fn(StorageConfig, &BackendContext, K) -> Result<Box<dyn StorageService>>;

fn factories<K: Connect + 'static>() -> [(&'static str, Factory<K>); 2] {
    [
        (MSSQL, open_plain::<K> as Factory<K>),
        (SPARK_MSSQL, open_compute::<K> as Factory<K>),
    ]
}

fn open_plain<K: Connect + 'static>(
    config: StorageConfig,
    _context: &BackendContext,
    connector: K,
) -> Result<Box<dyn StorageService>> {
    Ok(Box::new(MssqlBackend::with_connector(config, connector)?))
}

fn open_compute<K: Connect + 'static>(
    config: StorageConfig,
    context: &BackendContext,
    connector: K,
) -> Result<Box<dyn StorageService>> {
    let compute = context.compute.clone().ok_or_else(|| {
        StorageError::InvalidConfig(format!("{SPARK_MSSQL} requires a compute catalog"))
    })?;
    let store = MssqlBackend::with_connector(config, connector)?;
    Ok(Box::new(ComputeMssqlBackend::new(store, compute)))
}

fn lookup<K: Connect + 'static>(name: &str) -> Result<Factory<K>> {
    factories::<K>()
        .into_iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, factory)| factory)
        .ok_or_else(|| StorageError::UnknownBackend(name.to_string()))
}

/// Registered capability names.
pub fn capabilities() -> Vec<&'static str> {
    factories::<TdsConnector>()
        .iter()
        .map(|(name, _)| *name)
        .collect()
}

/// Open the backend named by `config.type`. No connection is made until
/// the first operation.
pub fn open(config: &StorageConfig, context: &BackendContext) -> Result<Box<dyn StorageService>> {
    let factory = lookup::<TdsConnector>(&config.backend_type)?;
    let connector = TdsConnector::from_config(config)?;
    factory(config.clone(), context, connector)
}

/// [`open`] with a caller-supplied connector.
pub fn open_with_connector<K: Connect + 'static>(
    config: &StorageConfig,
    context: &BackendContext,
    connector: K,
) -> Result<Box<dyn StorageService>> {
    let factory = lookup::<K>(&config.backend_type)?;
    factory(config.clone(), context, connector)
}
