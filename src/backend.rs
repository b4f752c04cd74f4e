//! Storage backends.
//!
//! Two capability sets are composed by the concrete backends:
//!
//! - [`RelationalStore`]: schema management, statements and merges
//!   against SQL Server. Implemented by [`MssqlBackend`].
//! - [`BulkComputeIntegration`]: moving tables between SQL Server and a
//!   compute engine's views. Implemented, together with
//!   [`RelationalStore`], by [`ComputeMssqlBackend`].
//!
//! The registry hands both out as [`StorageService`] trait objects.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::compute::ComputeCatalog;
use crate::config::StorageConfig;
use crate::driver::{Connect, TdsConnector};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::merge::{self, ChangeSet, MergeColumns};
use crate::sql::{Namespace, WriteMode};
use crate::table::{Table, Value};

/// Relational operations against the configured database.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    fn config(&self) -> &StorageConfig;

    fn namespace(&self) -> &Namespace;

    async fn execute(&self, statement: &str) -> Result<Table>;

    async fn single_scalar_value(&self, statement: &str) -> Result<Option<Value>>;

    /// Connectivity probe.
    async fn test(&self) -> Result<()>;

    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    async fn schema_empty(&self, schema: &str) -> Result<bool>;

    async fn create_schema(&self, schema: &str) -> Result<()>;

    async fn drop_schema(&self, schema: &str) -> Result<()>;

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool>;

    /// Merge a change-set into a table of the configured schema.
    async fn merge_staged_changes(
        &self,
        target_table: &str,
        change_set: ChangeSet,
    ) -> Result<Table>;

    /// Drop orphaned staging relations of a target table.
    async fn purge_staging_relations(&self, target_table: &str) -> Result<Vec<String>>;
}

/// Table exchange with a compute engine.
#[async_trait]
pub trait BulkComputeIntegration: Send + Sync {
    /// `[database].[schema].[table]`
    fn qualified_table_name(&self, table: &str) -> String;

    async fn read_table(&self, table: &str) -> Result<Table>;

    async fn write_table(&self, table: &str, rows: &Table, mode: WriteMode) -> Result<()>;

    /// Register the storage table as a compute view of the same name.
    async fn connect_storage_view(&self, table: &str) -> Result<()>;

    async fn disconnect_storage_view(&self, table: &str) -> Result<()>;

    /// Merge the rows of a compute view into a storage table.
    async fn merge_from_view(
        &self,
        target_table: &str,
        view_name: &str,
        columns: MergeColumns,
    ) -> Result<Table>;
}

/// A backend as handed out by the registry.
pub trait StorageService: RelationalStore {
    /// Capability name this backend was registered under.
    fn capability(&self) -> &'static str;

    /// Compute-engine operations, when the backend has them.
    fn compute(&self) -> Option<&dyn BulkComputeIntegration> {
        None
    }
}

// ── Plain backend ────────────────────────────────────────────────────

/// SQL Server storage backend.
pub struct MssqlBackend<K: Connect = TdsConnector> {
    config: StorageConfig,
    namespace: Namespace,
    gateway: Gateway<K>,
}

impl MssqlBackend<TdsConnector> {
    /// Build a backend that connects over TDS on first use.
    pub fn from_config(config: StorageConfig) -> Result<Self> {
        let connector = TdsConnector::from_config(&config)?;
        Self::with_connector(config, connector)
    }
}

impl<K: Connect> MssqlBackend<K> {
    pub fn with_connector(config: StorageConfig, connector: K) -> Result<Self> {
        config.validate()?;
        let namespace = config.namespace();
        let gateway = Gateway::new(connector, config.database.clone());
        Ok(Self {
            config,
            namespace,
            gateway,
        })
    }

    pub fn gateway(&self) -> &Gateway<K> {
        &self.gateway
    }
}

#[async_trait]
impl<K: Connect> RelationalStore for MssqlBackend<K> {
    fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    async fn execute(&self, statement: &str) -> Result<Table> {
        self.gateway.execute(statement).await
    }

    async fn single_scalar_value(&self, statement: &str) -> Result<Option<Value>> {
        self.gateway.single_scalar_value(statement).await
    }

    async fn test(&self) -> Result<()> {
        self.gateway.test().await
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        self.gateway.schema_exists(schema).await
    }

    async fn schema_empty(&self, schema: &str) -> Result<bool> {
        self.gateway.schema_empty(schema).await
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.gateway.create_schema(schema).await
    }

    async fn drop_schema(&self, schema: &str) -> Result<()> {
        self.gateway.drop_schema(schema).await
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        self.gateway.table_exists(schema, table).await
    }

    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool> {
        self.gateway.column_exists(schema, table, column).await
    }

    async fn merge_staged_changes(
        &self,
        target_table: &str,
        change_set: ChangeSet,
    ) -> Result<Table> {
        merge::merge_staged_changes(&self.gateway, &self.namespace, target_table, change_set).await
    }

    async fn purge_staging_relations(&self, target_table: &str) -> Result<Vec<String>> {
        merge::purge_staging_relations(&self.gateway, &self.namespace, target_table).await
    }
}

impl<K: Connect + 'static> StorageService for MssqlBackend<K> {
    fn capability(&self) -> &'static str {
        crate::registry::MSSQL
    }
}

// ── Compute-integrated backend ───────────────────────────────────────

/// SQL Server storage backend that also exchanges tables with a compute
/// engine.
pub struct ComputeMssqlBackend<K: Connect = TdsConnector> {
    store: MssqlBackend<K>,
    compute: Arc<dyn ComputeCatalog>,
}

impl ComputeMssqlBackend<TdsConnector> {
    pub fn from_config(config: StorageConfig, compute: Arc<dyn ComputeCatalog>) -> Result<Self> {
        Ok(Self::new(MssqlBackend::from_config(config)?, compute))
    }
}

impl<K: Connect> ComputeMssqlBackend<K> {
    pub fn new(store: MssqlBackend<K>, compute: Arc<dyn ComputeCatalog>) -> Self {
        Self { store, compute }
    }

    /// The relational half of this backend.
    pub fn store(&self) -> &MssqlBackend<K> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn ComputeCatalog> {
        &self.compute
    }
}

#[async_trait]
impl<K: Connect> RelationalStore for ComputeMssqlBackend<K> {
    fn config(&self) -> &StorageConfig {
        self.store.config()
    }

    fn namespace(&self) -> &Namespace {
        self.store.namespace()
    }

    async fn execute(&self, statement: &str) -> Result<Table> {
        self.store.execute(statement).await
    }

    async fn single_scalar_value(&self, statement: &str) -> Result<Option<Value>> {
        self.store.single_scalar_value(statement).await
    }

    async fn test(&self) -> Result<()> {
        self.store.test().await
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        self.store.schema_exists(schema).await
    }

    async fn schema_empty(&self, schema: &str) -> Result<bool> {
        self.store.schema_empty(schema).await
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.store.create_schema(schema).await
    }

    async fn drop_schema(&self, schema: &str) -> Result<()> {
        self.store.drop_schema(schema).await
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        self.store.table_exists(schema, table).await
    }

    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool> {
        self.store.column_exists(schema, table, column).await
    }

    async fn merge_staged_changes(
        &self,
        target_table: &str,
        change_set: ChangeSet,
    ) -> Result<Table> {
        self.store
            .merge_staged_changes(target_table, change_set)
            .await
    }

    async fn purge_staging_relations(&self, target_table: &str) -> Result<Vec<String>> {
        self.store.purge_staging_relations(target_table).await
    }
}

#[async_trait]
impl<K: Connect> BulkComputeIntegration for ComputeMssqlBackend<K> {
    fn qualified_table_name(&self, table: &str) -> String {
        self.store.namespace.qualify(table)
    }

    async fn read_table(&self, table: &str) -> Result<Table> {
        self.store
            .gateway
            .read_table(&self.qualified_table_name(table))
            .await
    }

    async fn write_table(&self, table: &str, rows: &Table, mode: WriteMode) -> Result<()> {
        self.store
            .gateway
            .write_table(&self.qualified_table_name(table), rows, mode)
            .await
    }

    async fn connect_storage_view(&self, table: &str) -> Result<()> {
        let rows = self.read_table(table).await?;
        debug!(%table, rows = rows.num_rows(), "connecting storage table to compute view");
        self.compute.create_or_replace_view(table, rows).await
    }

    async fn disconnect_storage_view(&self, table: &str) -> Result<()> {
        self.compute.drop_view(table).await
    }

    async fn merge_from_view(
        &self,
        target_table: &str,
        view_name: &str,
        columns: MergeColumns,
    ) -> Result<Table> {
        let rows = self.compute.table(view_name).await?;
        self.store
            .merge_staged_changes(target_table, ChangeSet::new(columns, rows))
            .await
    }
}

impl<K: Connect + 'static> StorageService for ComputeMssqlBackend<K> {
    fn capability(&self) -> &'static str {
        crate::registry::SPARK_MSSQL
    }

    fn compute(&self) -> Option<&dyn BulkComputeIntegration> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::LocalCatalog;

    fn config() -> StorageConfig {
        StorageConfig {
            server: "sql.internal".into(),
            database: "dw".into(),
            schema: "vault".into(),
            username: "loader".into(),
            password: "secret".into(),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn test_construction_does_not_connect() {
        let backend = MssqlBackend::from_config(config()).unwrap();
        assert_eq!(backend.namespace().qualify("hub"), "[dw].[vault].[hub]");
        assert_eq!(backend.capability(), "mssql");
        assert!(backend.compute().is_none());
    }

    #[test]
    fn test_compute_backend_exposes_compute() {
        let backend =
            ComputeMssqlBackend::from_config(config(), Arc::new(LocalCatalog::new())).unwrap();
        assert_eq!(backend.capability(), "spark_mssql");
        let compute = backend.compute().unwrap();
        assert_eq!(compute.qualified_table_name("sat"), "[dw].[vault].[sat]");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = StorageConfig {
            database: String::new(),
            ..config()
        };
        assert!(MssqlBackend::from_config(cfg).is_err());
    }
}
