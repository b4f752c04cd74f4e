//! Compute-engine catalog seam.
//!
//! The compute-integrated backend exchanges tables with a compute engine
//! through named views. [`ComputeCatalog`] is the interface it needs;
//! [`LocalCatalog`] keeps the views in process memory.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::table::Table;

/// Named views registered with a compute engine.
#[async_trait]
pub trait ComputeCatalog: Send + Sync {
    /// Current contents of a view. Missing views are `ViewNotFound`.
    async fn table(&self, name: &str) -> Result<Table>;

    async fn create_or_replace_view(&self, name: &str, table: Table) -> Result<()>;

    /// Missing views are `ViewNotFound`.
    async fn drop_view(&self, name: &str) -> Result<()>;

    async fn view_names(&self) -> Vec<String>;
}

/// In-process [`ComputeCatalog`].
#[derive(Debug, Default)]
pub struct LocalCatalog {
    views: RwLock<HashMap<String, Table>>,
}

impl LocalCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ComputeCatalog for LocalCatalog {
    async fn table(&self, name: &str) -> Result<Table> {
        self.views
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::ViewNotFound(name.to_string()))
    }

    async fn create_or_replace_view(&self, name: &str, table: Table) -> Result<()> {
        debug!(view = name, rows = table.num_rows(), "registering compute view");
        self.views.write().await.insert(name.to_string(), table);
        Ok(())
    }

    async fn drop_view(&self, name: &str) -> Result<()> {
        self.views
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::ViewNotFound(name.to_string()))
    }

    async fn view_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.views.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    #[tokio::test]
    async fn test_register_read_and_drop() {
        let catalog = LocalCatalog::new();
        let table = Table::new(vec!["id".into()], vec![vec![Value::Int(1)]]).unwrap();
        catalog.create_or_replace_view("hub", table.clone()).await.unwrap();
        assert_eq!(catalog.table("hub").await.unwrap(), table);
        assert_eq!(catalog.view_names().await, vec!["hub"]);

        catalog.drop_view("hub").await.unwrap();
        assert!(matches!(
            catalog.table("hub").await,
            Err(StorageError::ViewNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_overwrites() {
        let catalog = LocalCatalog::new();
        catalog.create_or_replace_view("v", Table::empty()).await.unwrap();
        let table = Table::with_columns(["a"]);
        catalog.create_or_replace_view("v", table.clone()).await.unwrap();
        assert_eq!(catalog.table("v").await.unwrap(), table);
    }

    #[tokio::test]
    async fn test_drop_missing_view() {
        let catalog = LocalCatalog::new();
        assert!(matches!(
            catalog.drop_view("nope").await,
            Err(StorageError::ViewNotFound(_))
        ));
    }
}
