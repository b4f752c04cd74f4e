//! E2E test harness that boots a SQL Server 2022 container.
//!
//! # Prerequisites
//!
//! Docker must be available. The tests using this harness are `#[ignore]`d
//! by default:
//!
//! ```bash
//! cargo test --test e2e_merge_tests -- --ignored
//! ```
//!
//! Set `MSSQL_E2E_IMAGE` (`name:tag`) to use a different server image.

use mssql_storage::backend::{MssqlBackend, RelationalStore};
use mssql_storage::{StorageConfig, Value};
use testcontainers::{
    ContainerAsync, GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};

const IMAGE_NAME: &str = "mcr.microsoft.com/mssql/server";
const IMAGE_TAG: &str = "2022-latest";
const SA_PASSWORD: &str = "Merge!Sync2022";

pub const DATABASE: &str = "dw";
pub const SCHEMA: &str = "vault";

fn e2e_image() -> (String, String) {
    match std::env::var("MSSQL_E2E_IMAGE") {
        Ok(val) if !val.is_empty() => match val.rsplit_once(':') {
            Some((name, tag)) => (name.to_string(), tag.to_string()),
            None => (val, "latest".to_string()),
        },
        _ => (IMAGE_NAME.to_string(), IMAGE_TAG.to_string()),
    }
}

/// A SQL Server container with database [`DATABASE`] and schema
/// [`SCHEMA`] created. The container is removed when this is dropped.
pub struct E2eDb {
    pub backend: MssqlBackend,
    pub config: StorageConfig,
    _container: ContainerAsync<GenericImage>,
}

#[allow(dead_code)]
impl E2eDb {
    pub async fn new() -> Self {
        let (img_name, img_tag) = e2e_image();
        let container = GenericImage::new(img_name, img_tag)
            .with_exposed_port(1433_u16.tcp())
            .with_wait_for(WaitFor::message_on_stdout(
                "SQL Server is now ready for client connections",
            ))
            .with_env_var("ACCEPT_EULA", "Y")
            .with_env_var("MSSQL_SA_PASSWORD", SA_PASSWORD)
            .start()
            .await
            .expect("Failed to start SQL Server container");

        let port = container
            .get_host_port_ipv4(1433)
            .await
            .expect("Failed to get mapped port");

        let config_for = |database: &str| StorageConfig {
            server: "127.0.0.1".into(),
            port,
            database: database.into(),
            schema: SCHEMA.into(),
            username: "sa".into(),
            password: SA_PASSWORD.into(),
            ..StorageConfig::default()
        };

        let master = MssqlBackend::from_config(config_for("master")).expect("master config");
        Self::wait_until_ready(&master, 30).await;
        master
            .execute(&format!("CREATE DATABASE [{DATABASE}]"))
            .await
            .expect("Failed to create test database");

        let config = config_for(DATABASE);
        let backend = MssqlBackend::from_config(config.clone()).expect("test config");
        backend
            .create_schema(SCHEMA)
            .await
            .expect("Failed to create test schema");

        E2eDb {
            backend,
            config,
            _container: container,
        }
    }

    /// The server may refuse logins briefly after the ready message.
    async fn wait_until_ready(backend: &MssqlBackend, max_attempts: u32) {
        for attempt in 1..=max_attempts {
            match backend.test().await {
                Ok(()) => return,
                Err(e) if attempt < max_attempts => {
                    eprintln!("E2E connect attempt {attempt}/{max_attempts}: {e}");
                }
                Err(e) => panic!("E2E: failed to connect after {max_attempts} attempts: {e}"),
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    /// `[dw].[vault].[table]`
    pub fn qualified(&self, table: &str) -> String {
        self.backend.namespace().qualify(table)
    }

    /// Execute a statement (panics on error).
    pub async fn execute(&self, sql: &str) {
        self.backend
            .execute(sql)
            .await
            .unwrap_or_else(|e| panic!("SQL failed: {e}\nSQL: {sql}"));
    }

    pub async fn scalar(&self, sql: &str) -> Option<Value> {
        self.backend
            .single_scalar_value(sql)
            .await
            .unwrap_or_else(|e| panic!("Scalar query failed: {e}\nSQL: {sql}"))
    }

    pub async fn count(&self, table: &str) -> i64 {
        self.scalar(&format!("SELECT COUNT(*) FROM {}", self.qualified(table)))
            .await
            .and_then(|v| v.as_i64())
            .expect("COUNT(*) returned no integer")
    }

    /// `name` of the row with key `id`, or `None` if the row is absent.
    pub async fn name_of(&self, table: &str, id: i64) -> Option<String> {
        let rows = self
            .backend
            .execute(&format!(
                "SELECT name FROM {} WHERE id = {id}",
                self.qualified(table)
            ))
            .await
            .expect("lookup failed");
        rows.get(0, "name")
            .map(|v| v.as_str().unwrap_or_default().to_string())
    }

    /// Create `table (id INT PRIMARY KEY, name NVARCHAR(100), city NVARCHAR(100))`.
    pub async fn create_target(&self, table: &str) {
        self.execute(&format!(
            "CREATE TABLE {} (id INT NOT NULL PRIMARY KEY, name NVARCHAR(100) NULL, city NVARCHAR(100) NULL)",
            self.qualified(table)
        ))
        .await;
    }

    /// Base tables in the test schema whose names start with `prefix`.
    pub async fn tables_like(&self, prefix: &str) -> Vec<String> {
        self.backend
            .execute(&format!(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = N'{SCHEMA}' AND TABLE_NAME LIKE N'{prefix}%'"
            ))
            .await
            .expect("catalog query failed")
            .rows()
            .iter()
            .filter_map(|r| r[0].as_str().map(str::to_string))
            .collect()
    }
}
