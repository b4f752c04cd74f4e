//! Storage backend configuration.
//!
//! A [`StorageConfig`] is read from the host engine's configuration (TOML)
//! and selects a backend by its `type` field. All relations are qualified
//! against `database` and `schema`.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, StorageError};
use crate::sql::Namespace;

/// Default SQL Server TCP port.
pub const DEFAULT_PORT: u16 = 1433;

/// Connection and namespace settings for one storage backend.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Capability name used to select the backend (`mssql`, `spark_mssql`).
    #[serde(rename = "type")]
    pub backend_type: String,
    pub server: String,
    pub port: u16,
    pub database: String,
    pub schema: String,
    pub username: String,
    pub password: String,
    /// Authenticate with the process's own identity instead of a login.
    pub trusted_connection: bool,
    /// Require TLS for the whole session.
    pub encrypt: bool,
    /// Accept the server certificate without validation.
    pub trust_server_certificate: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend_type: crate::registry::MSSQL.to_string(),
            server: String::new(),
            port: DEFAULT_PORT,
            database: String::new(),
            schema: String::new(),
            username: String::new(),
            password: String::new(),
            trusted_connection: false,
            encrypt: false,
            trust_server_certificate: true,
        }
    }
}

// Password is redacted; configs end up in logs and error reports.
impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("type", &self.backend_type)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("trusted_connection", &self.trusted_connection)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

impl StorageConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StorageError::InvalidConfig(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StorageError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check that the configuration can be used to connect.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("server", &self.server),
            ("database", &self.database),
            ("schema", &self.schema),
        ] {
            if value.trim().is_empty() {
                return Err(StorageError::InvalidConfig(format!("{field} must be set")));
            }
        }
        if !self.trusted_connection && self.username.trim().is_empty() {
            return Err(StorageError::InvalidConfig(
                "username must be set unless trusted_connection is enabled".into(),
            ));
        }
        if self.port == 0 {
            return Err(StorageError::InvalidConfig("port must be non-zero".into()));
        }
        Ok(())
    }

    /// The namespace every relation of this backend lives in.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.database, &self.schema)
    }
}
