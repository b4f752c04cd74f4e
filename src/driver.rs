//! Driver seam between the gateway and the database client.
//!
//! [`Connect`] opens connections and [`SqlConnection`] runs statement text
//! on one of them. The production implementation speaks TDS through
//! `tiberius`; tests plug in scripted connections at the same seam.
//!
//! ## Result materialization
//!
//! A connection returns the first result set of the submitted batch as a
//! [`Table`]. A statement that produces no rows, or no row set at all
//! (DDL, MERGE, DROP), yields [`Table::empty`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::StorageConfig;
use crate::error::{DriverError, Result, StorageError};
use crate::table::{Table, Value};

/// A live connection able to run statement text.
#[async_trait]
pub trait SqlConnection: Send {
    /// Run a statement or T-SQL batch and materialize its first result set.
    async fn run(&mut self, sql: &str) -> Result<Table, DriverError>;
}

/// Opens connections for a gateway.
#[async_trait]
pub trait Connect: Send + Sync {
    type Connection: SqlConnection;

    async fn connect(&self) -> Result<Self::Connection, DriverError>;

    /// Human-readable target for log lines (never includes credentials).
    fn describe(&self) -> String;
}

// ── TDS (tiberius) ─────────────────────────────────────────────────────

type TdsClient = Client<Compat<TcpStream>>;

/// Opens TDS connections to SQL Server.
#[derive(Debug, Clone)]
pub struct TdsConnector {
    config: Config,
    server: String,
    database: String,
}

impl TdsConnector {
    /// Build a connector from a validated storage configuration.
    pub fn from_config(cfg: &StorageConfig) -> Result<Self> {
        cfg.validate()?;

        let mut tds = Config::new();
        tds.host(&cfg.server);
        tds.port(cfg.port);
        tds.database(&cfg.database);
        tds.application_name("mssql_storage");
        tds.authentication(auth_method(cfg)?);
        tds.encryption(if cfg.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::NotSupported
        });
        if cfg.trust_server_certificate {
            tds.trust_cert();
        }

        Ok(Self {
            config: tds,
            server: format!("{}:{}", cfg.server, cfg.port),
            database: cfg.database.clone(),
        })
    }

    async fn open(config: Config) -> Result<TdsClient, DriverError> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Ok(Client::connect(config, tcp.compat_write()).await?)
    }
}

#[cfg(feature = "integrated-auth")]
fn auth_method(cfg: &StorageConfig) -> Result<AuthMethod> {
    if cfg.trusted_connection {
        return Ok(AuthMethod::Integrated);
    }
    Ok(AuthMethod::sql_server(&cfg.username, &cfg.password))
}

#[cfg(not(feature = "integrated-auth"))]
fn auth_method(cfg: &StorageConfig) -> Result<AuthMethod> {
    if cfg.trusted_connection {
        return Err(StorageError::Unsupported(
            "trusted_connection requires the `integrated-auth` feature".into(),
        ));
    }
    Ok(AuthMethod::sql_server(&cfg.username, &cfg.password))
}

#[async_trait]
impl Connect for TdsConnector {
    type Connection = TdsConnection;

    async fn connect(&self) -> Result<TdsConnection, DriverError> {
        let client = match Self::open(self.config.clone()).await {
            Ok(client) => client,
            // Azure SQL gateways redirect to the node hosting the database.
            Err(DriverError::Tds(tiberius::error::Error::Routing { host, port })) => {
                tracing::debug!(%host, port, "following SQL Server routing redirect");
                let mut config = self.config.clone();
                config.host(&host);
                config.port(port);
                Self::open(config).await?
            }
            Err(e) => return Err(e),
        };
        Ok(TdsConnection { client })
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.server, self.database)
    }
}

/// A single TDS connection.
pub struct TdsConnection {
    client: TdsClient,
}

#[async_trait]
impl SqlConnection for TdsConnection {
    async fn run(&mut self, sql: &str) -> Result<Table, DriverError> {
        let stream = self.client.simple_query(sql).await?;
        let results = stream.into_results().await?;
        let Some(rows) = results.into_iter().next() else {
            return Ok(Table::empty());
        };
        let Some(first) = rows.first() else {
            return Ok(Table::empty());
        };

        let columns = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let values = rows.iter().map(convert_row).collect();
        Table::new(columns, values).map_err(|e| DriverError::Other(e.to_string()))
    }
}

// ── Type Conversion ────────────────────────────────────────────────────

fn convert_column_data(data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::Int(i64::from(*v)),
        ColumnData::I16(Some(v)) => Value::Int(i64::from(*v)),
        ColumnData::I32(Some(v)) => Value::Int(i64::from(*v)),
        ColumnData::I64(Some(v)) => Value::Int(*v),
        ColumnData::F32(Some(v)) => Value::Float(f64::from(*v)),
        ColumnData::F64(Some(v)) => Value::Float(*v),
        ColumnData::Numeric(Some(n)) if n.scale() == 0 => i64::try_from(n.value())
            .map(Value::Int)
            .unwrap_or(Value::Float(n.value() as f64)),
        ColumnData::Numeric(Some(n)) => {
            Value::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
        }
        ColumnData::String(Some(s)) => Value::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::Text(g.to_string()),
        ColumnData::Binary(Some(b)) => Value::Bytes(b.to_vec()),
        ColumnData::Xml(Some(xml)) => Value::Text(xml.clone().into_owned().into_string()),
        _ => Value::Null,
    }
}

/// Date/time cells go through tiberius' chrono getters; everything else
/// converts directly.
fn convert_row(row: &tiberius::Row) -> Vec<Value> {
    row.cells()
        .enumerate()
        .map(|(i, (_col, data))| match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map(Value::DateTime)
                .unwrap_or(Value::Null),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<DateTime<Utc>, _>(i)
                .ok()
                .flatten()
                .map(|dt| Value::DateTimeOffset(dt.fixed_offset()))
                .unwrap_or(Value::Null),
            ColumnData::Date(Some(_)) => row
                .try_get::<NaiveDate, _>(i)
                .ok()
                .flatten()
                .map(Value::Date)
                .unwrap_or(Value::Null),
            ColumnData::Time(Some(_)) => row
                .try_get::<NaiveTime, _>(i)
                .ok()
                .flatten()
                .map(Value::Time)
                .unwrap_or(Value::Null),
            _ => convert_column_data(data),
        })
        .collect()
}
