//! Tabular storage gateway: one connection to SQL Server and the
//! statement-level operations built on it.
//!
//! The gateway owns a single lazily-opened connection. Every call is a
//! round trip to the live database; nothing is cached locally.
//!
//! ## Transport character set
//!
//! Statement text is reduced to 7-bit ASCII before submission (see
//! [`to_transport_charset`]). Non-ASCII characters in literals are lost;
//! this is logged at `warn`. Identifier quoting assumes this reduction.

use std::borrow::Cow;

use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::driver::{Connect, SqlConnection, TdsConnector};
use crate::error::{Result, StatementExecutionError, StorageError};
use crate::sql::{
    self, ColumnTypes, WriteMode, declared_type, quote_ident, quote_literal, to_transport_charset,
};
use crate::table::{Table, Value};

/// Statement-level access to one SQL Server database.
pub struct Gateway<K: Connect = TdsConnector> {
    connector: K,
    database: String,
    conn: Mutex<Option<K::Connection>>,
}

impl<K: Connect> Gateway<K> {
    /// Create a gateway. No connection is opened until the first call.
    pub fn new(connector: K, database: impl Into<String>) -> Self {
        Self {
            connector,
            database: database.into(),
            conn: Mutex::new(None),
        }
    }

    /// The database catalog the existence predicates are filtered by.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Run one statement (or T-SQL batch).
    ///
    /// Returns the first result set. A result with zero rows, or a
    /// statement with no row set, yields [`Table::empty`].
    pub async fn execute(&self, statement: &str) -> Result<Table> {
        let sql = to_transport_charset(statement);
        if let Cow::Owned(reduced) = &sql {
            warn!(
                dropped = statement.chars().count() - reduced.chars().count(),
                "removed non-ASCII characters from statement"
            );
        }
        trace!(sql = %sql, "executing statement");

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let conn = self
                .connector
                .connect()
                .await
                .map_err(StorageError::ConnectionFailed)?;
            info!(target = %self.connector.describe(), "connected to SQL Server");
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StorageError::InternalError(
                "connection slot empty after connect".into(),
            ));
        };

        match conn.run(&sql).await {
            Ok(table) => Ok(table),
            Err(source) => {
                if source.is_connection_lost() {
                    debug!("discarding broken connection");
                    *guard = None;
                }
                Err(StatementExecutionError {
                    statement: sql.into_owned(),
                    source,
                }
                .into())
            }
        }
    }

    /// Run statements in order, stopping at the first failure.
    pub async fn execute_all(&self, statements: &[String]) -> Result<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }

    /// First column of the first row, or `None` when there are no rows.
    /// A SQL `NULL` is also reported as `None`.
    pub async fn single_scalar_value(&self, statement: &str) -> Result<Option<Value>> {
        let table = self.execute(statement).await?;
        Ok(table
            .rows()
            .first()
            .and_then(|row| row.first())
            .filter(|v| !v.is_null())
            .cloned())
    }

    /// Connectivity probe.
    pub async fn test(&self) -> Result<()> {
        self.execute("SELECT 1").await.map(|_| ())
    }

    async fn exists(&self, statement: &str) -> Result<bool> {
        Ok(!self.execute(statement).await?.is_empty())
    }

    pub async fn schema_exists(&self, schema: &str) -> Result<bool> {
        self.exists(&format!(
            "SELECT SCHEMA_NAME \
             FROM INFORMATION_SCHEMA.SCHEMATA \
             WHERE CATALOG_NAME = {} \
             AND SCHEMA_NAME = {}",
            quote_literal(&self.database),
            quote_literal(schema),
        ))
        .await
    }

    pub async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        self.exists(&format!(
            "SELECT TABLE_NAME \
             FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_CATALOG = {} \
             AND TABLE_SCHEMA = {} \
             AND TABLE_NAME = {}",
            quote_literal(&self.database),
            quote_literal(schema),
            quote_literal(table),
        ))
        .await
    }

    pub async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool> {
        self.exists(&format!(
            "SELECT COLUMN_NAME \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_CATALOG = {} \
             AND TABLE_SCHEMA = {} \
             AND TABLE_NAME = {} \
             AND COLUMN_NAME = {}",
            quote_literal(&self.database),
            quote_literal(schema),
            quote_literal(table),
            quote_literal(column),
        ))
        .await
    }

    /// Declared types of the columns of `schema.table`, keyed by column
    /// name. Empty when the table does not exist.
    pub async fn column_types(&self, schema: &str, table: &str) -> Result<ColumnTypes> {
        let columns = self
            .execute(&format!(
                "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, \
                 NUMERIC_PRECISION, NUMERIC_SCALE, DATETIME_PRECISION \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_CATALOG = {} \
                 AND TABLE_SCHEMA = {} \
                 AND TABLE_NAME = {}",
                quote_literal(&self.database),
                quote_literal(schema),
                quote_literal(table),
            ))
            .await?;
        Ok(columns
            .rows()
            .iter()
            .filter_map(|row| {
                let name = row.first()?.as_str()?;
                let data_type = row.get(1)?.as_str()?;
                let int = |i: usize| row.get(i).and_then(Value::as_i64);
                Some((
                    name.to_string(),
                    declared_type(data_type, int(2), int(3), int(4), int(5)),
                ))
            })
            .collect())
    }

    /// Whether the schema holds no tables or views.
    pub async fn schema_empty(&self, schema: &str) -> Result<bool> {
        Ok(!self
            .exists(&format!(
                "SELECT TOP 1 TABLE_NAME \
                 FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_CATALOG = {} \
                 AND TABLE_SCHEMA = {}",
                quote_literal(&self.database),
                quote_literal(schema),
            ))
            .await?)
    }

    pub async fn create_schema(&self, schema: &str) -> Result<()> {
        self.execute(&format!("CREATE SCHEMA {}", quote_ident(schema)))
            .await
            .map(|_| ())
    }

    /// Drop every view and base table in the schema, then the schema.
    ///
    /// The objects are enumerated by a server-side cursor so the drops run
    /// against the live catalog, views before tables.
    pub async fn drop_schema(&self, schema: &str) -> Result<()> {
        let schema_lit = quote_literal(schema);
        self.execute(&format!(
            "DECLARE @drop_statements AS CURSOR;
DECLARE @statement AS NVARCHAR(MAX);

SET @drop_statements = CURSOR LOCAL FAST_FORWARD FOR
    SELECT stmt FROM (
        SELECT 0 AS ord, N'DROP VIEW ' + QUOTENAME(TABLE_SCHEMA) + N'.' + QUOTENAME(TABLE_NAME) AS stmt
          FROM INFORMATION_SCHEMA.VIEWS
         WHERE TABLE_SCHEMA = {schema_lit}
        UNION ALL
        SELECT 1 AS ord, N'DROP TABLE ' + QUOTENAME(TABLE_SCHEMA) + N'.' + QUOTENAME(TABLE_NAME) AS stmt
          FROM INFORMATION_SCHEMA.TABLES
         WHERE TABLE_SCHEMA = {schema_lit}
           AND TABLE_TYPE = 'BASE TABLE'
    ) AS drops
    ORDER BY ord;

OPEN @drop_statements;
FETCH NEXT FROM @drop_statements INTO @statement;
WHILE @@FETCH_STATUS = 0
BEGIN
    EXECUTE (@statement);
    FETCH NEXT FROM @drop_statements INTO @statement;
END
CLOSE @drop_statements;
DEALLOCATE @drop_statements;"
        ))
        .await?;
        self.execute(&format!("DROP SCHEMA {}", quote_ident(schema)))
            .await
            .map(|_| ())
    }

    /// Names of base tables in `schema` whose names start with `prefix`.
    pub async fn list_tables_with_prefix(&self, schema: &str, prefix: &str) -> Result<Vec<String>> {
        let table = self
            .execute(&format!(
                "SELECT TABLE_NAME \
                 FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_CATALOG = {} \
                 AND TABLE_SCHEMA = {} \
                 AND TABLE_TYPE = 'BASE TABLE' \
                 AND TABLE_NAME LIKE {} ESCAPE '\\'",
                quote_literal(&self.database),
                quote_literal(schema),
                quote_literal(&format!("{}%", escape_like(prefix))),
            ))
            .await?;
        Ok(table
            .rows()
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// `SELECT *` from a qualified relation.
    pub async fn read_table(&self, qualified: &str) -> Result<Table> {
        self.execute(&format!("SELECT * FROM {qualified}")).await
    }

    /// Materialize `table` into a qualified relation.
    pub async fn write_table(&self, qualified: &str, table: &Table, mode: WriteMode) -> Result<()> {
        self.write_typed_table(qualified, table, mode, &ColumnTypes::new())
            .await
    }

    /// [`Gateway::write_table`], creating columns named in `declared` with
    /// that type instead of one inferred from the values.
    pub async fn write_typed_table(
        &self,
        qualified: &str,
        table: &Table,
        mode: WriteMode,
        declared: &ColumnTypes,
    ) -> Result<()> {
        let statements = sql::write_typed_table_sql(qualified, table, mode, declared)?;
        debug!(
            relation = %qualified,
            mode = mode.as_str(),
            rows = table.num_rows(),
            declared = declared.len(),
            batches = statements.len() - 1,
            "writing table"
        );
        self.execute_all(&statements).await
    }

    /// `DROP TABLE IF EXISTS` on a qualified relation.
    pub async fn drop_table(&self, qualified: &str) -> Result<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {qualified};"))
            .await
            .map(|_| ())
    }
}

/// Escape `LIKE` wildcards with `\`.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '[' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
