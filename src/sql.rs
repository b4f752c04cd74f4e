//! SQL text helpers for SQL Server: identifier quoting, literal rendering,
//! relation qualification, and DDL/DML rendering for materialized tables.
//!
//! Every identifier that reaches a statement goes through [`quote_ident`];
//! every value goes through [`render_literal`].

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::{Result, StorageError};
use crate::table::{Table, Value};

/// SQL Server caps row value constructors at 1000 rows per `INSERT`.
pub const INSERT_BATCH_ROWS: usize = 1000;

/// SQL Server identifier length limit (`sysname`).
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Quote an identifier with square brackets, doubling embedded `]`.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a string as an `N'...'` literal, doubling embedded `'`.
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

/// Comma-separated list of quoted column names.
pub fn col_list(cols: &[String]) -> String {
    cols.iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Comma-separated list of `prefix.[col]` references.
pub fn prefixed_col_list(prefix: &str, cols: &[String]) -> String {
    cols.iter()
        .map(|c| format!("{prefix}.{}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a value as a T-SQL literal.
pub fn render_literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::Int(i) => i.to_string(),
        // Exponent form keeps the literal typed as FLOAT and within
        // SQL Server's 38-digit limit for numeric literals.
        Value::Float(f) if f.is_finite() => format!("{f:e}"),
        Value::Float(f) => {
            return Err(StorageError::InvalidArgument(format!(
                "{f} cannot be stored in SQL Server"
            )));
        }
        Value::Text(s) => quote_literal(s),
        Value::Bytes(b) => {
            let mut out = String::with_capacity(2 + b.len() * 2);
            out.push_str("0x");
            for byte in b {
                out.push_str(&format!("{byte:02X}"));
            }
            out
        }
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
        Value::DateTimeOffset(dt) => format!("'{}'", dt.to_rfc3339()),
    })
}

/// Reduce statement text to 7-bit ASCII before it is sent to the server.
///
/// Non-ASCII characters are dropped, not transliterated. Identifier
/// quoting elsewhere assumes this character set.
pub fn to_transport_charset(sql: &str) -> Cow<'_, str> {
    if sql.is_ascii() {
        Cow::Borrowed(sql)
    } else {
        Cow::Owned(sql.chars().filter(char::is_ascii).collect())
    }
}

/// A `database.schema` pair that relations are qualified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub database: String,
    pub schema: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
        }
    }

    /// `[database].[schema].[table]`
    pub fn qualify(&self, table: &str) -> String {
        format!(
            "{}.{}.{}",
            quote_ident(&self.database),
            quote_ident(&self.schema),
            quote_ident(table)
        )
    }
}

/// How [`write_table_sql`] treats an existing relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Create the relation if it is missing, then insert.
    #[default]
    Append,
    /// Drop and recreate the relation, then insert.
    Overwrite,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            other => Err(StorageError::InvalidArgument(format!(
                "unsupported write mode '{other}' (expected 'append' or 'overwrite')"
            ))),
        }
    }
}

/// Declared column types (T-SQL type text) keyed by column name.
pub type ColumnTypes = HashMap<String, String>;

/// T-SQL type text for one `INFORMATION_SCHEMA.COLUMNS` row.
///
/// `rowversion` columns become `BINARY(8)`; explicit values cannot be
/// inserted into a `rowversion`.
pub fn declared_type(
    data_type: &str,
    char_max_len: Option<i64>,
    numeric_precision: Option<i64>,
    numeric_scale: Option<i64>,
    datetime_precision: Option<i64>,
) -> String {
    let ty = data_type.to_ascii_uppercase();
    match ty.as_str() {
        "CHAR" | "VARCHAR" | "NCHAR" | "NVARCHAR" | "BINARY" | "VARBINARY" => match char_max_len {
            Some(-1) => format!("{ty}(MAX)"),
            Some(len) => format!("{ty}({len})"),
            None => ty,
        },
        "DECIMAL" | "NUMERIC" => match (numeric_precision, numeric_scale) {
            (Some(p), Some(s)) => format!("{ty}({p}, {s})"),
            _ => ty,
        },
        "DATETIME2" | "TIME" | "DATETIMEOFFSET" => match datetime_precision {
            Some(p) => format!("{ty}({p})"),
            None => ty,
        },
        "TIMESTAMP" | "ROWVERSION" => "BINARY(8)".to_string(),
        _ => ty,
    }
}

/// `CREATE TABLE` for `table`'s columns, types inferred from its values.
pub fn create_table_sql(qualified: &str, table: &Table) -> Result<String> {
    create_typed_table_sql(qualified, table, &ColumnTypes::new())
}

/// `CREATE TABLE` for `table`'s columns. Columns named in `declared` get
/// that type; the rest are inferred from the values.
pub fn create_typed_table_sql(
    qualified: &str,
    table: &Table,
    declared: &ColumnTypes,
) -> Result<String> {
    if table.num_columns() == 0 {
        return Err(StorageError::InvalidArgument(format!(
            "cannot create {qualified} from a table without columns"
        )));
    }
    let columns = table
        .columns()
        .iter()
        .zip(table.infer_column_types())
        .map(|(name, inferred)| {
            let ty = declared.get(name).map_or(inferred.as_sql(), String::as_str);
            format!("{} {ty} NULL", quote_ident(name))
        })
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("CREATE TABLE {qualified} ({columns})"))
}

/// The statements that materialize `table` into `qualified`: one DDL
/// batch followed by one `INSERT` per [`INSERT_BATCH_ROWS`] rows.
pub fn write_table_sql(qualified: &str, table: &Table, mode: WriteMode) -> Result<Vec<String>> {
    write_typed_table_sql(qualified, table, mode, &ColumnTypes::new())
}

/// [`write_table_sql`] with declared column types, as for
/// [`create_typed_table_sql`].
pub fn write_typed_table_sql(
    qualified: &str,
    table: &Table,
    mode: WriteMode,
    declared: &ColumnTypes,
) -> Result<Vec<String>> {
    let create = create_typed_table_sql(qualified, table, declared)?;
    let ddl = match mode {
        WriteMode::Overwrite => format!("DROP TABLE IF EXISTS {qualified};\n{create}"),
        WriteMode::Append => format!(
            "IF OBJECT_ID({}, N'U') IS NULL\n{create}",
            quote_literal(qualified)
        ),
    };

    let mut statements = vec![ddl];
    statements.extend(insert_sql(qualified, table)?);
    Ok(statements)
}

/// Batched `INSERT ... VALUES` statements for every row of `table`.
pub fn insert_sql(qualified: &str, table: &Table) -> Result<Vec<String>> {
    let cols = col_list(table.columns());
    table
        .rows()
        .chunks(INSERT_BATCH_ROWS)
        .map(|chunk| {
            let tuples = chunk
                .iter()
                .map(|row| {
                    let values = row
                        .iter()
                        .map(render_literal)
                        .collect::<Result<Vec<_>>>()?;
                    Ok(format!("({})", values.join(", ")))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(format!(
                "INSERT INTO {qualified} ({cols}) VALUES {}",
                tuples.join(", ")
            ))
        })
        .collect()
}
