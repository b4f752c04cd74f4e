//! Merge synchronization: stage a change-set and push it into a target
//! table with a single `MERGE` statement.
//!
//! # Flow
//!
//! 1. Validate the [`ChangeSet`] against its [`MergeColumns`] description.
//! 2. Name a staging relation `<target>_<uuid>`.
//! 3. Strip helper columns ([`HELPER_COLUMNS`]) and write the rows to the
//!    staging relation in overwrite mode. Staging columns take the
//!    target's declared types; indicator columns are `BIT`; anything else
//!    is inferred from the values.
//! 4. Render and run the `MERGE` ([`MergeStatement`]).
//! 5. Drop the staging relation, whatever happened in 3 and 4.
//!
//! # Column gating
//!
//! A data column with a source satellite is only overwritten on match when
//! the staged `update_ind_<satellite>` flag is 1. Columns without a source
//! are insert-only. When a deletion indicator is configured, matched rows
//! flagged for deletion are deleted before any update applies, and flagged
//! rows without a match are not inserted.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::driver::Connect;
use crate::error::{Result, StorageError};
use crate::gateway::Gateway;
use crate::sql::{
    ColumnTypes, MAX_IDENTIFIER_LEN, Namespace, WriteMode, col_list, prefixed_col_list,
    quote_ident,
};
use crate::table::Table;

/// Columns dropped from the change-set before it is staged.
pub const HELPER_COLUMNS: &[&str] = &["key_source"];

/// Prefix of the per-satellite update indicator columns.
pub const UPDATE_INDICATOR_PREFIX: &str = "update_ind_";

/// Length of the staging suffix: a hyphenated UUID with `-` → `_`.
const STAGING_SUFFIX_LEN: usize = 36;

/// Characters of the target name kept in a staging name.
const STAGING_PREFIX_BUDGET: usize = MAX_IDENTIFIER_LEN - STAGING_SUFFIX_LEN - 1;

// ── Change-set description ───────────────────────────────────────────

/// How a change-set maps onto its target table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeColumns {
    /// Entity key. Unique per target row.
    pub key_column: String,
    /// Data columns inserted on first appearance, in order.
    pub column_names: Vec<String>,
    /// Data column → satellite whose update indicator gates it.
    #[serde(default)]
    pub column_sources: BTreeMap<String, String>,
    /// Boolean column; 1 deletes the matched target row.
    #[serde(default)]
    pub deletion_indicator_column: Option<String>,
}

impl MergeColumns {
    pub fn new<I, S>(key_column: impl Into<String>, column_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_column: key_column.into(),
            column_names: column_names.into_iter().map(Into::into).collect(),
            column_sources: BTreeMap::new(),
            deletion_indicator_column: None,
        }
    }

    /// Gate `column` on `satellite`'s update indicator.
    pub fn with_source(mut self, column: impl Into<String>, satellite: impl Into<String>) -> Self {
        self.column_sources.insert(column.into(), satellite.into());
        self
    }

    pub fn with_deletion_indicator(mut self, column: impl Into<String>) -> Self {
        self.deletion_indicator_column = Some(column.into());
        self
    }

    /// Name of the update indicator column for a satellite.
    pub fn update_indicator(satellite: &str) -> String {
        format!("{UPDATE_INDICATOR_PREFIX}{satellite}")
    }

    /// Gated columns in `column_names` order, paired with their indicator.
    pub fn gated_columns(&self) -> Vec<(&str, String)> {
        self.column_names
            .iter()
            .filter_map(|col| {
                self.column_sources
                    .get(col)
                    .map(|sat| (col.as_str(), Self::update_indicator(sat)))
            })
            .collect()
    }

    /// Update indicator columns and the deletion indicator, if any.
    pub fn flag_columns(&self) -> Vec<String> {
        let mut flags: Vec<String> = Vec::new();
        let indicators = self.gated_columns().into_iter().map(|(_, ind)| ind);
        for flag in indicators.chain(self.deletion_indicator_column.iter().cloned()) {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        flags
    }

    /// Every column the staged rows must carry.
    pub fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![self.key_column.clone()];
        let indicators = self.gated_columns().into_iter().map(|(_, ind)| ind);
        for col in self
            .column_names
            .iter()
            .cloned()
            .chain(indicators)
            .chain(self.deletion_indicator_column.iter().cloned())
        {
            if !cols.contains(&col) {
                cols.push(col);
            }
        }
        cols
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_column.trim().is_empty() {
            return Err(StorageError::InvalidArgument(
                "key column must not be empty".into(),
            ));
        }
        if self.column_names.is_empty() {
            return Err(StorageError::InvalidArgument(
                "at least one data column is required".into(),
            ));
        }
        if let Some(col) = self.column_names.iter().find(|c| c.trim().is_empty()) {
            return Err(StorageError::InvalidArgument(format!(
                "empty column name in column_names: {col:?}"
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.column_names.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(StorageError::InvalidArgument(format!(
                "column {dup} appears more than once in column_names"
            )));
        }
        for (col, sat) in &self.column_sources {
            if !self.column_names.contains(col) {
                return Err(StorageError::InvalidArgument(format!(
                    "column_sources names {col}, which is not in column_names"
                )));
            }
            if sat.trim().is_empty() {
                return Err(StorageError::InvalidArgument(format!(
                    "column {col} has an empty satellite name"
                )));
            }
        }
        if let Some(del) = &self.deletion_indicator_column {
            if del.trim().is_empty() {
                return Err(StorageError::InvalidArgument(
                    "deletion indicator column must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Staged rows plus the description of how to merge them.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub columns: MergeColumns,
    pub rows: Table,
}

impl ChangeSet {
    pub fn new(columns: MergeColumns, rows: Table) -> Self {
        Self { columns, rows }
    }

    /// Check the description, then that the rows carry every column it
    /// references.
    pub fn validate(&self) -> Result<()> {
        self.columns.validate()?;
        let missing: Vec<String> = self
            .columns
            .required_columns()
            .into_iter()
            .filter(|c| !self.rows.has_column(c))
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::InvalidArgument(format!(
                "change-set rows are missing columns: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Parse a change-set document: the [`MergeColumns`] fields plus a
    /// `rows` array of row objects. Without rows, the table carries the
    /// required columns and no rows.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut doc) = json else {
            return Err(StorageError::InvalidArgument(
                "change-set document must be a JSON object".into(),
            ));
        };
        let rows = doc
            .remove("rows")
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
        let columns: MergeColumns = serde_json::from_value(serde_json::Value::Object(doc))
            .map_err(|e| StorageError::InvalidArgument(format!("change-set document: {e}")))?;
        let mut rows = Table::from_json_rows(rows)?;
        if rows.num_columns() == 0 {
            rows = Table::with_columns(columns.required_columns());
        }
        Ok(Self::new(columns, rows))
    }

    /// The rows as they are written to the staging relation.
    pub fn staged_rows(&self) -> Table {
        HELPER_COLUMNS
            .iter()
            .fold(self.rows.clone(), |rows, helper| rows.drop_column(helper))
    }
}

// ── Statement rendering ──────────────────────────────────────────────

/// Builder for the `MERGE` statement.
///
/// Relations are passed already qualified; columns are quoted here.
#[derive(Debug, Clone)]
pub struct MergeStatement<'a> {
    target: &'a str,
    staging: &'a str,
    columns: &'a MergeColumns,
}

impl<'a> MergeStatement<'a> {
    pub fn new(target: &'a str, staging: &'a str, columns: &'a MergeColumns) -> Self {
        Self {
            target,
            staging,
            columns,
        }
    }

    fn delete_clause(&self) -> Option<String> {
        self.columns.deletion_indicator_column.as_ref().map(|del| {
            format!(
                "WHEN MATCHED AND source.{} = 1 THEN DELETE",
                quote_ident(del)
            )
        })
    }

    fn update_clause(&self) -> Option<String> {
        let sets: Vec<String> = self
            .columns
            .gated_columns()
            .into_iter()
            .map(|(col, indicator)| {
                let c = quote_ident(col);
                format!(
                    "{c} = CASE WHEN source.{} = 1 THEN source.{c} ELSE target.{c} END",
                    quote_ident(&indicator)
                )
            })
            .collect();
        if sets.is_empty() {
            return None;
        }
        Some(format!("WHEN MATCHED THEN UPDATE SET {}", sets.join(", ")))
    }

    fn insert_clause(&self) -> String {
        let guard = match &self.columns.deletion_indicator_column {
            Some(del) => {
                let d = quote_ident(del);
                format!(" AND (source.{d} IS NULL OR source.{d} = 0)")
            }
            None => String::new(),
        };
        let cols = &self.columns.column_names;
        format!(
            "WHEN NOT MATCHED{guard} THEN INSERT ({}) VALUES ({});",
            col_list(cols),
            prefixed_col_list("source", cols),
        )
    }

    pub fn render(&self) -> String {
        let key = quote_ident(&self.columns.key_column);
        let mut clauses = vec![
            format!("MERGE INTO {} AS target", self.target),
            format!("USING {} AS source", self.staging),
            format!("ON target.{key} = source.{key}"),
        ];
        clauses.extend(self.delete_clause());
        clauses.extend(self.update_clause());
        clauses.push(self.insert_clause());
        clauses.join("\n")
    }
}

// ── Staging relation naming ──────────────────────────────────────────

/// The part of the target name kept in staging names.
fn staging_prefix(target_table: &str) -> &str {
    match target_table.char_indices().nth(STAGING_PREFIX_BUDGET) {
        Some((idx, _)) => &target_table[..idx],
        None => target_table,
    }
}

/// A fresh staging relation name for `target_table`.
pub fn staging_table_name(target_table: &str) -> String {
    let suffix = uuid::Uuid::new_v4().hyphenated().to_string().replace('-', "_");
    format!("{}_{suffix}", staging_prefix(target_table))
}

/// Whether `candidate` is a staging relation generated for `target_table`.
pub fn is_staging_table_for(target_table: &str, candidate: &str) -> bool {
    let Some(rest) = candidate
        .strip_prefix(staging_prefix(target_table))
        .and_then(|r| r.strip_prefix('_'))
    else {
        return false;
    };
    rest.len() == STAGING_SUFFIX_LEN
        && !rest.contains('-')
        && uuid::Uuid::parse_str(&rest.replace('_', "-")).is_ok()
}

// ── Execution ────────────────────────────────────────────────────────

/// Merge a change-set into `target_table` in `namespace`.
///
/// Returns the change-set rows as given, helper columns included. The
/// staging relation is dropped on every path once writing it has been
/// attempted; if both the merge and the drop fail, both errors are kept.
pub async fn merge_staged_changes<K: Connect>(
    gateway: &Gateway<K>,
    namespace: &Namespace,
    target_table: &str,
    change_set: ChangeSet,
) -> Result<Table> {
    change_set.validate()?;

    let staging_table = staging_table_name(target_table);
    let target = namespace.qualify(target_table);
    let staging = namespace.qualify(&staging_table);

    let outcome = stage_and_merge(
        gateway,
        namespace,
        target_table,
        &target,
        &staging,
        &change_set,
    )
    .await;
    let cleanup = drop_staging(gateway, &staging).await;

    match (outcome, cleanup) {
        (Ok(()), Ok(())) => Ok(change_set.rows),
        (Err(e), Ok(())) => Err(e),
        (Ok(()), Err(cleanup)) => Err(cleanup),
        (Err(primary), Err(cleanup)) => Err(StorageError::MergeWithCleanupFailure {
            primary: Box::new(primary),
            cleanup: Box::new(cleanup),
        }),
    }
}

/// Staging column types: the target's declared types, `BIT` for flags
/// the target does not declare.
async fn staging_column_types<K: Connect>(
    gateway: &Gateway<K>,
    namespace: &Namespace,
    target_table: &str,
    columns: &MergeColumns,
) -> Result<ColumnTypes> {
    let mut declared = gateway
        .column_types(&namespace.schema, target_table)
        .await?;
    for flag in columns.flag_columns() {
        declared.entry(flag).or_insert_with(|| "BIT".to_string());
    }
    Ok(declared)
}

async fn stage_and_merge<K: Connect>(
    gateway: &Gateway<K>,
    namespace: &Namespace,
    target_table: &str,
    target: &str,
    staging: &str,
    change_set: &ChangeSet,
) -> Result<()> {
    let declared =
        staging_column_types(gateway, namespace, target_table, &change_set.columns).await?;
    let staged = change_set.staged_rows();
    debug!(
        %staging,
        rows = staged.num_rows(),
        "writing change-set to staging relation"
    );
    gateway
        .write_typed_table(staging, &staged, WriteMode::Overwrite, &declared)
        .await?;

    let sql = MergeStatement::new(target, staging, &change_set.columns).render();
    debug!(%target, %sql, "pushing merge down to SQL Server");
    match gateway.execute(&sql).await {
        Ok(_) => Ok(()),
        Err(StorageError::StatementExecution(source)) => Err(StorageError::MergeStatement {
            target: target.to_string(),
            staging: staging.to_string(),
            source,
        }),
        Err(e) => Err(e),
    }
}

async fn drop_staging<K: Connect>(gateway: &Gateway<K>, staging: &str) -> Result<()> {
    match gateway.drop_table(staging).await {
        Ok(()) => {
            debug!(%staging, "dropped staging relation");
            Ok(())
        }
        Err(e) => {
            error!(%staging, error = %e, "failed to drop staging relation");
            match e {
                StorageError::StatementExecution(source) => Err(StorageError::ResourceCleanup {
                    staging: staging.to_string(),
                    source,
                }),
                other => Err(other),
            }
        }
    }
}

/// Drop staging relations of `target_table` left behind by processes that
/// died mid-merge. Returns the names dropped.
///
/// Only run this when no merge into `target_table` is in flight; it cannot
/// tell an orphan from a live staging relation.
///
/// Staging names keep only the first 91 characters of the target name, so
/// longer targets cannot be told apart from each other and are refused
/// with `InvalidArgument`.
pub async fn purge_staging_relations<K: Connect>(
    gateway: &Gateway<K>,
    namespace: &Namespace,
    target_table: &str,
) -> Result<Vec<String>> {
    if target_table.chars().count() > STAGING_PREFIX_BUDGET {
        return Err(StorageError::InvalidArgument(format!(
            "cannot purge staging relations of {target_table}: target names longer than \
             {STAGING_PREFIX_BUDGET} characters are truncated in staging names"
        )));
    }
    let prefix = format!("{}_", staging_prefix(target_table));
    let candidates = gateway
        .list_tables_with_prefix(&namespace.schema, &prefix)
        .await?;

    let mut dropped = Vec::new();
    for name in candidates
        .into_iter()
        .filter(|n| is_staging_table_for(target_table, n))
    {
        gateway.drop_table(&namespace.qualify(&name)).await?;
        info!(staging = %name, "purged orphaned staging relation");
        dropped.push(name);
    }
    Ok(dropped)
}
