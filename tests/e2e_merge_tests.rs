//! E2E tests for merge synchronization against a real SQL Server.
//!
//! Each test boots its own container; see `tests/e2e/mod.rs`. They need
//! Docker and are ignored by default.

mod e2e;

use e2e::E2eDb;
use mssql_storage::backend::RelationalStore;
use mssql_storage::{ChangeSet, MergeColumns, StorageError, Table, Value};

fn name_columns() -> MergeColumns {
    MergeColumns::new("id", ["id", "name"])
        .with_source("name", "s1")
        .with_deletion_indicator("deleted")
}

/// Rows of `(id, name, update_ind_s1, deleted)`.
fn changes(rows: &[(i64, &str, bool, bool)]) -> ChangeSet {
    let table = Table::new(
        vec![
            "id".into(),
            "name".into(),
            "update_ind_s1".into(),
            "deleted".into(),
        ],
        rows.iter()
            .map(|(id, name, ind, del)| {
                vec![
                    Value::Int(*id),
                    Value::from(*name),
                    Value::Bool(*ind),
                    Value::Bool(*del),
                ]
            })
            .collect(),
    )
    .unwrap();
    ChangeSet::new(name_columns(), table)
}

async fn seeded(rows: &[(i64, &str)]) -> E2eDb {
    let db = E2eDb::new().await;
    db.create_target("hub").await;
    for (id, name) in rows {
        db.execute(&format!(
            "INSERT INTO {} (id, name) VALUES ({id}, N'{name}')",
            db.qualified("hub")
        ))
        .await;
    }
    db
}

#[tokio::test]
#[ignore]
async fn test_e2e_update_indicator_gates_overwrite() {
    let db = seeded(&[(1, "A")]).await;

    db.backend
        .merge_staged_changes("hub", changes(&[(1, "B", false, false)]))
        .await
        .unwrap();
    assert_eq!(db.name_of("hub", 1).await.as_deref(), Some("A"));

    db.backend
        .merge_staged_changes("hub", changes(&[(1, "B", true, false)]))
        .await
        .unwrap();
    assert_eq!(db.name_of("hub", 1).await.as_deref(), Some("B"));
}

#[tokio::test]
#[ignore]
async fn test_e2e_unmatched_rows_are_inserted() {
    let db = seeded(&[(1, "A")]).await;
    db.backend
        .merge_staged_changes("hub", changes(&[(2, "C", false, false)]))
        .await
        .unwrap();
    assert_eq!(db.count("hub").await, 2);
    assert_eq!(db.name_of("hub", 2).await.as_deref(), Some("C"));
}

#[tokio::test]
#[ignore]
async fn test_e2e_deletion_indicator_removes_matched_row() {
    let db = seeded(&[(1, "A"), (2, "B")]).await;
    db.backend
        .merge_staged_changes("hub", changes(&[(1, "X", true, true)]))
        .await
        .unwrap();
    assert_eq!(db.name_of("hub", 1).await, None);
    assert_eq!(db.count("hub").await, 1);
}

#[tokio::test]
#[ignore]
async fn test_e2e_delete_without_match_is_noop() {
    let db = seeded(&[(1, "A")]).await;
    db.backend
        .merge_staged_changes("hub", changes(&[(2, "C", true, true)]))
        .await
        .unwrap();
    assert_eq!(db.count("hub").await, 1);
    assert_eq!(db.name_of("hub", 2).await, None);
}

#[tokio::test]
#[ignore]
async fn test_e2e_zero_row_merge_leaves_target_unchanged() {
    let db = seeded(&[(1, "A"), (2, "B")]).await;
    db.backend
        .merge_staged_changes("hub", changes(&[]))
        .await
        .unwrap();
    assert_eq!(db.count("hub").await, 2);
}

/// `blob (id INT PRIMARY KEY, payload VARBINARY(MAX))` with one row.
async fn seeded_blob_target() -> E2eDb {
    let db = E2eDb::new().await;
    db.execute(&format!(
        "CREATE TABLE {} (id INT NOT NULL PRIMARY KEY, payload VARBINARY(MAX) NULL)",
        db.qualified("blob")
    ))
    .await;
    db.execute(&format!(
        "INSERT INTO {} (id, payload) VALUES (1, 0x0102)",
        db.qualified("blob")
    ))
    .await;
    db
}

fn blob_columns() -> MergeColumns {
    MergeColumns::new("id", ["id", "payload"])
        .with_source("payload", "s1")
        .with_deletion_indicator("deleted")
}

#[tokio::test]
#[ignore]
async fn test_e2e_zero_row_merge_into_binary_target() {
    let db = seeded_blob_target().await;
    let columns = blob_columns();
    let rows = Table::with_columns(columns.required_columns());

    db.backend
        .merge_staged_changes("blob", ChangeSet::new(columns, rows))
        .await
        .unwrap();
    assert_eq!(db.count("blob").await, 1);
    assert!(db.tables_like("blob_").await.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_e2e_binary_values_merge() {
    let db = seeded_blob_target().await;
    let rows = Table::new(
        vec![
            "id".into(),
            "payload".into(),
            "update_ind_s1".into(),
            "deleted".into(),
        ],
        vec![
            vec![Value::Int(1), Value::Bytes(vec![0xAB]), Value::Bool(true), Value::Bool(false)],
            vec![Value::Int(2), Value::Null, Value::Bool(false), Value::Bool(false)],
        ],
    )
    .unwrap();

    db.backend
        .merge_staged_changes("blob", ChangeSet::new(blob_columns(), rows))
        .await
        .unwrap();
    assert_eq!(db.count("blob").await, 2);
    assert_eq!(
        db.scalar(&format!("SELECT payload FROM {} WHERE id = 1", db.qualified("blob")))
            .await,
        Some(Value::Bytes(vec![0xAB]))
    );
}

#[tokio::test]
#[ignore]
async fn test_e2e_merge_is_idempotent() {
    let db = seeded(&[(1, "A")]).await;
    let batch = [(1, "B", true, false), (2, "C", false, false)];

    db.backend
        .merge_staged_changes("hub", changes(&batch))
        .await
        .unwrap();
    let after_first = read_all(&db, "hub").await;
    db.backend
        .merge_staged_changes("hub", changes(&batch))
        .await
        .unwrap();
    assert_eq!(read_all(&db, "hub").await, after_first);
}

#[tokio::test]
#[ignore]
async fn test_e2e_failed_merge_leaves_no_staging_relation() {
    let db = seeded(&[(1, "A")]).await;
    // `ghost` is staged but does not exist in the target.
    let cs = ChangeSet::new(
        MergeColumns::new("id", ["id", "ghost"]),
        Table::new(
            vec!["id".into(), "ghost".into()],
            vec![vec![Value::Int(5), "boo".into()]],
        )
        .unwrap(),
    );

    let err = db.backend.merge_staged_changes("hub", cs).await.unwrap_err();
    assert!(
        matches!(err, StorageError::MergeStatement { .. }),
        "unexpected error: {err}"
    );
    assert!(db.tables_like("hub_").await.is_empty());
    assert_eq!(db.count("hub").await, 1);
}

#[tokio::test]
#[ignore]
async fn test_e2e_schema_lifecycle() {
    let db = E2eDb::new().await;
    let backend = &db.backend;

    assert!(backend.schema_exists("vault").await.unwrap());
    assert!(backend.schema_empty("vault").await.unwrap());
    db.create_target("hub").await;
    db.execute(&format!(
        "CREATE VIEW [vault].[hub_names] AS SELECT name FROM {}",
        db.qualified("hub")
    ))
    .await;
    assert!(backend.table_exists("vault", "hub").await.unwrap());
    assert!(backend.column_exists("vault", "hub", "city").await.unwrap());
    assert!(!backend.column_exists("vault", "hub", "nope").await.unwrap());
    assert!(!backend.schema_empty("vault").await.unwrap());

    backend.drop_schema("vault").await.unwrap();
    assert!(!backend.schema_exists("vault").await.unwrap());
    assert!(!backend.table_exists("vault", "hub").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_e2e_purge_staging_relations() {
    let db = seeded(&[]).await;
    let orphan = mssql_storage::merge::staging_table_name("hub");
    db.execute(&format!("CREATE TABLE {} (id INT)", db.qualified(&orphan)))
        .await;

    let purged = db.backend.purge_staging_relations("hub").await.unwrap();
    assert_eq!(purged, vec![orphan]);
    assert_eq!(db.tables_like("hub").await, vec!["hub"]);
}

/// Full contents of a table ordered by key, for state comparisons.
async fn read_all(db: &E2eDb, table: &str) -> Table {
    db.backend
        .execute(&format!(
            "SELECT id, name, city FROM {} ORDER BY id",
            db.qualified(table)
        ))
        .await
        .unwrap()
}
