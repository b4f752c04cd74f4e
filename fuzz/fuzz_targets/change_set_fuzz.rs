//! Arbitrary JSON documents must either be rejected with an error or
//! produce a change-set whose MERGE text is well formed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mssql_storage::merge::{ChangeSet, MergeStatement};

fuzz_target!(|data: &[u8]| {
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(change_set) = ChangeSet::from_json(doc) else {
        return;
    };
    if change_set.validate().is_err() {
        return;
    }
    let sql = MergeStatement::new("[t]", "[s]", &change_set.columns).render();
    assert!(sql.starts_with("MERGE INTO [t] AS target"));
    assert!(sql.ends_with(");"));
});
