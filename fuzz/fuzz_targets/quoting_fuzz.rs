#![no_main]

use libfuzzer_sys::fuzz_target;
use mssql_storage::merge::{is_staging_table_for, staging_table_name};
use mssql_storage::sql::{MAX_IDENTIFIER_LEN, quote_ident, quote_literal, to_transport_charset};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let ident = quote_ident(s);
    assert_eq!(ident[1..ident.len() - 1].replace("]]", "]"), s);

    let literal = quote_literal(s);
    assert_eq!(literal[2..literal.len() - 1].replace("''", "'"), s);

    assert!(to_transport_charset(s).is_ascii());

    let staging = staging_table_name(s);
    assert!(staging.chars().count() <= MAX_IDENTIFIER_LEN);
    assert!(is_staging_table_for(s, &staging));
});
