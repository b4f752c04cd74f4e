//! Shared test helpers: a scripted stand-in for SQL Server.
//!
//! [`FakeServer`] plugs into the gateway at the [`Connect`] seam. It
//! records every statement it receives and answers from rules matched by
//! substring; unmatched statements succeed with an empty result.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mssql_storage::driver::{Connect, SqlConnection};
use mssql_storage::error::DriverError;
use mssql_storage::{StorageConfig, Table, Value};

#[derive(Clone)]
enum Response {
    Rows(Table),
    Fail(String),
}

struct Rule {
    matches: Box<dyn Fn(&str) -> bool + Send>,
    response: Response,
}

#[derive(Default)]
struct State {
    statements: Vec<String>,
    rules: Vec<Rule>,
    connects: usize,
    refuse_connections: bool,
}

/// Scripted server shared between a test and the gateway under test.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

#[allow(dead_code)]
impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `needle` with `table`.
    pub fn on(&self, needle: &str, table: Table) -> &Self {
        let needle = needle.to_string();
        self.push_rule(move |sql| sql.contains(&needle), Response::Rows(table))
    }

    /// Reject statements containing `needle` with `message`.
    pub fn fail_on(&self, needle: &str, message: &str) -> &Self {
        let needle = needle.to_string();
        self.fail_when(move |sql| sql.contains(&needle), message)
    }

    /// Reject statements accepted by `matches` with `message`.
    pub fn fail_when(
        &self,
        matches: impl Fn(&str) -> bool + Send + 'static,
        message: &str,
    ) -> &Self {
        self.push_rule(matches, Response::Fail(message.to_string()))
    }

    fn push_rule(&self, matches: impl Fn(&str) -> bool + Send + 'static, response: Response) -> &Self {
        self.state.lock().unwrap().rules.push(Rule {
            matches: Box::new(matches),
            response,
        });
        self
    }

    /// Every statement received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    /// Index of the first statement containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.statements().iter().position(|s| s.contains(needle))
    }

    /// Make every connection attempt fail.
    pub fn refuse_connections(&self) -> &Self {
        self.state.lock().unwrap().refuse_connections = true;
        self
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    fn answer(&self, sql: &str) -> Result<Table, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        let response = state
            .rules
            .iter()
            .find(|r| (r.matches)(sql))
            .map(|r| r.response.clone());
        match response {
            Some(Response::Rows(table)) => Ok(table),
            Some(Response::Fail(message)) => Err(DriverError::Other(message)),
            None => Ok(Table::empty()),
        }
    }
}

pub struct FakeConnection(FakeServer);

#[async_trait]
impl SqlConnection for FakeConnection {
    async fn run(&mut self, sql: &str) -> Result<Table, DriverError> {
        self.0.answer(sql)
    }
}

#[async_trait]
impl Connect for FakeServer {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.refuse_connections {
            return Err(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(FakeConnection(self.clone()))
    }

    fn describe(&self) -> String {
        "fake".into()
    }
}

/// Configuration for database `dw`, schema `vault`.
#[allow(dead_code)]
pub fn config() -> StorageConfig {
    StorageConfig {
        server: "sql.test".into(),
        database: "dw".into(),
        schema: "vault".into(),
        username: "loader".into(),
        password: "secret".into(),
        ..StorageConfig::default()
    }
}

/// Whether `sql` is the bare staging cleanup statement.
#[allow(dead_code)]
pub fn is_cleanup_drop(sql: &str) -> bool {
    sql.starts_with("DROP TABLE IF EXISTS") && !sql.contains("CREATE TABLE")
}

/// A one-column table, one row per value.
#[allow(dead_code)]
pub fn column(name: &str, values: Vec<Value>) -> Table {
    Table::new(
        vec![name.to_string()],
        values.into_iter().map(|v| vec![v]).collect(),
    )
    .unwrap()
}
