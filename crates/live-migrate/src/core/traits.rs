//! Core traits for the relational stores taking part in a migration.
//!
//! - [`Store`]: a pooled connection to one physical database
//! - [`Transaction`]: a native transaction opened on a [`Store`]
//!
//! Both the SQL drivers and the dual-write pool implement these traits, so
//! the data-access layer talks to one interface regardless of how many
//! physical stores sit behind it.

use async_trait::async_trait;

use crate::error::Result;

use super::dialect::Dialect;
use super::value::{Row, SqlValue};

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Auto-generated key of the last inserted row, when the backend reports one.
    pub last_insert_id: Option<i64>,
}

/// A statement the backend has parsed and accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    sql: String,
}

impl Prepared {
    /// Wrap SQL text that the backend accepted.
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    /// The statement text.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// A pooled connection to one relational database.
///
/// Statements use positional `?` placeholders bound from `args`.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; stores are shared as
/// `Arc<dyn Store>` between the dual-write pool, validators and fixers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Execute a write statement.
    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult>;

    /// Run a query expected to return at most one row.
    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>>;

    /// Run a query and collect every row.
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>>;

    /// Open a transaction on a dedicated connection.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Ask the backend to parse a statement.
    async fn prepare(&self, sql: &str) -> Result<Prepared>;

    /// Check that the store answers.
    async fn ping(&self) -> Result<()> {
        self.query_row("SELECT 1", &[]).await.map(|_| ())
    }

    /// SQL dialect spoken by this store.
    fn dialect(&self) -> Dialect;

    /// Get the database type identifier (e.g., "mysql", "sqlite").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// A native transaction.
///
/// Owned by exactly one task for its whole lifetime. `commit` and
/// `rollback` consume the transaction.
#[async_trait]
pub trait Transaction: Send {
    /// Execute a write statement inside the transaction.
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecResult>;

    /// Query at most one row inside the transaction.
    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>>;

    /// Query every row inside the transaction.
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>>;

    /// Ask the backend to parse a statement on the transaction's connection.
    async fn prepare(&mut self, sql: &str) -> Result<Prepared>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
