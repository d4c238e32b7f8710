//! SQLite store.
//!
//! In-memory databases live and die with their connection, so a
//! `sqlite::memory:` URL always gets a single pinned connection.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row as _, TypeInfo, ValueRef};

use crate::config::StoreConfig;
use crate::core::{Dialect, ExecResult, Prepared, Row, SqlValue, Store, Transaction};
use crate::error::Result;

use super::{bind_values, column_names};

/// SQLite store backed by an SQLx pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a pool from configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let mut pool = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));
        pool = if is_memory_url(&config.url) {
            pool.max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool.max_connections(config.max_connections)
        };
        let pool = pool.connect_with(options).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Decode a SQLite row by each value's storage class.
fn to_row(row: &SqliteRow, columns: &Arc<[String]>) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "INTEGER" | "INT" | "INT8" | "BIGINT" => SqlValue::I64(row.try_get_unchecked(i)?),
            "BOOLEAN" => SqlValue::Bool(row.try_get_unchecked(i)?),
            "REAL" | "FLOAT" | "DOUBLE" => SqlValue::F64(row.try_get_unchecked(i)?),
            "BLOB" => SqlValue::Bytes(row.try_get_unchecked(i)?),
            "DATETIME" => SqlValue::DateTime(row.try_get_unchecked(i)?),
            _ => SqlValue::Text(row.try_get_unchecked(i)?),
        };
        values.push(value);
    }
    Ok(Row::new(Arc::clone(columns), values))
}

fn to_rows(rows: Vec<SqliteRow>) -> Result<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns = column_names(first);
    rows.iter().map(|r| to_row(r, &columns)).collect()
}

fn exec_result(res: sqlx::sqlite::SqliteQueryResult) -> ExecResult {
    ExecResult {
        rows_affected: res.rows_affected(),
        last_insert_id: Some(res.last_insert_rowid()),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult> {
        let res = bind_values!(sqlx::query(sql), args)
            .execute(&self.pool)
            .await?;
        Ok(exec_result(res))
    }

    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        let row = bind_values!(sqlx::query(sql), args)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| to_row(&r, &column_names(&r))).transpose()
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = bind_values!(sqlx::query(sql), args)
            .fetch_all(&self.pool)
            .await?;
        to_rows(rows)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared> {
        self.pool.prepare(sql).await?;
        Ok(Prepared::new(sql))
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// A transaction holding one pooled SQLite connection.
pub struct SqliteTx {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

#[async_trait]
impl Transaction for SqliteTx {
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecResult> {
        let res = bind_values!(sqlx::query(sql), args)
            .execute(&mut *self.tx)
            .await?;
        Ok(exec_result(res))
    }

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        let row = bind_values!(sqlx::query(sql), args)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|r| to_row(&r, &column_names(&r))).transpose()
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = bind_values!(sqlx::query(sql), args)
            .fetch_all(&mut *self.tx)
            .await?;
        to_rows(rows)
    }

    async fn prepare(&mut self, sql: &str) -> Result<Prepared> {
        (&mut *self.tx).prepare(sql).await?;
        Ok(Prepared::new(sql))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
