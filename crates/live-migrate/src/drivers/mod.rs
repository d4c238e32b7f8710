//! Database driver implementations.
//!
//! - [`mysql`]: MySQL/MariaDB, the production engine
//! - [`sqlite`]: SQLite, for embedded use and tests
//!
//! Both are built on SQLx connection pools and implement [`Store`].
//! Result rows are decoded dynamically into [`SqlValue`](crate::core::SqlValue) by the column's
//! reported type.

/// Bind positional arguments onto a SQLx query.
macro_rules! bind_values {
    ($query:expr, $args:expr) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                $crate::core::SqlValue::Null => query.bind(None::<i64>),
                $crate::core::SqlValue::Bool(v) => query.bind(*v),
                $crate::core::SqlValue::I64(v) => query.bind(*v),
                $crate::core::SqlValue::F64(v) => query.bind(*v),
                $crate::core::SqlValue::Text(v) => query.bind(v.clone()),
                $crate::core::SqlValue::Bytes(v) => query.bind(v.clone()),
                $crate::core::SqlValue::DateTime(v) => query.bind(*v),
            };
        }
        query
    }};
}

pub(crate) use bind_values;

pub mod mysql;
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::core::{Dialect, Store};
use crate::error::Result;

pub use mysql::MysqlStore;
pub use sqlite::SqliteStore;

/// Open a pooled store for `config`.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.kind {
        Dialect::Mysql => Arc::new(MysqlStore::connect(config).await?),
        Dialect::Sqlite => Arc::new(SqliteStore::connect(config).await?),
    };
    info!(
        db_type = store.db_type(),
        url = %config.redacted_url(),
        "Connected to store"
    );
    Ok(store)
}

/// Column names of a result set, shared by all of its rows.
pub(crate) fn column_names<R: sqlx::Row>(row: &R) -> Arc<[String]> {
    use sqlx::Column;

    row.columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into()
}
