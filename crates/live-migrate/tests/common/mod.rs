//! Shared fixtures for the integration tests.

use std::sync::Arc;

use live_migrate::drivers::SqliteStore;
use live_migrate::{Entity, Result, Row, SqlValue, Store, TableEntity};

/// Engagement counters for one business object.
#[derive(Debug, Clone, PartialEq)]
pub struct Counter {
    pub id: i64,
    pub biz_id: i64,
    pub read_cnt: i64,
    pub utime: i64,
}

impl Counter {
    pub fn new(id: i64, utime: i64) -> Self {
        Self {
            id,
            biz_id: id * 10,
            read_cnt: id % 7,
            utime,
        }
    }
}

impl Entity for Counter {
    fn id(&self) -> i64 {
        self.id
    }

    fn compare_to(&self, other: &Self) -> bool {
        self.biz_id == other.biz_id && self.read_cnt == other.read_cnt
    }
}

impl TableEntity for Counter {
    const TABLE: &'static str = "counters";
    const COLUMNS: &'static [&'static str] = &["id", "biz_id", "read_cnt", "utime"];

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_i64("id")?,
            biz_id: row.try_i64("biz_id")?,
            read_cnt: row.try_i64("read_cnt")?,
            utime: row.try_i64("utime")?,
        })
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::I64(self.id),
            SqlValue::I64(self.biz_id),
            SqlValue::I64(self.read_cnt),
            SqlValue::I64(self.utime),
        ]
    }

    fn updated_at(&self) -> i64 {
        self.utime
    }
}

/// A private in-memory SQLite store holding an empty `counters` table.
pub async fn counter_store() -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    store
        .exec(
            "CREATE TABLE \"counters\" (\
             id INTEGER PRIMARY KEY, \
             biz_id INTEGER NOT NULL, \
             read_cnt INTEGER NOT NULL, \
             utime INTEGER NOT NULL)",
            &[],
        )
        .await
        .unwrap();
    store
}

/// Make `counters` unreachable on `store` (or reachable again).
pub async fn set_offline(store: &Arc<dyn Store>, offline: bool) {
    let sql = if offline {
        "ALTER TABLE \"counters\" RENAME TO \"counters_offline\""
    } else {
        "ALTER TABLE \"counters_offline\" RENAME TO \"counters\""
    };
    store.exec(sql, &[]).await.unwrap();
}
