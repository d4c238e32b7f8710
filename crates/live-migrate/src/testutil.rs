//! Fixtures shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::{
    Dialect, Entity, ExecResult, Prepared, Records, Row, SqlValue, Store, TableEntity, Transaction,
};
use crate::drivers::sqlite::SqliteStore;
use crate::error::{MigrateError, Result};
use crate::events::{InconsistentEvent, Producer};

/// Minimal entity. Equality is asymmetric: a base name matches any target
/// name it prefixes, and `utime` is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub utime: i64,
}

impl Account {
    pub fn new(id: i64, name: &str, utime: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            utime,
        }
    }
}

impl Entity for Account {
    fn id(&self) -> i64 {
        self.id
    }

    fn compare_to(&self, other: &Self) -> bool {
        other.name.starts_with(&self.name)
    }
}

impl TableEntity for Account {
    const TABLE: &'static str = "accounts";
    const COLUMNS: &'static [&'static str] = &["id", "name", "utime"];

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_i64("id")?,
            name: row.try_string("name")?,
            utime: row.try_i64("utime")?,
        })
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::I64(self.id),
            SqlValue::from(self.name.as_str()),
            SqlValue::I64(self.utime),
        ]
    }

    fn updated_at(&self) -> i64 {
        self.utime
    }
}

const CREATE_ACCOUNTS: &str = "CREATE TABLE \"accounts\" (\
    id INTEGER PRIMARY KEY, \
    name TEXT NOT NULL, \
    utime INTEGER NOT NULL)";

/// A private in-memory store with an empty `accounts` table.
pub async fn memory_store() -> Arc<dyn Store> {
    let store = memory_store_without_table().await;
    store.exec(CREATE_ACCOUNTS, &[]).await.unwrap();
    store
}

/// A private in-memory store with no tables at all.
pub async fn memory_store_without_table() -> Arc<dyn Store> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

pub async fn seed(store: &Arc<dyn Store>, accounts: &[Account]) {
    let records = Records::<Account>::new(store.clone());
    for account in accounts {
        records.upsert(account).await.unwrap();
    }
}

fn unavailable() -> MigrateError {
    MigrateError::Store(sqlx::Error::PoolTimedOut)
}

#[derive(Default)]
struct Faults {
    down: AtomicBool,
    fail_writes: AtomicBool,
    fail_commit: AtomicBool,
    writes: AtomicU64,
}

impl Faults {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.check()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    fn wrote(&self, res: Result<ExecResult>) -> Result<ExecResult> {
        if res.is_ok() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        res
    }
}

/// Wraps a store with switchable failures and counts successful writes.
pub struct FlakyStore {
    inner: Arc<dyn Store>,
    faults: Arc<Faults>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            faults: Arc::new(Faults::default()),
        })
    }

    /// Fail every call.
    pub fn set_down(&self, down: bool) {
        self.faults.down.store(down, Ordering::SeqCst);
    }

    /// Fail writes only; reads and `begin` still work.
    pub fn set_fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail `commit` on transactions; the transaction is rolled back.
    pub fn set_fail_commit(&self, fail: bool) {
        self.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Successful `exec` calls so far, inside transactions or not.
    pub fn writes(&self) -> u64 {
        self.faults.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult> {
        self.faults.check_write()?;
        self.faults.wrote(self.inner.exec(sql, args).await)
    }

    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        self.faults.check()?;
        self.inner.query_row(sql, args).await
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        self.faults.check()?;
        self.inner.query(sql, args).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.faults.check()?;
        let tx = self.inner.begin().await?;
        Ok(Box::new(FlakyTx {
            inner: tx,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared> {
        self.faults.check()?;
        self.inner.prepare(sql).await
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn db_type(&self) -> &str {
        "flaky"
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

struct FlakyTx {
    inner: Box<dyn Transaction>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Transaction for FlakyTx {
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecResult> {
        self.faults.check_write()?;
        let res = self.inner.exec(sql, args).await;
        self.faults.wrote(res)
    }

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        self.faults.check()?;
        self.inner.query_row(sql, args).await
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        self.faults.check()?;
        self.inner.query(sql, args).await
    }

    async fn prepare(&mut self, sql: &str) -> Result<Prepared> {
        self.faults.check()?;
        self.inner.prepare(sql).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.faults.check()?;
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            self.inner.rollback().await?;
            return Err(unavailable());
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

/// Records every published event; optionally fails every publish.
#[derive(Default)]
pub struct CollectingProducer {
    events: Mutex<Vec<InconsistentEvent>>,
    fail: AtomicBool,
}

impl CollectingProducer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let producer = Self::new();
        producer.set_failing(true);
        producer
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<InconsistentEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Producer for CollectingProducer {
    async fn produce_inconsistent_event(&self, event: &InconsistentEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MigrateError::Publish("broker unavailable".into()));
        }
        self.events.lock().unwrap().push(*event);
        Ok(())
    }
}

/// A broker that accepts the connection and never acknowledges.
pub struct StalledProducer;

#[async_trait]
impl Producer for StalledProducer {
    async fn produce_inconsistent_event(&self, _event: &InconsistentEvent) -> Result<()> {
        std::future::pending().await
    }
}
