//! Dual-write connection pool.
//!
//! [`DualWritePool`] implements [`Store`] over two physical stores and routes
//! each call by the active [`Pattern`]:
//!
//! | Pattern     | Reads | Writes                          |
//! |-------------|-------|---------------------------------|
//! | `SrcOnly`   | src   | src                             |
//! | `SrcFirst`  | src   | src, then dst best-effort       |
//! | `DstFirst`  | dst   | dst, then src best-effort       |
//! | `DstOnly`   | dst   | dst                             |
//!
//! The data-access layer keeps using the pool as an ordinary store while an
//! operator moves the pattern through the migration phases.

mod mirror;
mod pattern;
mod tx;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::{Dialect, ExecResult, Prepared, Row, SqlValue, Store, Transaction};
use crate::error::{MigrateError, Result};

use mirror::{Mirror, MirrorTx};

pub use pattern::{AtomicPattern, Pattern, Side};
pub use tx::DualWriteTx;

/// A [`Store`] that fans writes out to the base (src) and target (dst) stores.
pub struct DualWritePool {
    src: Arc<dyn Store>,
    dst: Arc<dyn Store>,
    pattern: AtomicPattern,
}

impl DualWritePool {
    /// Create a pool in the `SrcOnly` phase.
    pub fn new(src: Arc<dyn Store>, dst: Arc<dyn Store>) -> Self {
        Self {
            src,
            dst,
            pattern: AtomicPattern::default(),
        }
    }

    /// Start in `pattern` instead of `SrcOnly`.
    pub fn with_pattern(self, pattern: Pattern) -> Self {
        self.pattern.swap(pattern);
        self
    }

    /// The active pattern.
    pub fn pattern(&self) -> Pattern {
        self.pattern.load()
    }

    /// Switch phase. Operations already in flight keep the pattern they
    /// started with.
    pub fn set_pattern(&self, pattern: Pattern) {
        let previous = self.pattern.swap(pattern);
        info!(from = %previous, to = %pattern, "Migration pattern switched");
    }

    /// Switch phase from its literal form. An unknown literal leaves the
    /// active pattern unchanged.
    pub fn update_pattern(&self, literal: &str) -> Result<()> {
        let pattern: Pattern = literal.parse()?;
        self.set_pattern(pattern);
        Ok(())
    }

    /// The physical store behind `side`.
    pub fn store(&self, side: Side) -> &Arc<dyn Store> {
        match side {
            Side::Src => &self.src,
            Side::Dst => &self.dst,
        }
    }

    /// Begin a transaction under the current pattern.
    pub async fn begin_tx(&self) -> Result<DualWriteTx> {
        let pattern = self.pattern();
        let primary = self.store(pattern.primary()).begin().await?;
        let mirror = match pattern.secondary() {
            Some(side) => MirrorTx::begin(side, self.store(side).as_ref()).await,
            None => MirrorTx::none(),
        };
        debug!(%pattern, mirrored = mirror.is_open(), "Dual-write transaction started");
        Ok(DualWriteTx::new(pattern, primary, mirror))
    }
}

#[async_trait]
impl Store for DualWritePool {
    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult> {
        let pattern = self.pattern();
        let res = self.store(pattern.primary()).exec(sql, args).await?;
        if let Some(side) = pattern.secondary() {
            Mirror::new(side, self.store(side).as_ref())
                .exec(sql, args)
                .await;
        }
        Ok(res)
    }

    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        let side = self.pattern().primary();
        self.store(side).query_row(sql, args).await
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        let side = self.pattern().primary();
        self.store(side).query(sql, args).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(self.begin_tx().await?))
    }

    async fn prepare(&self, _sql: &str) -> Result<Prepared> {
        Err(MigrateError::Unsupported(
            "prepared statements on a dual-write pool",
        ))
    }

    fn dialect(&self) -> Dialect {
        self.store(self.pattern().primary()).dialect()
    }

    fn db_type(&self) -> &str {
        "dual-write"
    }

    async fn close(&self) {
        self.src.close().await;
        self.dst.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Records;
    use crate::testutil::{memory_store, memory_store_without_table, Account, FlakyStore};

    const INSERT: &str = "INSERT INTO \"accounts\" (\"id\", \"name\", \"utime\") VALUES (?, ?, ?)";

    fn args(id: i64) -> Vec<SqlValue> {
        vec![SqlValue::I64(id), SqlValue::from("n"), SqlValue::I64(1)]
    }

    async fn count(store: &Arc<dyn Store>) -> i64 {
        let row = store
            .query_row("SELECT COUNT(*) AS n FROM \"accounts\"", &[])
            .await
            .unwrap()
            .unwrap();
        row.try_i64("n").unwrap()
    }

    #[tokio::test]
    async fn test_update_pattern_rejects_unknown_literal() {
        let pool = DualWritePool::new(memory_store().await, memory_store().await)
            .with_pattern(Pattern::SrcFirst);
        let err = pool.update_pattern("both").unwrap_err();
        assert!(matches!(err, MigrateError::UnknownPattern(_)));
        assert_eq!(pool.pattern(), Pattern::SrcFirst);

        pool.update_pattern("dst_first").unwrap();
        assert_eq!(pool.pattern(), Pattern::DstFirst);
    }

    #[tokio::test]
    async fn test_exec_routing_per_pattern() {
        let src = memory_store().await;
        let dst = memory_store().await;
        let pool = DualWritePool::new(src.clone(), dst.clone());

        pool.exec(INSERT, &args(1)).await.unwrap();
        assert_eq!((count(&src).await, count(&dst).await), (1, 0));

        pool.set_pattern(Pattern::SrcFirst);
        pool.exec(INSERT, &args(2)).await.unwrap();
        assert_eq!((count(&src).await, count(&dst).await), (2, 1));

        pool.set_pattern(Pattern::DstFirst);
        pool.exec(INSERT, &args(3)).await.unwrap();
        assert_eq!((count(&src).await, count(&dst).await), (3, 2));

        pool.set_pattern(Pattern::DstOnly);
        pool.exec(INSERT, &args(4)).await.unwrap();
        assert_eq!((count(&src).await, count(&dst).await), (3, 3));
    }

    #[tokio::test]
    async fn test_failing_secondary_is_invisible_to_caller() {
        for pattern in Pattern::ALL {
            let src = memory_store().await;
            let healthy_dst = memory_store().await;
            let flaky = FlakyStore::new(memory_store().await);
            flaky.set_down(true);
            let broken_src = FlakyStore::new(memory_store().await);
            broken_src.set_down(true);

            // The secondary is always the broken one; the primary is healthy.
            let pool = match pattern.primary() {
                Side::Src => DualWritePool::new(src.clone(), flaky.clone()),
                Side::Dst => DualWritePool::new(broken_src.clone(), healthy_dst.clone()),
            }
            .with_pattern(pattern);
            let expected = match pattern.primary() {
                Side::Src => src.exec(INSERT, &args(100)).await.unwrap(),
                Side::Dst => healthy_dst.exec(INSERT, &args(100)).await.unwrap(),
            };

            let got = pool.exec(INSERT, &args(1)).await.unwrap();
            assert_eq!(got.rows_affected, expected.rows_affected, "{pattern}");

            let dup = pool.exec(INSERT, &args(1)).await;
            assert!(dup.is_err(), "{pattern}: primary error must surface");
        }
    }

    #[tokio::test]
    async fn test_reads_never_fan_out() {
        let src = memory_store().await;
        let dst = memory_store().await;
        src.exec(INSERT, &args(1)).await.unwrap();
        let pool = Arc::new(DualWritePool::new(src, dst).with_pattern(Pattern::SrcFirst));

        let records = Records::<Account>::new(pool.clone());
        assert!(records.find_by_id(1).await.unwrap().is_some());

        pool.set_pattern(Pattern::DstFirst);
        assert!(records.find_by_id(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prepare_is_unsupported() {
        let pool = DualWritePool::new(memory_store().await, memory_store().await);
        let err = pool.prepare("SELECT 1").await.unwrap_err();
        assert!(matches!(err, MigrateError::Unsupported(_)));

        let mut tx = pool.begin().await.unwrap();
        assert!(matches!(
            tx.prepare("SELECT 1").await,
            Err(MigrateError::Unsupported(_))
        ));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_succeeds_when_secondary_insert_fails() {
        let dst = FlakyStore::new(memory_store().await);
        dst.set_fail_writes(true);
        let pool = Arc::new(
            DualWritePool::new(memory_store().await, dst.clone()).with_pattern(Pattern::SrcFirst),
        );

        let mut tx = pool.begin_tx().await.unwrap();
        assert!(tx.is_mirrored());
        tx.exec(INSERT, &args(7)).await.unwrap();
        Box::new(tx).commit().await.unwrap();

        let records = Records::<Account>::new(pool.clone());
        pool.set_pattern(Pattern::SrcOnly);
        assert!(records.find_by_id(7).await.unwrap().is_some());
        pool.set_pattern(Pattern::DstOnly);
        assert!(records.find_by_id(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mirror_to_store_missing_table_is_logged_only() {
        let src = memory_store().await;
        let pool = DualWritePool::new(src.clone(), memory_store_without_table().await)
            .with_pattern(Pattern::SrcFirst);

        pool.exec(INSERT, &args(1)).await.unwrap();
        assert_eq!(count(&src).await, 1);
    }

    #[tokio::test]
    async fn test_secondary_begin_failure_is_not_propagated() {
        let src = memory_store().await;
        let dst = FlakyStore::new(memory_store().await);
        dst.set_down(true);
        let pool = DualWritePool::new(src.clone(), dst.clone()).with_pattern(Pattern::SrcFirst);

        let mut tx = pool.begin_tx().await.unwrap();
        assert!(!tx.is_mirrored());
        tx.exec(INSERT, &args(1)).await.unwrap();
        Box::new(tx).commit().await.unwrap();
        assert_eq!(count(&src).await, 1);
    }

    #[tokio::test]
    async fn test_transaction_keeps_its_pattern() {
        let src = memory_store().await;
        let dst = memory_store().await;
        let pool = DualWritePool::new(src.clone(), dst.clone()).with_pattern(Pattern::SrcFirst);

        let mut tx = pool.begin_tx().await.unwrap();
        pool.set_pattern(Pattern::DstOnly);
        assert_eq!(tx.pattern(), Pattern::SrcFirst);
        tx.exec(INSERT, &args(1)).await.unwrap();
        Box::new(tx).commit().await.unwrap();

        assert_eq!((count(&src).await, count(&dst).await), (1, 1));
    }

    /// Pool over `primary` and `secondary` with `pattern` deciding which is which.
    fn first_pool(
        pattern: Pattern,
        primary: Arc<dyn Store>,
        secondary: Arc<dyn Store>,
    ) -> DualWritePool {
        match pattern.primary() {
            Side::Src => DualWritePool::new(primary, secondary),
            Side::Dst => DualWritePool::new(secondary, primary),
        }
        .with_pattern(pattern)
    }

    #[tokio::test]
    async fn test_failed_primary_commit_leaves_secondary_untouched() {
        for pattern in [Pattern::SrcFirst, Pattern::DstFirst] {
            let primary = FlakyStore::new(memory_store().await);
            primary.set_fail_commit(true);
            let secondary = memory_store().await;
            let pool = first_pool(pattern, primary.clone(), secondary.clone());

            let mut tx = pool.begin_tx().await.unwrap();
            assert!(tx.is_mirrored(), "{pattern}");
            tx.exec(INSERT, &args(1)).await.unwrap();
            assert!(Box::new(tx).commit().await.is_err(), "{pattern}");

            assert_eq!(count(&secondary).await, 0, "{pattern}: secondary was committed");
            let primary: Arc<dyn Store> = primary;
            assert_eq!(count(&primary).await, 0, "{pattern}");
        }
    }

    #[tokio::test]
    async fn test_failed_primary_exec_is_not_mirrored() {
        for pattern in [Pattern::SrcFirst, Pattern::DstFirst] {
            let primary = FlakyStore::new(memory_store().await);
            let secondary = memory_store().await;
            let pool = first_pool(pattern, primary.clone(), secondary.clone());

            // Constraint violation on the primary.
            primary.exec(INSERT, &args(5)).await.unwrap();
            assert!(pool.exec(INSERT, &args(5)).await.is_err(), "{pattern}");
            let mut tx = pool.begin_tx().await.unwrap();
            assert!(tx.exec(INSERT, &args(5)).await.is_err(), "{pattern}");
            Box::new(tx).rollback().await.unwrap();
            assert_eq!(count(&secondary).await, 0, "{pattern}");

            // Primary unreachable for writes.
            primary.set_fail_writes(true);
            assert!(pool.exec(INSERT, &args(6)).await.is_err(), "{pattern}");
            let mut tx = pool.begin_tx().await.unwrap();
            assert!(tx.exec(INSERT, &args(7)).await.is_err(), "{pattern}");
            Box::new(tx).commit().await.unwrap();
            assert_eq!(count(&secondary).await, 0, "{pattern}");
        }
    }

    #[tokio::test]
    async fn test_rollback_discards_both_legs() {
        let src = memory_store().await;
        let dst = memory_store().await;
        let pool = DualWritePool::new(src.clone(), dst.clone()).with_pattern(Pattern::DstFirst);

        let mut tx = pool.begin().await.unwrap();
        tx.exec(INSERT, &args(1)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!((count(&src).await, count(&dst).await), (0, 0));
    }
}
