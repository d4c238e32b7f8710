//! Transactions spanning the primary and, for `*First` patterns, the
//! secondary store.

use async_trait::async_trait;

use crate::core::{ExecResult, Prepared, Row, SqlValue, Transaction};
use crate::error::{MigrateError, Result};

use super::mirror::MirrorTx;
use super::pattern::Pattern;

/// A transaction opened through [`DualWritePool`](super::DualWritePool).
///
/// The pattern is fixed when the transaction begins. The primary
/// transaction's outcome is the only one returned to the caller.
pub struct DualWriteTx {
    pattern: Pattern,
    primary: Box<dyn Transaction>,
    mirror: MirrorTx,
}

impl DualWriteTx {
    pub(crate) fn new(pattern: Pattern, primary: Box<dyn Transaction>, mirror: MirrorTx) -> Self {
        Self {
            pattern,
            primary,
            mirror,
        }
    }

    /// The pattern this transaction was started under.
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Whether a secondary transaction is open.
    pub fn is_mirrored(&self) -> bool {
        self.mirror.is_open()
    }
}

#[async_trait]
impl Transaction for DualWriteTx {
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecResult> {
        let res = self.primary.exec(sql, args).await?;
        self.mirror.exec(sql, args).await;
        Ok(res)
    }

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        self.primary.query_row(sql, args).await
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        self.primary.query(sql, args).await
    }

    async fn prepare(&mut self, _sql: &str) -> Result<Prepared> {
        Err(MigrateError::Unsupported(
            "prepared statements on a dual-write transaction",
        ))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let DualWriteTx {
            primary, mirror, ..
        } = *self;
        primary.commit().await?;
        mirror.commit().await;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let DualWriteTx {
            primary, mirror, ..
        } = *self;
        primary.rollback().await?;
        mirror.rollback().await;
        Ok(())
    }
}
