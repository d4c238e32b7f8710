//! Repair of individual records.
//!
//! An [`OverrideFixer`] makes its target store match its base store for one
//! id: the base row overwrites the target row, and a row base does not
//! have is deleted from target. It never looks at why the record diverged.

mod consumer;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::core::{Records, Store, TableEntity};
use crate::error::Result;

pub use consumer::RepairConsumer;

/// What a fix did to the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixOutcome {
    /// Base row written over target.
    Upserted { rows: u64 },
    /// Target row removed because base has none.
    Deleted { rows: u64 },
    /// Target already matched base; nothing written.
    Unchanged,
}

/// Overwrites `target` with `base`, one id at a time.
pub struct OverrideFixer<T> {
    base: Records<T>,
    target: Records<T>,
}

impl<T> Clone for OverrideFixer<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            target: self.target.clone(),
        }
    }
}

impl<T: TableEntity> OverrideFixer<T> {
    pub fn new(base: Arc<dyn Store>, target: Arc<dyn Store>) -> Self {
        Self {
            base: Records::new(base),
            target: Records::new(target),
        }
    }

    /// Make the target copy of `id` match the base copy.
    ///
    /// Idempotent: once `base.compare_to(&target)` holds, further calls
    /// write nothing.
    /// Errors are returned as-is; retrying is up to the caller.
    pub async fn fix(&self, id: i64) -> Result<FixOutcome> {
        let src = self.base.find_by_id(id).await?;
        let dst = self.target.find_by_id(id).await?;

        let outcome = match (src, dst) {
            (None, None) => FixOutcome::Unchanged,
            (None, Some(_)) => FixOutcome::Deleted {
                rows: self.target.delete_by_id(id).await?,
            },
            (Some(src), Some(dst)) if src.compare_to(&dst) => FixOutcome::Unchanged,
            (Some(src), _) => FixOutcome::Upserted {
                rows: self.target.upsert(&src).await?,
            },
        };
        debug!(table = T::TABLE, id, ?outcome, "Fixed record");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{memory_store, seed, Account, FlakyStore};

    #[tokio::test]
    async fn test_fix_copies_missing_row() {
        let base = memory_store().await;
        seed(&base, &[Account::new(1, "a", 5)]).await;
        let target = memory_store().await;
        let fixer = OverrideFixer::<Account>::new(base, target.clone());

        assert_eq!(fixer.fix(1).await.unwrap(), FixOutcome::Upserted { rows: 1 });
        let row = Records::<Account>::new(target).find_by_id(1).await.unwrap().unwrap();
        assert_eq!(row, Account::new(1, "a", 5));
    }

    #[tokio::test]
    async fn test_fix_overwrites_every_column() {
        let base = memory_store().await;
        seed(&base, &[Account::new(1, "new", 9)]).await;
        let target = memory_store().await;
        seed(&target, &[Account::new(1, "old", 3)]).await;
        let fixer = OverrideFixer::<Account>::new(base, target.clone());

        assert!(matches!(fixer.fix(1).await.unwrap(), FixOutcome::Upserted { .. }));
        let row = Records::<Account>::new(target).find_by_id(1).await.unwrap().unwrap();
        assert_eq!(row, Account::new(1, "new", 9));
    }

    #[tokio::test]
    async fn test_fix_deletes_row_missing_from_base() {
        let target = memory_store().await;
        seed(&target, &[Account::new(4, "orphan", 1)]).await;
        let fixer = OverrideFixer::<Account>::new(memory_store().await, target.clone());

        assert_eq!(fixer.fix(4).await.unwrap(), FixOutcome::Deleted { rows: 1 });
        assert_eq!(fixer.fix(4).await.unwrap(), FixOutcome::Unchanged);
        assert!(Records::<Account>::new(target).find_by_id(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_fix_writes_nothing() {
        let base = memory_store().await;
        seed(&base, &[Account::new(1, "a", 5)]).await;
        let target = FlakyStore::new(memory_store().await);
        let fixer = OverrideFixer::<Account>::new(base, target.clone());

        fixer.fix(1).await.unwrap();
        let writes = target.writes();
        assert_eq!(fixer.fix(1).await.unwrap(), FixOutcome::Unchanged);
        assert_eq!(target.writes(), writes);
    }

    #[tokio::test]
    async fn test_fix_ignores_fields_compare_to_ignores() {
        let base = memory_store().await;
        seed(&base, &[Account::new(1, "same", 9)]).await;
        let inner = memory_store().await;
        seed(&inner, &[Account::new(1, "same", 3)]).await;
        let target = FlakyStore::new(inner.clone());
        let fixer = OverrideFixer::<Account>::new(base, target.clone());

        assert_eq!(fixer.fix(1).await.unwrap(), FixOutcome::Unchanged);
        assert_eq!(target.writes(), 0);
        let row = Records::<Account>::new(inner).find_by_id(1).await.unwrap().unwrap();
        assert_eq!(row.utime, 3);
    }

    #[tokio::test]
    async fn test_fix_propagates_store_errors() {
        let base = FlakyStore::new(memory_store().await);
        base.set_down(true);
        let fixer = OverrideFixer::<Account>::new(base, memory_store().await);
        assert!(fixer.fix(1).await.is_err());
    }
}
