//! The best-effort leg of a dual write.
//!
//! Every method here returns `()`: a mirrored statement's outcome is logged
//! and dropped, so it cannot leak into what the caller of the pool sees.

use tracing::{debug, error};

use crate::core::{SqlValue, Store, Transaction};

use super::pattern::Side;

/// Non-transactional mirror writes against the secondary store.
pub(crate) struct Mirror<'a> {
    side: Side,
    store: &'a dyn Store,
}

impl<'a> Mirror<'a> {
    pub(crate) fn new(side: Side, store: &'a dyn Store) -> Self {
        Self { side, store }
    }

    pub(crate) async fn exec(&self, sql: &str, args: &[SqlValue]) {
        if let Err(e) = self.store.exec(sql, args).await {
            error!(side = self.side.as_str(), sql, error = %e, "Mirrored write failed");
        }
    }
}

/// The secondary transaction of a dual-write transaction, if one was opened.
pub(crate) struct MirrorTx {
    side: Option<Side>,
    tx: Option<Box<dyn Transaction>>,
}

impl MirrorTx {
    /// No secondary leg.
    pub(crate) fn none() -> Self {
        Self { side: None, tx: None }
    }

    /// Try to open a transaction on the secondary store.
    pub(crate) async fn begin(side: Side, store: &dyn Store) -> Self {
        match store.begin().await {
            Ok(tx) => Self {
                side: Some(side),
                tx: Some(tx),
            },
            Err(e) => {
                error!(
                    side = side.as_str(),
                    error = %e,
                    "Failed to open secondary transaction; writes will not be mirrored"
                );
                Self {
                    side: Some(side),
                    tx: None,
                }
            }
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    fn side(&self) -> &'static str {
        self.side.map_or("none", Side::as_str)
    }

    pub(crate) async fn exec(&mut self, sql: &str, args: &[SqlValue]) {
        let side = self.side();
        if let Some(tx) = self.tx.as_mut() {
            if let Err(e) = tx.exec(sql, args).await {
                error!(side, sql, error = %e, "Mirrored write failed inside transaction");
            }
        }
    }

    pub(crate) async fn commit(self) {
        let side = self.side();
        if let Some(tx) = self.tx {
            match tx.commit().await {
                Ok(()) => debug!(side, "Secondary transaction committed"),
                Err(e) => error!(side, error = %e, "Secondary commit failed"),
            }
        }
    }

    pub(crate) async fn rollback(self) {
        let side = self.side();
        if let Some(tx) = self.tx {
            if let Err(e) = tx.rollback().await {
                error!(side, error = %e, "Secondary rollback failed");
            }
        }
    }
}
