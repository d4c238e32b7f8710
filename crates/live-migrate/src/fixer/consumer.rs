//! Bridges inconsistency events to the fixers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::core::{Store, TableEntity};
use crate::error::{with_timeout, Result};
use crate::events::{Direction, EventHandler, InconsistentEvent};

use super::{FixOutcome, OverrideFixer};

/// Repairs records named by inconsistency events.
///
/// The repair side is chosen by the event's direction alone: `SRC` copies
/// base over target, `DST` copies target over base. The event type is only
/// logged.
pub struct RepairConsumer<T> {
    src_first: OverrideFixer<T>,
    dst_first: OverrideFixer<T>,
    call_timeout: Duration,
}

impl<T: TableEntity> RepairConsumer<T> {
    pub fn new(src: Arc<dyn Store>, dst: Arc<dyn Store>) -> Self {
        Self {
            src_first: OverrideFixer::new(Arc::clone(&src), Arc::clone(&dst)),
            dst_first: OverrideFixer::new(dst, src),
            call_timeout: Duration::from_secs(1),
        }
    }

    /// Bound each fix by `timeout` instead of one second.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The fixer that treats `direction` as authoritative.
    pub fn fixer(&self, direction: Direction) -> &OverrideFixer<T> {
        match direction {
            Direction::Src => &self.src_first,
            Direction::Dst => &self.dst_first,
        }
    }

    /// Repair the record named by `event`.
    pub async fn consume(&self, event: &InconsistentEvent) -> Result<FixOutcome> {
        let fixer = self.fixer(event.direction);
        let outcome = with_timeout("fix", self.call_timeout, fixer.fix(event.id)).await?;
        info!(
            id = event.id,
            direction = %event.direction,
            kind = %event.kind,
            ?outcome,
            "Inconsistency repaired"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl<T: TableEntity> EventHandler for RepairConsumer<T> {
    async fn handle(&self, event: InconsistentEvent) -> Result<()> {
        self.consume(&event).await.map(|_| ())
    }
}
