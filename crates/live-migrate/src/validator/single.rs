//! Validation of a single record, for feeds that already know which id
//! changed (binlog consumers and similar).

use tracing::debug;

use crate::core::{Entity, TableEntity};
use crate::error::{with_timeout, Result};
use crate::events::{InconsistencyType, InconsistentEvent};

use super::Validator;

impl<T: TableEntity> Validator<T> {
    /// Compare one id across both stores and publish the divergence, if any.
    ///
    /// Unlike the scans, read and publish errors are returned so the caller
    /// can redeliver the change notification.
    pub async fn validate_id(&self, id: i64) -> Result<Option<InconsistencyType>> {
        let timeout = self.config.call_timeout;
        let src = with_timeout("read base row", timeout, self.base.find_by_id(id)).await?;
        let dst = with_timeout("read target row", timeout, self.target.find_by_id(id)).await?;

        let kind = match (src, dst) {
            (None, None) => None,
            (Some(_), None) => Some(InconsistencyType::TargetMissing),
            (None, Some(_)) => Some(InconsistencyType::BaseMissing),
            (Some(src), Some(dst)) => {
                (!src.compare_to(&dst)).then_some(InconsistencyType::NotEqual)
            }
        };

        if let Some(kind) = kind {
            let event = InconsistentEvent::new(id, self.config.direction, kind);
            with_timeout(
                "publish inconsistency event",
                timeout,
                self.producer.produce_inconsistent_event(&event),
            )
            .await?;
            debug!(id, kind = %kind, "Inconsistency reported");
        }
        Ok(kind)
    }
}
