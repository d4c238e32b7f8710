//! Divergence detection between the base and target stores.
//!
//! A [`Validator`] runs two scans concurrently:
//!
//! - **base → target**: walks base rows (by id in full mode, by
//!   `(utime, id)` in incremental mode) and looks each one up in target,
//!   reporting `TargetMissing` or `NotEqual`.
//! - **target → base**: walks target ids only and reports the ones base no
//!   longer has as `BaseMissing`.
//!
//! Both scans use keyset cursors. A read that fails is logged and the scan
//! steps past it; only cancellation stops a scan early, and that counts as
//! a clean return. A bounded scan whose own store keeps failing gives up
//! after `max_consecutive_errors` reads, and that error cancels the other
//! scan. A continuous scan backs off between failed reads instead.
//!
//! The incremental watermark never moves past a row whose event was not
//! published. Failed events are retried whenever the scan runs dry.
//!
//! Divergences are compared strictly as `base.compare_to(&target)`.

mod single;
mod types;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{Cursor, Entity, Records, Store, TableEntity, Watermark};
use crate::error::{with_timeout, MigrateError, Result};
use crate::events::{InconsistencyType, InconsistentEvent, Producer};

pub use types::{Mode, Strategy, ValidateStats, ValidatorConfig};

/// Compares one entity table across two stores.
pub struct Validator<T> {
    base: Records<T>,
    target: Records<T>,
    producer: Arc<dyn Producer>,
    config: ValidatorConfig,
    watermark: Arc<watch::Sender<Watermark>>,
}

impl<T> Clone for Validator<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            target: self.target.clone(),
            producer: Arc::clone(&self.producer),
            config: self.config.clone(),
            watermark: Arc::clone(&self.watermark),
        }
    }
}

/// Backoff doubles per consecutive failure up to `sleep_interval << 5`.
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Consecutive-failure counter for the store a scan walks.
struct ReadErrors {
    scan: &'static str,
    consecutive: u32,
    max: u32,
    /// Base backoff for continuous scans; `None` for bounded ones.
    backoff: Option<Duration>,
}

impl ReadErrors {
    fn new(scan: &'static str, config: &ValidatorConfig) -> Self {
        Self {
            scan,
            consecutive: 0,
            max: config.max_consecutive_errors,
            backoff: config.is_continuous().then_some(config.sleep_interval),
        }
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failed read. Returns how long to wait before the next one.
    ///
    /// A bounded scan errors out once the limit is reached.
    fn failed(&mut self, stats: &mut ValidateStats, err: MigrateError) -> Result<Option<Duration>> {
        stats.read_errors += 1;
        self.consecutive = self.consecutive.saturating_add(1);
        match self.backoff {
            Some(base) => {
                let wait = base.saturating_mul(1 << (self.consecutive - 1).min(MAX_BACKOFF_SHIFT));
                error!(
                    scan = self.scan,
                    consecutive = self.consecutive,
                    retry_in = ?wait,
                    error = %err,
                    "Read failed, skipping"
                );
                Ok(Some(wait))
            }
            None if self.consecutive >= self.max => Err(MigrateError::ScanAborted(format!(
                "{}: {} consecutive read errors, last: {}",
                self.scan, self.consecutive, err
            ))),
            None => {
                error!(scan = self.scan, error = %err, "Read failed, skipping");
                Ok(None)
            }
        }
    }
}

/// How a [`Validator::notify`] call ended.
enum Published {
    Sent,
    Failed(InconsistentEvent),
    Cancelled,
}

/// Events that failed to publish, and the cursor the watermark is held at
/// until they are delivered.
#[derive(Default)]
struct Unsent {
    events: Vec<InconsistentEvent>,
    held: Option<Cursor>,
}

impl Unsent {
    /// Keep `event` for redelivery and pin the watermark at `at` unless it
    /// is already pinned earlier.
    fn hold(&mut self, at: Cursor, event: InconsistentEvent) {
        self.held.get_or_insert(at);
        self.events.push(event);
    }

    /// Where the watermark may move to when the scan has reached `cursor`.
    fn mark(&self, cursor: Cursor) -> Cursor {
        self.held.unwrap_or(cursor)
    }
}

impl<T: TableEntity> Validator<T> {
    /// Create a validator treating `base` as authoritative.
    ///
    /// Every event carries `config.direction`.
    pub fn new(
        base: Arc<dyn Store>,
        target: Arc<dyn Store>,
        producer: Arc<dyn Producer>,
        config: ValidatorConfig,
    ) -> Self {
        let (watermark, _) = watch::channel(config.start);
        Self {
            base: Records::new(base),
            target: Records::new(target),
            producer,
            config,
            watermark: Arc::new(watermark),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Progress of the incremental base → target scan: the `(utime, id)` of
    /// the last base row fully checked.
    pub fn watermark(&self) -> watch::Receiver<Watermark> {
        self.watermark.subscribe()
    }

    /// Run both scans until they finish or `cancel` fires.
    ///
    /// Cancellation is a clean return. The first scan error cancels the
    /// other scan and is returned.
    pub async fn validate(&self, cancel: &CancellationToken) -> Result<ValidateStats> {
        let scans = cancel.child_token();
        info!(
            table = T::TABLE,
            direction = %self.config.direction,
            mode = %self.config.mode,
            strategy = %self.config.strategy,
            "Starting validation"
        );

        let mut set = JoinSet::new();
        let (forward, token) = (self.clone(), scans.clone());
        set.spawn(async move { forward.validate_base_to_target(&token).await });
        let (backward, token) = (self.clone(), scans.clone());
        set.spawn(async move { backward.validate_target_to_base(&token).await });

        let mut stats = ValidateStats::default();
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            let res = joined.map_err(|e| MigrateError::Task(e.to_string())).and_then(|r| r);
            match res {
                Ok(s) => stats.merge(&s),
                Err(e) => {
                    scans.cancel();
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                info!(
                    table = T::TABLE,
                    rows = stats.rows_checked,
                    ids = stats.ids_checked,
                    inconsistencies = stats.inconsistencies(),
                    "Validation finished"
                );
                Ok(stats)
            }
        }
    }

    /// The base → target scan alone.
    pub async fn validate_base_to_target(&self, cancel: &CancellationToken) -> Result<ValidateStats> {
        match self.config.strategy {
            Strategy::Row => self.base_to_target_rows(cancel).await,
            Strategy::Batch => self.base_to_target_batches(cancel).await,
        }
    }

    async fn base_to_target_rows(&self, cancel: &CancellationToken) -> Result<ValidateStats> {
        let mut stats = ValidateStats::default();
        let mut errors = ReadErrors::new("base -> target", &self.config);
        let mut unsent = Unsent::default();
        let mut cursor = self.config.start_cursor();
        let mut skip = 0u64;

        loop {
            let Some(fetched) = self.call(cancel, "read base row", self.base.next(cursor, skip)).await
            else {
                return Ok(stats);
            };
            let src = match fetched {
                Ok(Some(src)) => src,
                Ok(None) => {
                    if self.idle(cancel).await {
                        self.redeliver(cancel, &mut unsent, &mut stats).await;
                        self.checkpoint(unsent.mark(cursor));
                        continue;
                    }
                    return Ok(stats);
                }
                Err(e) => {
                    if let Some(wait) = errors.failed(&mut stats, e)? {
                        if !self.pause(cancel, wait).await {
                            return Ok(stats);
                        }
                    }
                    skip += 1;
                    continue;
                }
            };
            errors.reset();
            stats.rows_checked += 1;

            let Some(found) = self
                .call(cancel, "read target row", self.target.find_by_id(src.id()))
                .await
            else {
                return Ok(stats);
            };
            let kind = match found {
                Ok(None) => Some(InconsistencyType::TargetMissing),
                Ok(Some(dst)) if !src.compare_to(&dst) => Some(InconsistencyType::NotEqual),
                Ok(Some(_)) => None,
                Err(e) => {
                    stats.read_errors += 1;
                    error!(id = src.id(), error = %e, "base -> target: reading target failed");
                    None
                }
            };
            if let Some(kind) = kind {
                match self.notify(cancel, src.id(), kind, &mut stats).await {
                    Published::Sent => {}
                    Published::Failed(event) => unsent.hold(cursor, event),
                    Published::Cancelled => return Ok(stats),
                }
            }

            cursor = cursor.advance(&src);
            skip = 0;
            self.checkpoint(unsent.mark(cursor));
        }
    }

    async fn base_to_target_batches(&self, cancel: &CancellationToken) -> Result<ValidateStats> {
        let mut stats = ValidateStats::default();
        let mut errors = ReadErrors::new("base -> target", &self.config);
        let mut unsent = Unsent::default();
        let mut cursor = self.config.start_cursor();
        let mut skip = 0u64;
        let limit = self.config.batch_size;

        loop {
            let Some(fetched) = self
                .call(cancel, "read base page", self.base.page(cursor, skip, limit))
                .await
            else {
                return Ok(stats);
            };
            let srcs = match fetched {
                Ok(srcs) => srcs,
                Err(e) => {
                    if let Some(wait) = errors.failed(&mut stats, e)? {
                        if !self.pause(cancel, wait).await {
                            return Ok(stats);
                        }
                    }
                    skip += limit as u64;
                    continue;
                }
            };
            errors.reset();
            let Some(last) = srcs.last() else {
                if self.idle(cancel).await {
                    self.redeliver(cancel, &mut unsent, &mut stats).await;
                    self.checkpoint(unsent.mark(cursor));
                    continue;
                }
                return Ok(stats);
            };
            let next = cursor.advance(last);

            let ids: Vec<i64> = srcs.iter().map(Entity::id).collect();
            let Some(found) = self
                .call(cancel, "read target page", self.target.find_by_ids(&ids))
                .await
            else {
                return Ok(stats);
            };
            match found {
                Ok(dsts) => {
                    let dsts: HashMap<i64, T> = dsts.into_iter().map(|d| (d.id(), d)).collect();
                    for src in &srcs {
                        stats.rows_checked += 1;
                        let kind = match dsts.get(&src.id()) {
                            None => Some(InconsistencyType::TargetMissing),
                            Some(dst) if !src.compare_to(dst) => Some(InconsistencyType::NotEqual),
                            Some(_) => None,
                        };
                        let Some(kind) = kind else { continue };
                        match self.notify(cancel, src.id(), kind, &mut stats).await {
                            Published::Sent => {}
                            Published::Failed(event) => unsent.hold(cursor, event),
                            Published::Cancelled => return Ok(stats),
                        }
                    }
                }
                Err(e) => {
                    stats.read_errors += 1;
                    error!(
                        first_id = ids[0],
                        rows = ids.len(),
                        error = %e,
                        "base -> target: reading target page failed, skipping page"
                    );
                }
            }

            cursor = next;
            skip = 0;
            self.checkpoint(unsent.mark(cursor));
        }
    }

    /// The target → base scan alone.
    pub async fn validate_target_to_base(&self, cancel: &CancellationToken) -> Result<ValidateStats> {
        let mut stats = ValidateStats::default();
        let mut errors = ReadErrors::new("target -> base", &self.config);
        let mut after = i64::MIN;
        let mut skip = 0u64;
        let limit = self.config.batch_size;

        loop {
            let Some(fetched) = self
                .call(cancel, "read target ids", self.target.ids_after(after, skip, limit))
                .await
            else {
                return Ok(stats);
            };
            let ids = match fetched {
                Ok(ids) => ids,
                Err(e) => {
                    if let Some(wait) = errors.failed(&mut stats, e)? {
                        if !self.pause(cancel, wait).await {
                            return Ok(stats);
                        }
                    }
                    skip += limit as u64;
                    continue;
                }
            };
            errors.reset();
            let Some(&last) = ids.last() else {
                if self.idle(cancel).await {
                    continue;
                }
                return Ok(stats);
            };
            stats.ids_checked += ids.len() as u64;

            let Some(found) = self
                .call(cancel, "read base ids", self.base.existing_ids(&ids))
                .await
            else {
                return Ok(stats);
            };
            match found {
                Ok(existing) => {
                    for id in ids.iter().filter(|id| !existing.contains(id)) {
                        let kind = InconsistencyType::BaseMissing;
                        let published = self.notify(cancel, *id, kind, &mut stats).await;
                        if matches!(published, Published::Cancelled) {
                            return Ok(stats);
                        }
                    }
                }
                Err(e) => {
                    stats.read_errors += 1;
                    error!(
                        first_id = ids[0],
                        rows = ids.len(),
                        error = %e,
                        "target -> base: reading base failed, skipping page"
                    );
                }
            }

            after = last;
            skip = 0;
        }
    }

    /// Run one store call under the per-call timeout. `None` means the scan
    /// was cancelled.
    async fn call<R, F>(&self, cancel: &CancellationToken, op: &str, fut: F) -> Option<Result<R>>
    where
        F: Future<Output = Result<R>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = with_timeout(op, self.config.call_timeout, fut) => Some(res),
        }
    }

    /// Called when a scan finds nothing new. Returns `true` to poll again.
    async fn idle(&self, cancel: &CancellationToken) -> bool {
        if !self.config.is_continuous() {
            return false;
        }
        debug!(interval = ?self.config.sleep_interval, "No new rows, sleeping");
        self.pause(cancel, self.config.sleep_interval).await
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, cancel: &CancellationToken, wait: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    fn checkpoint(&self, cursor: Cursor) {
        if let Cursor::Modified(mark) = cursor {
            self.watermark.send_replace(mark);
        }
    }

    /// Record and publish an event. Failures are logged and counted, never
    /// returned.
    async fn notify(
        &self,
        cancel: &CancellationToken,
        id: i64,
        kind: InconsistencyType,
        stats: &mut ValidateStats,
    ) -> Published {
        stats.record(kind);
        let event = InconsistentEvent::new(id, self.config.direction, kind);
        self.publish(cancel, event, stats).await
    }

    async fn publish(
        &self,
        cancel: &CancellationToken,
        event: InconsistentEvent,
        stats: &mut ValidateStats,
    ) -> Published {
        let sent = self
            .call(
                cancel,
                "publish inconsistency event",
                self.producer.produce_inconsistent_event(&event),
            )
            .await;
        match sent {
            Some(Ok(())) => {
                debug!(id = event.id, kind = %event.kind, "Inconsistency reported");
                Published::Sent
            }
            Some(Err(e)) => {
                stats.publish_failures += 1;
                error!(
                    id = event.id,
                    kind = %event.kind,
                    error = %e,
                    "Failed to publish inconsistency event"
                );
                Published::Failed(event)
            }
            None => {
                warn!(
                    id = event.id,
                    kind = %event.kind,
                    "Cancelled before inconsistency event was published"
                );
                Published::Cancelled
            }
        }
    }

    /// Retry events held back by failed publishes. The hold is released
    /// once every one of them is delivered.
    async fn redeliver(
        &self,
        cancel: &CancellationToken,
        unsent: &mut Unsent,
        stats: &mut ValidateStats,
    ) {
        while let Some(&event) = unsent.events.last() {
            match self.publish(cancel, event, stats).await {
                Published::Sent => {
                    unsent.events.pop();
                }
                Published::Failed(_) | Published::Cancelled => return,
            }
        }
        if unsent.held.take().is_some() {
            info!("Held inconsistency events delivered, watermark released");
        }
    }
}
