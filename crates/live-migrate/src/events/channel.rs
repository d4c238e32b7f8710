//! In-process transport for inconsistency events.
//!
//! A bounded `mpsc` channel carrying encoded events. The consumer gives each
//! event at-least-once handling: a failed handler call is redelivered with
//! exponential backoff (`base_delay * 2^(attempt - 1)`) until
//! `max_attempts` is reached, then the event is logged and dropped.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{MigrateError, Result};

use super::{EventHandler, InconsistentEvent, Producer};

/// Default number of delivery attempts per event.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first redelivery.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Redelivery policy for the consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first redelivery.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Backoff before redelivery number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Counters for one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeStats {
    pub received: u64,
    pub handled: u64,
    pub redelivered: u64,
    pub dropped: u64,
    pub undecodable: u64,
}

/// Create a bounded in-process channel.
pub fn channel(capacity: usize) -> (ChannelProducer, ChannelConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelProducer { tx },
        ChannelConsumer {
            rx,
            retry: RetryPolicy::default(),
        },
    )
}

/// Sending half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelProducer {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelProducer {
    /// Send an already-encoded payload, waiting for capacity.
    pub async fn publish_raw(&self, payload: Vec<u8>) -> Result<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| MigrateError::Transport("event channel closed".into()))
    }
}

#[async_trait]
impl Producer for ChannelProducer {
    async fn produce_inconsistent_event(&self, event: &InconsistentEvent) -> Result<()> {
        self.publish_raw(event.encode()?).await
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct ChannelConsumer {
    rx: mpsc::Receiver<Vec<u8>>,
    retry: RetryPolicy,
}

impl ChannelConsumer {
    /// Replace the redelivery policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Feed every event to `handler` until all producers are dropped or
    /// `cancel` fires.
    pub async fn run(mut self, handler: &dyn EventHandler, cancel: &CancellationToken) -> ConsumeStats {
        let mut stats = ConsumeStats::default();

        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(payload) => payload,
                    None => break,
                },
            };
            stats.received += 1;

            let event = match InconsistentEvent::decode(&payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        payload = %String::from_utf8_lossy(&payload),
                        error = %e,
                        "Skipping undecodable inconsistency event"
                    );
                    stats.undecodable += 1;
                    continue;
                }
            };

            if !self.deliver(handler, event, cancel, &mut stats).await {
                break;
            }
        }

        debug!(?stats, "Event consumer stopped");
        stats
    }

    /// Returns `false` when cancelled during backoff.
    async fn deliver(
        &self,
        handler: &dyn EventHandler,
        event: InconsistentEvent,
        cancel: &CancellationToken,
        stats: &mut ConsumeStats,
    ) -> bool {
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let err = match handler.handle(event).await {
                Ok(()) => {
                    stats.handled += 1;
                    return true;
                }
                Err(e) => e,
            };

            if attempt == max_attempts {
                error!(
                    id = event.id,
                    direction = %event.direction,
                    kind = %event.kind,
                    attempts = attempt,
                    error = %err,
                    "Dropping inconsistency event after repeated failures"
                );
                stats.dropped += 1;
                return true;
            }

            let delay = self.retry.delay(attempt);
            warn!(
                id = event.id,
                direction = %event.direction,
                attempt,
                error = %err,
                "Event handling failed, redelivering in {:?}",
                delay
            );
            stats.redelivered += 1;
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::events::{Direction, InconsistencyType};

    #[derive(Default)]
    struct Recorder {
        fail_first: u32,
        calls: AtomicU32,
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: InconsistentEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(MigrateError::Transport("boom".into()));
            }
            self.seen.lock().unwrap().push(event.id);
            Ok(())
        }
    }

    fn event(id: i64) -> InconsistentEvent {
        InconsistentEvent::new(id, Direction::Src, InconsistencyType::TargetMissing)
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_consumer_drains_until_producers_drop() {
        let (producer, consumer) = channel(8);
        for id in 1..=3 {
            producer.produce_inconsistent_event(&event(id)).await.unwrap();
        }
        producer.publish_raw(b"not json".to_vec()).await.unwrap();
        drop(producer);

        let handler = Recorder::default();
        let stats = consumer.run(&handler, &CancellationToken::new()).await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(stats.received, 4);
        assert_eq!(stats.handled, 3);
        assert_eq!(stats.undecodable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_event_is_redelivered() {
        let (producer, consumer) = channel(8);
        producer.produce_inconsistent_event(&event(9)).await.unwrap();
        drop(producer);

        let handler = Recorder {
            fail_first: 2,
            ..Default::default()
        };
        let stats = consumer
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
            })
            .run(&handler, &CancellationToken::new())
            .await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![9]);
        assert_eq!(stats.redelivered, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_dropped_after_max_attempts() {
        let (producer, consumer) = channel(8);
        producer.produce_inconsistent_event(&event(5)).await.unwrap();
        drop(producer);

        let handler = Recorder {
            fail_first: u32::MAX,
            ..Default::default()
        };
        let stats = consumer.run(&handler, &CancellationToken::new()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.handled, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_consumer() {
        let (_producer, consumer) = channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = consumer.run(&Recorder::default(), &cancel).await;
        assert_eq!(stats, ConsumeStats::default());
    }

    #[tokio::test]
    async fn test_publish_after_consumer_drop_fails() {
        let (producer, consumer) = channel(1);
        drop(consumer);
        let err = producer.publish_raw(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, MigrateError::Transport(_)));
    }
}
