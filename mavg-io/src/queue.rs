use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use mavg_core::{decode_record, metrics, Context, Error, Event, Result, Source};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A message as handed out by a queue. `receipt_handle` is what deletion needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: Option<String>,
    pub receipt_handle: Option<String>,
    pub body: Option<String>,
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// One poll. May block up to the queue's long-poll wait time; an empty vec means no messages.
    async fn receive(&self) -> Result<Vec<QueueMessage>>;
    async fn delete(&self, message: &QueueMessage) -> Result<()>;
}

/// Exponential backoff with jitter in `[delay / 2, delay]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self
            .initial
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        let ms = ceiling.as_millis() as u64;
        if ms == 0 {
            return ceiling;
        }
        Duration::from_millis(rand::rng().random_range(ms / 2..=ms))
    }
}

/// Unbounded poll loop over a `Queue`.
///
/// Each message is decoded, aggregated and stored through the context, and only then
/// deleted (at-least-once). Failures are logged per message and never stop the loop;
/// a message that fails to decode or process stays on the queue until its visibility
/// timeout expires. Ids of aggregated messages are remembered so a redelivery caused by
/// a failed delete is deleted again instead of being counted twice. The loop ends when
/// the cancellation token fires.
pub struct QueueSource<Q> {
    queue: Q,
    cancel: CancellationToken,
    backoff: Backoff,
    seen: Option<LruCache<String, ()>>,
}

impl<Q: Queue> QueueSource<Q> {
    pub fn new(queue: Q, cancel: CancellationToken) -> Self {
        Self {
            queue,
            cancel,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
            seen: NonZeroUsize::new(1024).map(LruCache::new),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(initial, max);
        self
    }

    /// Number of recently aggregated message ids to remember; 0 disables redelivery detection.
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.seen = NonZeroUsize::new(capacity).map(LruCache::new);
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Sleep for the next backoff delay. Returns false if cancelled meanwhile.
    async fn pause(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn ack(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.delete(message).await {
            metrics::QUEUE_ERRORS.with_label_values(&["delete"]).inc();
            error!(id = ?message.id, error = %e, "could not delete from queue");
        }
    }

    fn already_seen(&mut self, message: &QueueMessage) -> bool {
        match (self.seen.as_mut(), message.id.as_ref()) {
            (Some(seen), Some(id)) => seen.get(id).is_some(),
            _ => false,
        }
    }

    async fn handle(&mut self, ctx: &mut dyn Context, message: QueueMessage) {
        let origin = format!("queue message {}", message.id.as_deref().unwrap_or("<no id>"));
        let Some(body) = message.body.as_deref() else {
            warn!(%origin, "message without body skipped");
            return;
        };

        if self.already_seen(&message) {
            debug!(%origin, "redelivered message already aggregated; deleting again");
            self.ack(&message).await;
            return;
        }

        let record = match decode_record(body.as_bytes()) {
            Ok(r) => r,
            Err(source) => {
                // TODO: route undecodable messages to a dead-letter queue instead of
                // waiting for the visibility timeout
                metrics::DECODE_FAILURES.with_label_values(&["queue"]).inc();
                let err = Error::Decode { origin, source };
                error!(error = %err, "error decoding message; left on the queue");
                return;
            }
        };

        if let Err(e) = ctx.collect(Event::from(record)).await {
            error!(%origin, error = %e, "could not process message");
            return;
        }
        if let (Some(seen), Some(id)) = (self.seen.as_mut(), message.id.clone()) {
            seen.put(id, ());
        }
        self.ack(&message).await;
    }
}

#[async_trait]
impl<Q: Queue + 'static> Source for QueueSource<Q> {
    async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
        info!("message poller starting");
        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = self.queue.receive() => r,
            };
            match polled {
                Ok(batch) if batch.is_empty() => {
                    metrics::EMPTY_POLLS.inc();
                    debug!("no messages found");
                    if !self.pause().await {
                        break;
                    }
                }
                Ok(batch) => {
                    self.backoff.reset();
                    info!(quantity = batch.len(), "read messages from queue");
                    for message in batch {
                        self.handle(ctx, message).await;
                    }
                }
                Err(e) => {
                    metrics::QUEUE_ERRORS.with_label_values(&["receive"]).inc();
                    error!(error = %e, "unexpected error when reading queue");
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }
        info!("message poller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_to_the_cap_and_resets() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000));
        let first = b.next_delay();
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
        for _ in 0..10 {
            assert!(b.next_delay() <= Duration::from_millis(1_000));
        }
        let capped = b.next_delay();
        assert!(capped >= Duration::from_millis(500));
        b.reset();
        assert!(b.next_delay() <= Duration::from_millis(100));
    }

    #[test]
    fn zero_backoff_never_sleeps() {
        let mut b = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(b.next_delay(), Duration::ZERO);
        assert_eq!(b.next_delay(), Duration::ZERO);
    }
}
