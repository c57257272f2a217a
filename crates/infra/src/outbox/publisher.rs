//! Outbox publisher: drains unpublished outbox rows to the broker.
//!
//! ## Guarantees
//!
//! - A row is marked published only after the broker acknowledged it.
//! - A refused row stays in the outbox with `attempts`, `last_error` and a
//!   `next_attempt_at` from the [`RetryPolicy`]; it is never deleted.
//! - Rows go out in insertion order. The first failure ends the pass, so a
//!   later row is never published ahead of an earlier one that is still failing.
//!
//! Together this is **at-least-once** delivery: a crash between the broker ack
//! and `mark_published` republishes the row with the same `event_id`, and
//! consumers deduplicate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use shopfloor_events::{EventEnvelope, MessageBroker};

use super::retry::RetryPolicy;
use crate::store::{OutboxStore, StoreError};

/// Publisher loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxPublisherConfig {
    poll_interval: Duration,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl OutboxPublisherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishPass {
    pub published: usize,
    pub failed: usize,
}

/// Publish every due outbox row, in order, until the first broker failure.
///
/// Store errors abort the pass and are returned; broker errors are recorded on
/// the row and end the pass normally.
pub fn publish_pending<S, B>(
    store: &S,
    broker: &B,
    config: &OutboxPublisherConfig,
    now: DateTime<Utc>,
) -> Result<PublishPass, StoreError>
where
    S: OutboxStore + ?Sized,
    B: MessageBroker<EventEnvelope<JsonValue>> + ?Sized,
{
    let mut pass = PublishPass::default();

    for row in store.fetch_due(config.batch_size, now)? {
        let topic = row.message.topic.clone();
        match broker.publish(&topic, row.to_envelope()) {
            Ok(()) => {
                store.mark_published(row.id(), Utc::now())?;
                pass.published += 1;
                debug!(
                    outbox_id = %row.id(),
                    topic = %topic,
                    event_type = %row.message.event_type,
                    "outbox row published"
                );
            }
            Err(err) => {
                let attempt = row.attempts.saturating_add(1);
                let delay = config.retry.delay_for_attempt(attempt);
                let next_attempt_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                store.record_failure(row.id(), &err.to_string(), next_attempt_at)?;
                pass.failed += 1;
                warn!(
                    outbox_id = %row.id(),
                    topic = %topic,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "outbox publish failed"
                );
                break;
            }
        }
    }

    Ok(pass)
}

/// Running totals of a publisher loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
    pub passes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
    passes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
        }
    }
}

/// Handle to stop and join the publisher thread.
#[derive(Debug)]
pub struct OutboxPublisherHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl OutboxPublisherHandle {
    pub fn stats(&self) -> PublisherStats {
        self.counters.snapshot()
    }

    /// Request graceful shutdown and wait for the current pass to finish.
    pub fn shutdown(mut self) -> PublisherStats {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("outbox publisher thread panicked");
            }
        }
        self.counters.snapshot()
    }
}

/// Background publisher loop.
#[derive(Debug)]
pub struct OutboxPublisher;

impl OutboxPublisher {
    /// Spawn a thread that runs [`publish_pending`] every `poll_interval`.
    pub fn spawn<S, B>(
        store: S,
        broker: B,
        config: OutboxPublisherConfig,
    ) -> std::io::Result<OutboxPublisherHandle>
    where
        S: OutboxStore + 'static,
        B: MessageBroker<EventEnvelope<JsonValue>> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let counters = Arc::new(Counters::default());
        let loop_counters = Arc::clone(&counters);

        let join = thread::Builder::new()
            .name("outbox-publisher".to_string())
            .spawn(move || publisher_loop(&store, &broker, &config, &shutdown_rx, &loop_counters))?;

        Ok(OutboxPublisherHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            counters,
        })
    }
}

fn publisher_loop<S, B>(
    store: &S,
    broker: &B,
    config: &OutboxPublisherConfig,
    shutdown_rx: &mpsc::Receiver<()>,
    counters: &Counters,
) where
    S: OutboxStore,
    B: MessageBroker<EventEnvelope<JsonValue>>,
{
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        batch_size = config.batch_size,
        "outbox publisher started"
    );

    loop {
        match publish_pending(store, broker, config, Utc::now()) {
            Ok(pass) => {
                counters.published.fetch_add(pass.published as u64, Ordering::Relaxed);
                counters.failed.fetch_add(pass.failed as u64, Ordering::Relaxed);
            }
            Err(err) => error!(error = %err, "outbox publisher pass failed"),
        }
        counters.passes.fetch_add(1, Ordering::Relaxed);

        match shutdown_rx.recv_timeout(config.poll_interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("outbox publisher stopped");
}
