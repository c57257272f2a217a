use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use shopfloor_events::{Delivery, EventEnvelope, IntegrationEvent, MessageBroker, Subscription};

use crate::choreography::{INTEGRATION_TOPICS, build_integration_bus};
use crate::command_dispatcher::{ChoreographyContext, IntegrationEventBus};

/// Consumer loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationConsumerConfig {
    /// How long one receive waits before the loop re-checks for shutdown.
    poll_interval: Duration,
}

impl Default for IntegrationConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl IntegrationConsumerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Running totals of a consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
        }
    }
}

/// Handle to stop and join the consumer threads (one per topic).
#[derive(Debug)]
pub struct IntegrationConsumerHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl IntegrationConsumerHandle {
    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Stop pulling new deliveries, let the in-flight one finish, and join.
    pub fn shutdown(self) -> ConsumerStats {
        self.shutdown.store(true, Ordering::SeqCst);
        for join in self.joins {
            if join.join().is_err() {
                error!("integration consumer thread panicked");
            }
        }
        self.counters.snapshot()
    }
}

/// Integration event consumer.
///
/// - Subscribes to every topic of the integration table
/// - Decodes each delivery and runs the mapped handler (which issues a command)
/// - Acks only after the handler succeeded; nacks otherwise so the broker redelivers
///
/// Deliveries are at-least-once. Handlers guard against duplicates themselves.
#[derive(Debug)]
pub struct IntegrationConsumer;

impl IntegrationConsumer {
    pub fn spawn<B, D>(
        broker: B,
        dispatcher: Arc<D>,
        config: IntegrationConsumerConfig,
    ) -> std::io::Result<IntegrationConsumerHandle>
    where
        B: MessageBroker<EventEnvelope<JsonValue>>,
        D: ChoreographyContext + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let routes = Arc::new(build_integration_bus());

        let mut handle = IntegrationConsumerHandle {
            shutdown: Arc::clone(&shutdown),
            joins: Vec::with_capacity(INTEGRATION_TOPICS.len()),
            counters: Arc::clone(&counters),
        };

        for &topic in INTEGRATION_TOPICS {
            let subscription = broker.subscribe(topic);
            let worker = TopicWorker {
                topic,
                subscription,
                routes: Arc::clone(&routes),
                dispatcher: Arc::clone(&dispatcher),
                shutdown: Arc::clone(&shutdown),
                counters: Arc::clone(&counters),
                poll_interval: config.poll_interval,
            };

            let spawned = thread::Builder::new()
                .name(format!("consumer:{topic}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(join) => handle.joins.push(join),
                Err(err) => {
                    // Stop the threads already running before reporting.
                    handle.shutdown();
                    return Err(err);
                }
            }
        }

        Ok(handle)
    }
}

struct TopicWorker<D> {
    topic: &'static str,
    subscription: Subscription<EventEnvelope<JsonValue>>,
    routes: Arc<IntegrationEventBus>,
    dispatcher: Arc<D>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    poll_interval: Duration,
}

impl<D: ChoreographyContext + 'static> TopicWorker<D> {
    fn run(self) {
        info!(topic = self.topic, "integration consumer started");

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.subscription.recv_timeout(self.poll_interval) {
                Ok(delivery) => self.process(delivery),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(topic = self.topic, "subscription closed");
                    break;
                }
            }
        }

        info!(topic = self.topic, "integration consumer stopped");
    }

    fn process(&self, delivery: Delivery<EventEnvelope<JsonValue>>) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let message_id = delivery.message().event_id();
        let attempt = delivery.attempt();

        let event = match serde_json::from_value::<IntegrationEvent>(delivery.message().payload().clone())
        {
            Ok(event) => event,
            Err(err) => {
                warn!(topic = self.topic, %message_id, attempt, error = %err, "undecodable integration event");
                self.nack(delivery, &format!("undecodable payload: {err}"));
                return;
            }
        };
        let envelope = delivery.message().clone().map(|_| event);

        let report = self
            .routes
            .deliver(&envelope, &*self.dispatcher as &dyn ChoreographyContext);

        if report.handled == 0 {
            warn!(
                topic = self.topic,
                %message_id,
                event_type = envelope.event_type(),
                "no handler for integration event, acknowledging"
            );
        }

        match report.failures.into_iter().next() {
            None => {
                debug!(topic = self.topic, %message_id, attempt, "integration event handled");
                self.counters.acked.fetch_add(1, Ordering::Relaxed);
                delivery.ack();
            }
            Some(failure) => {
                warn!(
                    topic = self.topic,
                    %message_id,
                    attempt,
                    handler = failure.handler,
                    error = %failure.error,
                    retryable = failure.error.is_retryable(),
                    "integration handler failed, nacking"
                );
                self.nack(delivery, &failure.error.to_string());
            }
        }
    }

    fn nack(&self, delivery: Delivery<EventEnvelope<JsonValue>>, reason: &str) {
        self.counters.nacked.fetch_add(1, Ordering::Relaxed);
        delivery.nack(reason);
    }
}
