//! In-memory broker for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};

use tracing::{debug, warn};

use crate::broker::{Acknowledger, Delivery, MessageBroker, Subscription};

/// Default number of deliveries before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBrokerError {
    /// The broker refused the message (simulated outage).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Publish failed due to internal lock poisoning.
    #[error("broker state poisoned")]
    Poisoned,
}

struct Topic<M> {
    subscribers: Vec<mpsc::Sender<Delivery<M>>>,
    /// Messages published while nobody was subscribed.
    backlog: Vec<M>,
    published: Vec<M>,
    dead_letters: Vec<M>,
    acked: usize,
}

impl<M> Default for Topic<M> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            backlog: Vec::new(),
            published: Vec::new(),
            dead_letters: Vec::new(),
            acked: 0,
        }
    }
}

struct Shared<M> {
    topics: HashMap<String, Topic<M>>,
    available: bool,
}

impl<M> Shared<M> {
    fn topic_mut(&mut self, topic: &str) -> &mut Topic<M> {
        self.topics.entry(topic.to_string()).or_default()
    }
}

/// In-memory topic broker.
///
/// - No IO / no async
/// - Fan-out: every subscriber of a topic receives every message
/// - A nack redelivers to the same subscriber until `max_deliveries`, then dead-letters
/// - Messages published before anyone subscribes are kept and handed to the first subscriber
pub struct InMemoryBroker<M> {
    shared: Arc<Mutex<Shared<M>>>,
    max_deliveries: u32,
}

impl<M> InMemoryBroker<M>
where
    M: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::with_max_deliveries(DEFAULT_MAX_DELIVERIES)
    }

    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                topics: HashMap::new(),
                available: true,
            })),
            max_deliveries: max_deliveries.max(1),
        }
    }

    /// Toggle a simulated outage: while unavailable every publish is nacked.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.available = available;
        }
    }

    /// Every message accepted on `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<M> {
        self.read_topic(topic, |t| t.published.clone())
    }

    /// Messages that exhausted their deliveries on `topic`.
    pub fn dead_letters(&self, topic: &str) -> Vec<M> {
        self.read_topic(topic, |t| t.dead_letters.clone())
    }

    pub fn acked(&self, topic: &str) -> usize {
        self.read_topic(topic, |t| t.acked)
    }

    fn read_topic<T: Default>(&self, topic: &str, f: impl FnOnce(&Topic<M>) -> T) -> T {
        self.shared
            .lock()
            .ok()
            .and_then(|shared| shared.topics.get(topic).map(f))
            .unwrap_or_default()
    }

    fn delivery(
        &self,
        topic: &str,
        message: M,
        attempt: u32,
        redeliver: mpsc::Sender<Delivery<M>>,
    ) -> Delivery<M> {
        let acker = InMemoryAck {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            message: message.clone(),
            attempt,
            max_deliveries: self.max_deliveries,
            redeliver,
        };
        Delivery::new(message, attempt, Box::new(acker))
    }
}

impl<M> Default for InMemoryBroker<M>
where
    M: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> core::fmt::Debug for InMemoryBroker<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("max_deliveries", &self.max_deliveries)
            .finish_non_exhaustive()
    }
}

impl<M> MessageBroker<M> for InMemoryBroker<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBrokerError;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        let mut shared = self.shared.lock().map_err(|_| InMemoryBrokerError::Poisoned)?;
        if !shared.available {
            return Err(InMemoryBrokerError::Unavailable(format!(
                "topic {topic} is not accepting messages"
            )));
        }

        let senders = {
            let t = shared.topic_mut(topic);
            t.published.push(message.clone());
            t.subscribers.clone()
        };

        // Dead subscribers are dropped while publishing.

        let mut delivered = 0usize;
        let mut live = Vec::with_capacity(senders.len());
        for tx in senders {
            let delivery = self.delivery(topic, message.clone(), 1, tx.clone());
            if tx.send(delivery).is_ok() {
                delivered += 1;
                live.push(tx);
            }
        }

        let t = shared.topic_mut(topic);
        t.subscribers = live;
        if delivered == 0 {
            t.backlog.push(message);
        }

        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut shared) = self.shared.lock() {
            let backlog = {
                let t = shared.topic_mut(topic);
                t.subscribers.push(tx.clone());
                std::mem::take(&mut t.backlog)
            };
            for message in backlog {
                let delivery = self.delivery(topic, message, 1, tx.clone());
                let _ = tx.send(delivery);
            }
        }

        Subscription::new(rx)
    }
}

struct InMemoryAck<M> {
    shared: Arc<Mutex<Shared<M>>>,
    topic: String,
    message: M,
    attempt: u32,
    max_deliveries: u32,
    redeliver: mpsc::Sender<Delivery<M>>,
}

impl<M> Acknowledger for InMemoryAck<M>
where
    M: Clone + Send + 'static,
{
    fn ack(self: Box<Self>) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.topic_mut(&self.topic).acked += 1;
        }
    }

    fn nack(self: Box<Self>, reason: &str) {
        let InMemoryAck {
            shared,
            topic,
            message,
            attempt,
            max_deliveries,
            redeliver,
        } = *self;

        if attempt >= max_deliveries {
            warn!(topic = %topic, attempt, reason, "delivery attempts exhausted, dead-lettering message");
            if let Ok(mut shared) = shared.lock() {
                shared.topic_mut(&topic).dead_letters.push(message);
            }
            return;
        }

        debug!(topic = %topic, attempt, reason, "message nacked, redelivering");
        let next = InMemoryAck {
            shared: Arc::clone(&shared),
            topic: topic.clone(),
            message: message.clone(),
            attempt: attempt + 1,
            max_deliveries,
            redeliver: redeliver.clone(),
        };
        let delivery = Delivery::new(message, attempt + 1, Box::new(next));

        if let Err(mpsc::SendError(undelivered)) = redeliver.send(delivery) {
            // Subscriber is gone; park the message for the next one.
            if let Ok(mut shared) = shared.lock() {
                shared.topic_mut(&topic).backlog.push(undelivered.into_message());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TOPIC: &str = "test.topic";

    fn next(sub: &Subscription<u32>) -> Delivery<u32> {
        sub.recv_timeout(Duration::from_secs(1)).expect("delivery")
    }

    #[test]
    fn publish_fans_out_to_subscribers() {
        let broker = InMemoryBroker::<u32>::new();
        let a = broker.subscribe(TOPIC);
        let b = broker.subscribe(TOPIC);

        broker.publish(TOPIC, 7).unwrap();

        assert_eq!(*next(&a).message(), 7);
        assert_eq!(*next(&b).message(), 7);
        assert_eq!(broker.published(TOPIC), vec![7]);
    }

    #[test]
    fn messages_published_before_subscribe_are_not_lost() {
        let broker = InMemoryBroker::<u32>::new();
        broker.publish(TOPIC, 1).unwrap();
        broker.publish(TOPIC, 2).unwrap();

        let sub = broker.subscribe(TOPIC);

        assert_eq!(*next(&sub).message(), 1);
        assert_eq!(*next(&sub).message(), 2);
    }

    #[test]
    fn nack_redelivers_then_dead_letters() {
        let broker = InMemoryBroker::<u32>::with_max_deliveries(2);
        let sub = broker.subscribe(TOPIC);
        broker.publish(TOPIC, 9).unwrap();

        let first = next(&sub);
        assert_eq!(first.attempt(), 1);
        first.nack("boom");

        let second = next(&sub);
        assert_eq!(second.attempt(), 2);
        second.nack("boom again");

        assert!(sub.try_recv().is_err());
        assert_eq!(broker.dead_letters(TOPIC), vec![9]);
    }

    #[test]
    fn ack_is_counted() {
        let broker = InMemoryBroker::<u32>::new();
        let sub = broker.subscribe(TOPIC);
        broker.publish(TOPIC, 3).unwrap();

        next(&sub).ack();

        assert_eq!(broker.acked(TOPIC), 1);
    }

    #[test]
    fn unavailable_broker_nacks_publish() {
        let broker = InMemoryBroker::<u32>::new();
        broker.set_available(false);

        let err = broker.publish(TOPIC, 1).unwrap_err();
        assert!(matches!(err, InMemoryBrokerError::Unavailable(_)));
        assert!(broker.published(TOPIC).is_empty());

        broker.set_available(true);
        assert!(broker.publish(TOPIC, 1).is_ok());
    }
}
