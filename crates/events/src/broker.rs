//! Message broker boundary (publish with ack, subscribe with per-message ack).
//!
//! Integration events leave the process through a broker. The contract is small:
//!
//! - `publish(topic, message)` returns `Ok(())` only once the broker has accepted
//!   the message (ack); any error is a nack and the caller keeps the message.
//! - `subscribe(topic)` yields [`Delivery`] values. A consumer acks a delivery only
//!   after it has fully processed it; a nack (or an explicit retry) makes the broker
//!   redeliver it, so consumers see **at-least-once** delivery and must be idempotent.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Settles a single delivery with the broker that produced it.
pub trait Acknowledger: Send {
    fn ack(self: Box<Self>);

    fn nack(self: Box<Self>, reason: &str);
}

/// One message handed to a subscriber, together with its ack handle.
pub struct Delivery<M> {
    message: M,
    attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl<M> Delivery<M> {
    pub fn new(message: M, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            attempt,
            acker,
        }
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    /// 1 for the first delivery, incremented on each redelivery.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Drop the ack handle and keep the message (the broker is never settled).
    pub fn into_message(self) -> M {
        self.message
    }

    pub fn ack(self) {
        self.acker.ack();
    }

    pub fn nack(self, reason: &str) {
        self.acker.nack(reason);
    }
}

impl<M: core::fmt::Debug> core::fmt::Debug for Delivery<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// A subscription to one topic.
///
/// Designed for single-threaded consumption; poll with `recv_timeout` so the
/// consuming loop can observe shutdown between messages.
pub struct Subscription<M> {
    receiver: Receiver<Delivery<M>>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<Delivery<M>>) -> Self {
        Self { receiver }
    }

    /// Block until the next delivery is available.
    pub fn recv(&self) -> Result<Delivery<M>, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delivery without blocking.
    pub fn try_recv(&self) -> Result<Delivery<M>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a delivery.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Delivery<M>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl<M> core::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Topic-based message broker.
pub trait MessageBroker<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    /// Publish and wait for the broker's acknowledgment.
    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self, topic: &str) -> Subscription<M>;
}

impl<M, B> MessageBroker<M> for Arc<B>
where
    B: MessageBroker<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: &str) -> Subscription<M> {
        (**self).subscribe(topic)
    }
}
