//! Redis Streams broker (durable, at-least-once delivery).
//!
//! - **Stream per topic**: `shopfloor:{topic}`, appended with XADD
//! - **Consumer group**: every subscriber reads through one group (XREADGROUP)
//! - **Ack**: XACK once the consumer has processed the delivery
//! - **Nack**: the entry is re-appended with `attempt + 1` and the original acked,
//!   in one MULTI/EXEC; past `max_deliveries` it goes to `shopfloor:{topic}:dlq`
//! - **Reclaim**: entries left pending by a dead consumer are taken over with
//!   XCLAIM once idle for longer than `reclaim_idle`

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadOptions,
    StreamReadReply,
};
use redis::{Commands, Connection};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, warn};

use shopfloor_events::{Acknowledger, Delivery, EventEnvelope, MessageBroker, Subscription};

const DEFAULT_KEY_PREFIX: &str = "shopfloor";
const DEFAULT_MAX_DELIVERIES: u32 = 5;
const DEFAULT_RECLAIM_IDLE_MS: usize = 60_000;
const DEFAULT_BLOCK_MS: usize = 1_000;
const READ_COUNT: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const FIELD_EVENT_ID: &str = "event_id";
const FIELD_EVENT_TYPE: &str = "event_type";
const FIELD_ATTEMPT: &str = "attempt";
const FIELD_PAYLOAD: &str = "payload";

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    key_prefix: String,
    group: String,
    consumer: String,
    max_deliveries: u32,
    reclaim_idle_ms: usize,
    block_ms: usize,
}

impl RedisStreamsBroker {
    /// Connect lazily to `redis_url`; every subscriber joins consumer group `group`.
    pub fn new(redis_url: impl AsRef<str>, group: impl Into<String>) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            group: group.into(),
            consumer: format!("consumer-{}", uuid::Uuid::now_v7()),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            reclaim_idle_ms: DEFAULT_RECLAIM_IDLE_MS,
            block_ms: DEFAULT_BLOCK_MS,
        })
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn with_reclaim_idle(mut self, idle: Duration) -> Self {
        self.reclaim_idle_ms = usize::try_from(idle.as_millis()).unwrap_or(usize::MAX);
        self
    }

    pub fn with_consumer_name(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn stream_key(&self, topic: &str) -> String {
        format!("{}:{topic}", self.key_prefix)
    }

    pub fn dlq_key(&self, topic: &str) -> String {
        format!("{}:{topic}:dlq", self.key_prefix)
    }

    /// Messages dead-lettered for `topic`, oldest first.
    pub fn dead_letters(&self, topic: &str) -> Result<Vec<EventEnvelope<JsonValue>>, RedisStreamsError> {
        let mut conn = self.connection()?;
        let reply: StreamRangeReply = conn
            .xrange_all(self.dlq_key(topic))
            .map_err(|e| RedisStreamsError::Command(format!("XRANGE failed: {e}")))?;
        reply
            .ids
            .iter()
            .map(|entry| parse_entry(entry).map(|m| m.envelope))
            .collect()
    }

    fn connection(&self) -> Result<Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Create the consumer group (and the stream) if missing.
    fn ensure_group(&self, conn: &mut Connection, stream_key: &str) -> Result<(), RedisStreamsError> {
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream_key, &self.group, "0");
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    #[instrument(
        skip(self, message),
        fields(topic = %topic, event_id = %message.event_id(), event_type = message.event_type()),
        err
    )]
    fn publish_sync(&self, topic: &str, message: &EventEnvelope<JsonValue>) -> Result<(), RedisStreamsError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;
        let mut conn = self.connection()?;

        let _: String = conn
            .xadd(
                self.stream_key(topic),
                "*",
                &[
                    (FIELD_EVENT_ID, message.event_id().to_string()),
                    (FIELD_EVENT_TYPE, message.event_type().to_string()),
                    (FIELD_ATTEMPT, "1".to_string()),
                    (FIELD_PAYLOAD, payload),
                ],
            )
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    /// Take over entries of the group left idle too long by any consumer.
    fn reclaim(&self, conn: &mut Connection, stream_key: &str) -> Result<Vec<StreamId>, RedisStreamsError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(stream_key, &self.group, "-", "+", READ_COUNT)
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= self.reclaim_idle_ms)
            .map(|p| p.id)
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = conn
            .xclaim(stream_key, &self.group, &self.consumer, self.reclaim_idle_ms, &stale)
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;
        if !claimed.ids.is_empty() {
            info!(stream_key, count = claimed.ids.len(), "reclaimed stale pending entries");
        }
        Ok(claimed.ids)
    }

    fn read_new(&self, conn: &mut Connection, stream_key: &str) -> Result<Vec<StreamId>, RedisStreamsError> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_COUNT)
            .block(self.block_ms);

        // BLOCK timing out yields nil.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream_key], &[">"], &options)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }
}

impl MessageBroker<EventEnvelope<JsonValue>> for RedisStreamsBroker {
    type Error = RedisStreamsError;

    fn publish(&self, topic: &str, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        self.publish_sync(topic, &message)
    }

    /// Spawns a reader thread that feeds the returned subscription.
    ///
    /// The thread exits once the subscription is dropped and it next has a
    /// delivery to hand over; whatever it read is left pending and is reclaimed.
    fn subscribe(&self, topic: &str) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::channel();
        let reader = StreamReader {
            broker: self.clone(),
            topic: topic.to_string(),
            stream_key: self.stream_key(topic),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        };

        let spawned = thread::Builder::new()
            .name(format!("redis-reader:{topic}"))
            .spawn(move || reader.run(tx));
        if let Err(e) = spawned {
            // The sender is gone with the closure, so the subscription reports disconnected.
            error!(topic, error = %e, "failed to spawn redis stream reader");
        }

        Subscription::new(rx)
    }
}

struct StreamMessage {
    entry_id: String,
    attempt: u32,
    envelope: EventEnvelope<JsonValue>,
}

fn parse_entry(entry: &StreamId) -> Result<StreamMessage, RedisStreamsError> {
    let payload: String = entry.get(FIELD_PAYLOAD).ok_or_else(|| {
        RedisStreamsError::Deserialization(format!("entry {} has no payload", entry.id))
    })?;
    let attempt = entry
        .get::<String>(FIELD_ATTEMPT)
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(1);
    let envelope = serde_json::from_str(&payload).map_err(|e| {
        RedisStreamsError::Deserialization(format!("entry {}: {e}", entry.id))
    })?;

    Ok(StreamMessage {
        entry_id: entry.id.clone(),
        attempt,
        envelope,
    })
}

struct StreamReader {
    broker: RedisStreamsBroker,
    topic: String,
    stream_key: String,
    /// Entries handed out and not yet settled, so a reclaim does not duplicate them.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl StreamReader {
    fn run(self, tx: mpsc::Sender<Delivery<EventEnvelope<JsonValue>>>) {
        info!(topic = %self.topic, group = %self.broker.group, "redis stream reader started");

        let mut conn = None;
        loop {
            if conn.is_none() {
                match self.connect() {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        error!(topic = %self.topic, error = %e, "redis unavailable, retrying");
                        thread::sleep(RECONNECT_DELAY);
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else {
                continue;
            };

            let entries = match self.next_batch(c) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "failed to read from stream");
                    conn = None;
                    thread::sleep(RECONNECT_DELAY);
                    continue;
                }
            };

            for entry in entries {
                let Some(delivery) = self.to_delivery(&entry) else {
                    continue;
                };
                if tx.send(delivery).is_err() {
                    info!(topic = %self.topic, "subscription dropped, redis stream reader stopped");
                    return;
                }
            }
        }
    }

    fn connect(&self) -> Result<Connection, RedisStreamsError> {
        let mut conn = self.broker.connection()?;
        self.broker.ensure_group(&mut conn, &self.stream_key)?;
        Ok(conn)
    }

    fn next_batch(&self, conn: &mut Connection) -> Result<Vec<StreamId>, RedisStreamsError> {
        let mut entries = self.broker.reclaim(conn, &self.stream_key)?;
        if let Ok(in_flight) = self.in_flight.lock() {
            entries.retain(|e| !in_flight.contains(&e.id));
        }
        if entries.is_empty() {
            entries = self.broker.read_new(conn, &self.stream_key)?;
        }
        Ok(entries)
    }

    fn to_delivery(&self, entry: &StreamId) -> Option<Delivery<EventEnvelope<JsonValue>>> {
        let raw_payload: Option<String> = entry.get(FIELD_PAYLOAD);
        let message = match parse_entry(entry) {
            Ok(message) => message,
            Err(e) => {
                // Unreadable entries can never be processed: park them in the DLQ.
                warn!(topic = %self.topic, entry_id = %entry.id, error = %e, "dead-lettering unreadable entry");
                let acker = self.acker(entry.id.clone(), u32::MAX, raw_payload.unwrap_or_default());
                Box::new(acker).nack(&e.to_string());
                return None;
            }
        };

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(message.entry_id.clone());
        }
        let payload = raw_payload.unwrap_or_default();
        let acker = self.acker(message.entry_id, message.attempt, payload);
        Some(Delivery::new(message.envelope, message.attempt, Box::new(acker)))
    }

    fn acker(&self, entry_id: String, attempt: u32, payload: String) -> RedisAcker {
        RedisAcker {
            broker: self.broker.clone(),
            stream_key: self.stream_key.clone(),
            dlq_key: self.broker.dlq_key(&self.topic),
            entry_id,
            attempt,
            payload,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

struct RedisAcker {
    broker: RedisStreamsBroker,
    stream_key: String,
    dlq_key: String,
    entry_id: String,
    attempt: u32,
    payload: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RedisAcker {
    fn settle(&self, requeue_to: Option<(&str, String)>, reason: Option<&str>) -> Result<(), RedisStreamsError> {
        let mut conn = self.broker.connection()?;
        let mut pipe = redis::pipe();
        pipe.atomic();

        if let Some((key, attempt)) = requeue_to {
            let mut fields = vec![(FIELD_ATTEMPT, attempt), (FIELD_PAYLOAD, self.payload.clone())];
            if let Some(reason) = reason {
                fields.push(("reason", reason.to_string()));
            }
            pipe.xadd(key, "*", &fields).ignore();
        }
        pipe.xack(&self.stream_key, &self.broker.group, &[&self.entry_id])
            .ignore();

        pipe.query::<()>(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("settle failed: {e}")))
    }

    fn forget(&self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.entry_id);
        }
    }
}

impl Acknowledger for RedisAcker {
    fn ack(self: Box<Self>) {
        if let Err(e) = self.settle(None, None) {
            // Stays pending; reclaim redelivers it.
            error!(entry_id = %self.entry_id, error = %e, "XACK failed");
        } else {
            debug!(entry_id = %self.entry_id, "entry acknowledged");
        }
        self.forget();
    }

    fn nack(self: Box<Self>, reason: &str) {
        let result = if self.attempt >= self.broker.max_deliveries {
            warn!(
                entry_id = %self.entry_id,
                attempt = self.attempt,
                reason,
                "max deliveries reached, dead-lettering"
            );
            self.settle(Some((self.dlq_key.as_str(), self.attempt.to_string())), Some(reason))
        } else {
            debug!(entry_id = %self.entry_id, attempt = self.attempt, reason, "entry nacked, requeueing");
            self.settle(
                Some((self.stream_key.as_str(), (self.attempt + 1).to_string())),
                None,
            )
        };
        if let Err(e) = result {
            error!(entry_id = %self.entry_id, error = %e, "nack failed, entry left pending");
        }
        self.forget();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_topic() {
        let broker = RedisStreamsBroker::new("redis://localhost:6379", "shopfloor.deliver").unwrap();
        assert_eq!(broker.stream_key("sales.order.paid"), "shopfloor:sales.order.paid");
        assert_eq!(broker.dlq_key("sales.order.paid"), "shopfloor:sales.order.paid:dlq");
    }

    #[test]
    fn max_deliveries_is_at_least_one() {
        let broker = RedisStreamsBroker::new("redis://localhost:6379", "g")
            .unwrap()
            .with_max_deliveries(0);
        assert_eq!(broker.max_deliveries, 1);
    }
}
