use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shopfloor_core::{AggregateId, AggregateKind, ExpectedVersion};
use shopfloor_events::EventEnvelope;

use std::sync::Arc;

/// Persisted state of one aggregate instance.
///
/// The store keeps the latest state only (no event history). `version` is the
/// aggregate's own version after the last committed command, and is what the
/// optimistic concurrency check compares on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRecord {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub version: u64,

    /// Business key that must be unique within `aggregate_type`.
    pub unique_key: Option<String>,

    pub state: JsonValue,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRecord {
    /// Serialize an aggregate into a record.
    pub fn from_aggregate<A>(
        aggregate_id: AggregateId,
        aggregate: &A,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, StoreError>
    where
        A: AggregateKind + Serialize,
    {
        let state = serde_json::to_value(aggregate).map_err(|e| {
            StoreError::Serialization(format!("{} state serialization failed: {e}", A::AGGREGATE_TYPE))
        })?;

        Ok(Self {
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            aggregate_id,
            version: aggregate.version(),
            unique_key: aggregate.unique_key(),
            state,
            updated_at,
        })
    }

    /// Rehydrate the aggregate held by this record.
    pub fn to_aggregate<A>(&self) -> Result<A, StoreError>
    where
        A: AggregateKind + DeserializeOwned,
    {
        if self.aggregate_type != A::AGGREGATE_TYPE {
            return Err(StoreError::Serialization(format!(
                "record {} has type '{}', expected '{}'",
                self.aggregate_id,
                self.aggregate_type,
                A::AGGREGATE_TYPE
            )));
        }
        serde_json::from_value(self.state.clone()).map_err(|e| {
            StoreError::Serialization(format!(
                "{} state deserialization failed for {}: {e}",
                A::AGGREGATE_TYPE,
                self.aggregate_id
            ))
        })
    }
}

/// An integration event to be written to the outbox together with an aggregate save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    /// Also used as the broker message's `event_id`, stable across republishing.
    pub id: Uuid,
    pub topic: String,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub sequence_number: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

/// A stored outbox row.
///
/// Rows are never deleted: a published row keeps `published_at`, an unpublished
/// one carries its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub message: OutboxMessage,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(message: OutboxMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            message,
            created_at,
            attempts: 0,
            last_error: None,
            next_attempt_at: created_at,
            published_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.message.id
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// The envelope sent to the broker.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        let m = &self.message;
        EventEnvelope::new(
            m.id,
            m.aggregate_id,
            m.aggregate_type.clone(),
            m.sequence_number,
            m.event_type.clone(),
            m.occurred_at,
            m.payload.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub total: u64,
    pub published: u64,
    pub pending: u64,
}

/// Store operation error.
///
/// Infrastructure failures, as opposed to domain errors. `Concurrency` and
/// `DuplicateKey` are deterministic outcomes of a save; `Unavailable` is transient.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Aggregate state store with a transactional outbox.
///
/// ## Save semantics
///
/// `save()` is one transaction:
/// - checks `expected` against the persisted version (`NotExists` = no row yet)
/// - rejects a `unique_key` already held by another aggregate of the same type
/// - writes the record
/// - inserts every outbox message
///
/// Either all of it commits or none of it does.
pub trait AggregateStore: Send + Sync {
    fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>, StoreError>;

    fn save(
        &self,
        record: AggregateRecord,
        expected: ExpectedVersion,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), StoreError>;

    /// All records of one type (reference data lookups; not paginated).
    fn list(&self, aggregate_type: &str) -> Result<Vec<AggregateRecord>, StoreError>;
}

/// Outbox side of the store, used by the publisher.
pub trait OutboxStore: Send + Sync {
    /// Unpublished rows in insertion order, up to (excluding) the first one
    /// whose `next_attempt_at` is still in the future.
    fn fetch_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxRecord>, StoreError>;

    fn mark_published(&self, id: Uuid, published_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Count one failed attempt and schedule the next one.
    fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn stats(&self) -> Result<OutboxStats, StoreError>;
}

impl<S> AggregateStore for Arc<S>
where
    S: AggregateStore + ?Sized,
{
    fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        (**self).load(aggregate_type, aggregate_id)
    }

    fn save(
        &self,
        record: AggregateRecord,
        expected: ExpectedVersion,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), StoreError> {
        (**self).save(record, expected, outbox)
    }

    fn list(&self, aggregate_type: &str) -> Result<Vec<AggregateRecord>, StoreError> {
        (**self).list(aggregate_type)
    }
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn fetch_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).fetch_due(limit, now)
    }

    fn mark_published(&self, id: Uuid, published_at: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).mark_published(id, published_at)
    }

    fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).record_failure(id, error, next_attempt_at)
    }

    fn stats(&self) -> Result<OutboxStats, StoreError> {
        (**self).stats()
    }
}
