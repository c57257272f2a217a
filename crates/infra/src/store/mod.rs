//! Aggregate state store with a transactional outbox.
//!
//! Each command's aggregate save and the outbox rows derived from its events are
//! written in one transaction; the outbox publisher later drains those rows.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{
    AggregateRecord, AggregateStore, OutboxMessage, OutboxRecord, OutboxStats, OutboxStore,
    StoreError,
};
