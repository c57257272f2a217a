//! Broker implementations backed by external infrastructure.
//!
//! The broker contract and the in-memory broker live in `shopfloor-events`.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBroker, RedisStreamsError};
