//! `shopfloor-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateKind, AggregateRoot, ExpectedVersion, Tracked};
pub use error::{DomainError, DomainResult, require_positive, require_text};
pub use id::{AggregateId, MaterialId, ProductId, WorkCenterId};
