//! Aggregate capability shared by every state machine in the domain.
//!
//! An aggregate is identity + version + a list of pending facts. The traits here
//! describe that capability; `Tracked` holds the pending list while a command runs.

use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Every applied event bumps it by one; the persisted row carries the same
    /// number and the store compares it on save.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a save.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The aggregate must not have been persisted yet.
    NotExists,
    /// The persisted aggregate must be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for an aggregate loaded at `version` (0 = never persisted).
    pub fn from_loaded(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::NotExists
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::NotExists, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// A rejected command returns an error from `handle` and never reaches `apply`,
/// so the aggregate is left exactly as it was.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// A persistable kind of aggregate.
pub trait AggregateKind: Aggregate {
    /// Stable type name used as the storage partition (e.g. "production.work_order").
    const AGGREGATE_TYPE: &'static str;

    /// A not-yet-created instance, the starting point for creation commands.
    fn empty(id: AggregateId) -> Self;

    /// Whether a creation command has been applied.
    fn exists(&self) -> bool;

    /// Business key that must be unique within the aggregate type, if any.
    fn unique_key(&self) -> Option<String> {
        None
    }
}

/// An aggregate plus the events recorded against it since it was loaded.
#[derive(Debug, Clone)]
pub struct Tracked<A: Aggregate> {
    aggregate: A,
    pending: Vec<A::Event>,
}

impl<A: Aggregate> Tracked<A> {
    pub fn new(aggregate: A) -> Self {
        Self {
            aggregate,
            pending: Vec::new(),
        }
    }

    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    pub fn pending_events(&self) -> &[A::Event] {
        &self.pending
    }

    /// Run one command: decide, then apply and record the resulting events.
    pub fn execute(&mut self, command: &A::Command) -> Result<&[A::Event], A::Error> {
        let events = self.aggregate.handle(command)?;
        let start = self.pending.len();
        for ev in &events {
            self.aggregate.apply(ev);
        }
        self.pending.extend(events);
        Ok(&self.pending[start..])
    }

    pub fn into_parts(self) -> (A, Vec<A::Event>) {
        (self.aggregate, self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        id: AggregateId,
        value: u32,
        version: u64,
    }

    impl AggregateRoot for Counter {
        type Id = AggregateId;

        fn id(&self) -> &Self::Id {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    impl Aggregate for Counter {
        type Command = u32;
        type Event = u32;
        type Error = DomainError;

        fn apply(&mut self, event: &u32) {
            self.value += event;
            self.version += 1;
        }

        fn handle(&self, command: &u32) -> Result<Vec<u32>, DomainError> {
            if *command == 0 {
                return Err(DomainError::validation("increment must be positive"));
            }
            Ok(vec![*command])
        }
    }

    #[test]
    fn execute_records_pending_and_bumps_version() {
        let mut tracked = Tracked::new(Counter {
            id: AggregateId::new(),
            value: 0,
            version: 0,
        });

        assert_eq!(tracked.execute(&3).unwrap(), &[3]);
        assert_eq!(tracked.execute(&4).unwrap(), &[4]);

        assert_eq!(tracked.aggregate().value, 7);
        assert_eq!(tracked.aggregate().version(), 2);
        assert_eq!(tracked.pending_events(), &[3, 4]);
    }

    #[test]
    fn rejected_command_leaves_aggregate_untouched() {
        let mut tracked = Tracked::new(Counter {
            id: AggregateId::new(),
            value: 5,
            version: 1,
        });
        let before = tracked.aggregate().clone();

        assert!(tracked.execute(&0).is_err());
        assert_eq!(tracked.aggregate(), &before);
        assert!(tracked.pending_events().is_empty());
    }

    #[test]
    fn expected_version_matches_persisted_state() {
        assert!(ExpectedVersion::NotExists.matches(None));
        assert!(!ExpectedVersion::NotExists.matches(Some(1)));
        assert!(ExpectedVersion::Exact(2).matches(Some(2)));
        assert!(!ExpectedVersion::Exact(2).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(2).matches(None));
        assert_eq!(ExpectedVersion::from_loaded(0), ExpectedVersion::NotExists);
        assert!(matches!(
            ExpectedVersion::Exact(1).check(Some(2)),
            Err(DomainError::Conflict(_))
        ));
    }
}
