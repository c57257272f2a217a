use shopfloor_core::{AggregateId, DomainResult};

/// A command targets a specific aggregate.
///
/// Commands represent **intent**. They are transient (never persisted) and are
/// either rejected or turned into exactly one event by the targeted aggregate.
///
/// ## Validation
///
/// `validate` checks the command's own fields and nothing else. The dispatcher
/// calls it before loading any aggregate, so malformed input never touches state.
/// State-dependent checks belong to the aggregate's guarded operation.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;

    fn validate(&self) -> DomainResult<()> {
        Ok(())
    }
}
