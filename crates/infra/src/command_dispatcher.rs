//! Command execution pipeline (application-level orchestration).
//!
//! ## Command Execution Flow
//!
//! ```text
//! ShopFloorCommand
//!   ↓
//! 1. Validate the command's fields (no aggregate touched yet)
//!   ↓
//! 2. Load the target aggregate's record (or start from an empty instance)
//!   ↓
//! 3. Run exactly one guarded operation (pure decision + apply)
//!   ↓
//! 4. Save the aggregate and its outbox rows in one transaction
//!   ↓
//! 5. Deliver the committed events to the domain event bus (choreography)
//! ```
//!
//! Step 5 runs on the caller's thread after the commit. A choreography handler may
//! dispatch further commands through the same pipeline (recursively); the
//! registration table is acyclic, so the recursion is bounded. A failing handler
//! never unwinds the write committed in step 4: the failure is reported to the
//! caller as [`DispatchError::Choreography`].
//!
//! Concurrent commands against the same aggregate are serialized by the store's
//! version check. A stale save fails with [`DispatchError::Concurrency`] and is
//! never retried here.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shopfloor_core::{AggregateId, AggregateKind, DomainError, ExpectedVersion, Tracked};
use shopfloor_equipment::{Equipment, EquipmentCommand, EquipmentEvent};
use shopfloor_events::{Command, DomainEventBus, Event, EventEnvelope, IntegrationEvent};
use shopfloor_production::{
    Bom, BomCommand, BomEvent, CreateWorkOrder, GenerateWorkOrders, ProductionPlan,
    ProductionPlanCommand, ProductionPlanEvent, ProductionPlanStatus, QualityInspection,
    QualityInspectionCommand, QualityInspectionEvent, Routing, RoutingCommand, RoutingEvent,
    StartProductionPlan, WorkOrder, WorkOrderCommand, WorkOrderEvent, WorkOrderId,
    work_order_number,
};
use shopfloor_sales::{DeliverRecord, DeliverRecordCommand, DeliverRecordEvent, Order, OrderCommand, OrderEvent};

use crate::outbox::outbox_message;
use crate::queries::{ShopFloorQueries, StoreQueries};
use crate::store::{AggregateRecord, AggregateStore, OutboxMessage, StoreError};

/// Every command the dispatcher can route, one variant per aggregate kind.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub enum ShopFloorCommand {
    ProductionPlan(ProductionPlanCommand),
    WorkOrder(WorkOrderCommand),
    QualityInspection(QualityInspectionCommand),
    Routing(RoutingCommand),
    Bom(BomCommand),
    Equipment(EquipmentCommand),
    Order(OrderCommand),
    DeliverRecord(DeliverRecordCommand),
}

impl ShopFloorCommand {
    /// Storage type of the aggregate this command targets.
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            ShopFloorCommand::ProductionPlan(_) => ProductionPlan::AGGREGATE_TYPE,
            ShopFloorCommand::WorkOrder(_) => WorkOrder::AGGREGATE_TYPE,
            ShopFloorCommand::QualityInspection(_) => QualityInspection::AGGREGATE_TYPE,
            ShopFloorCommand::Routing(_) => Routing::AGGREGATE_TYPE,
            ShopFloorCommand::Bom(_) => Bom::AGGREGATE_TYPE,
            ShopFloorCommand::Equipment(_) => Equipment::AGGREGATE_TYPE,
            ShopFloorCommand::Order(_) => Order::AGGREGATE_TYPE,
            ShopFloorCommand::DeliverRecord(_) => DeliverRecord::AGGREGATE_TYPE,
        }
    }
}

impl Command for ShopFloorCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            ShopFloorCommand::ProductionPlan(c) => c.target_aggregate_id(),
            ShopFloorCommand::WorkOrder(c) => c.target_aggregate_id(),
            ShopFloorCommand::QualityInspection(c) => c.target_aggregate_id(),
            ShopFloorCommand::Routing(c) => c.target_aggregate_id(),
            ShopFloorCommand::Bom(c) => c.target_aggregate_id(),
            ShopFloorCommand::Equipment(c) => c.target_aggregate_id(),
            ShopFloorCommand::Order(c) => c.target_aggregate_id(),
            ShopFloorCommand::DeliverRecord(c) => c.target_aggregate_id(),
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        match self {
            ShopFloorCommand::ProductionPlan(c) => c.validate(),
            ShopFloorCommand::WorkOrder(c) => c.validate(),
            ShopFloorCommand::QualityInspection(c) => c.validate(),
            ShopFloorCommand::Routing(c) => c.validate(),
            ShopFloorCommand::Bom(c) => c.validate(),
            ShopFloorCommand::Equipment(c) => c.validate(),
            ShopFloorCommand::Order(c) => c.validate(),
            ShopFloorCommand::DeliverRecord(c) => c.validate(),
        }
    }
}

macro_rules! shop_floor_command_from {
    ($($variant:ident => $command:ty),* $(,)?) => {
        $(
            impl From<$command> for ShopFloorCommand {
                fn from(value: $command) -> Self {
                    ShopFloorCommand::$variant(value)
                }
            }
        )*
    };
}

shop_floor_command_from!(
    ProductionPlan => ProductionPlanCommand,
    WorkOrder => WorkOrderCommand,
    QualityInspection => QualityInspectionCommand,
    Routing => RoutingCommand,
    Bom => BomCommand,
    Equipment => EquipmentCommand,
    Order => OrderCommand,
    DeliverRecord => DeliverRecordCommand,
);

/// Every domain event the bus carries, one variant per aggregate kind.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub enum ShopFloorEvent {
    ProductionPlan(ProductionPlanEvent),
    WorkOrder(WorkOrderEvent),
    QualityInspection(QualityInspectionEvent),
    Routing(RoutingEvent),
    Bom(BomEvent),
    Equipment(EquipmentEvent),
    Order(OrderEvent),
    DeliverRecord(DeliverRecordEvent),
}

impl Event for ShopFloorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShopFloorEvent::ProductionPlan(e) => e.event_type(),
            ShopFloorEvent::WorkOrder(e) => e.event_type(),
            ShopFloorEvent::QualityInspection(e) => e.event_type(),
            ShopFloorEvent::Routing(e) => e.event_type(),
            ShopFloorEvent::Bom(e) => e.event_type(),
            ShopFloorEvent::Equipment(e) => e.event_type(),
            ShopFloorEvent::Order(e) => e.event_type(),
            ShopFloorEvent::DeliverRecord(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            ShopFloorEvent::ProductionPlan(e) => e.version(),
            ShopFloorEvent::WorkOrder(e) => e.version(),
            ShopFloorEvent::QualityInspection(e) => e.version(),
            ShopFloorEvent::Routing(e) => e.version(),
            ShopFloorEvent::Bom(e) => e.version(),
            ShopFloorEvent::Equipment(e) => e.version(),
            ShopFloorEvent::Order(e) => e.version(),
            ShopFloorEvent::DeliverRecord(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> chrono::DateTime<Utc> {
        match self {
            ShopFloorEvent::ProductionPlan(e) => e.occurred_at(),
            ShopFloorEvent::WorkOrder(e) => e.occurred_at(),
            ShopFloorEvent::QualityInspection(e) => e.occurred_at(),
            ShopFloorEvent::Routing(e) => e.occurred_at(),
            ShopFloorEvent::Bom(e) => e.occurred_at(),
            ShopFloorEvent::Equipment(e) => e.occurred_at(),
            ShopFloorEvent::Order(e) => e.occurred_at(),
            ShopFloorEvent::DeliverRecord(e) => e.occurred_at(),
        }
    }
}

/// Domain event bus wired to the dispatcher: handlers get the dispatcher as context.
pub type ShopFloorEventBus = DomainEventBus<ShopFloorEvent, dyn ChoreographyContext, DispatchError>;

/// Integration event routes, keyed by integration event type.
pub type IntegrationEventBus =
    DomainEventBus<IntegrationEvent, dyn ChoreographyContext, DispatchError>;

/// What a choreography handler may do: read through the query boundary and
/// issue the next command.
pub trait ChoreographyContext: Send + Sync {
    fn dispatch(&self, command: ShopFloorCommand) -> Result<CommandOutcome, DispatchError>;

    fn queries(&self) -> &dyn ShopFloorQueries;
}

/// Command execution error.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed input, rejected before any aggregate was loaded.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A guarded transition's precondition does not hold (also: duplicate business key).
    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Stale version on save. The caller may reload and retry.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The broker refused or could not be reached.
    #[error("downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The command committed, but a handler reacting to one of its events failed.
    #[error("choreography handler {handler} failed on {trigger}: {source}")]
    Choreography {
        trigger: &'static str,
        handler: &'static str,
        #[source]
        source: Box<DispatchError>,
    },
}

impl DispatchError {
    /// Whether the caller may retry the same command.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Concurrency(_) | DispatchError::DownstreamUnavailable(_) => true,
            DispatchError::Store(e) => e.is_transient(),
            DispatchError::Choreography { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    fn from_domain(err: DomainError, aggregate_type: &str, aggregate_id: AggregateId) -> Self {
        match err {
            DomainError::NotFound => {
                DispatchError::NotFound(format!("{aggregate_type} {aggregate_id}"))
            }
            other => other.into(),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                DispatchError::Validation(msg)
            }
            DomainError::StateConflict(msg) => DispatchError::StateConflict(msg),
            DomainError::NotFound => DispatchError::NotFound("aggregate".to_string()),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            StoreError::DuplicateKey(msg) => DispatchError::StateConflict(msg),
            StoreError::Serialization(msg) => DispatchError::Serialization(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Result of a committed command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub aggregate_type: &'static str,
    pub aggregate_id: AggregateId,
    /// Aggregate version after the command.
    pub version: u64,
    /// The committed events, in the order they were applied.
    pub events: Vec<EventEnvelope<ShopFloorEvent>>,
    /// Outbox rows written with the save.
    pub outbox: Vec<Uuid>,
}

/// Routes commands to their aggregate and runs the execution pipeline.
///
/// Generic over the aggregate store; the event bus is built once at startup
/// (see [`crate::choreography::build_event_bus`]) and never changes.
pub struct CommandDispatcher<S> {
    store: S,
    queries: StoreQueries<S>,
    bus: ShopFloorEventBus,
}

impl<S> CommandDispatcher<S>
where
    S: AggregateStore + Clone + 'static,
{
    pub fn new(store: S, bus: ShopFloorEventBus) -> Self {
        Self {
            queries: StoreQueries::new(store.clone()),
            store,
            bus,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &ShopFloorEventBus {
        &self.bus
    }

    /// Execute one command, then deliver its events to the choreography handlers.
    #[instrument(
        skip(self, command),
        fields(
            aggregate_type = command.aggregate_type(),
            aggregate_id = %command.target_aggregate_id()
        ),
        err
    )]
    pub fn dispatch(&self, command: ShopFloorCommand) -> Result<CommandOutcome, DispatchError> {
        let outcome = self.execute(&command)?;
        self.deliver(&outcome)?;
        Ok(outcome)
    }

    /// Load one aggregate by id through the store.
    pub fn load<A>(&self, aggregate_id: AggregateId) -> Result<Option<A>, DispatchError>
    where
        A: AggregateKind + DeserializeOwned,
    {
        match self.store.load(A::AGGREGATE_TYPE, aggregate_id)? {
            Some(record) => Ok(Some(record.to_aggregate()?)),
            None => Ok(None),
        }
    }

    /// Generate the work order of an Approved or InProgress plan on demand.
    ///
    /// Builds the work order from the plan's first routing that has operations,
    /// at [`WorkOrderId::for_plan`], then starts the plan if it is still
    /// Approved. The plan-started reaction then finds the work order in place and
    /// skips it. Each step runs through [`Self::dispatch`], choreography included.
    #[instrument(skip(self, command), fields(plan_id = %command.plan_id), err)]
    pub fn generate_work_orders(
        &self,
        command: &GenerateWorkOrders,
    ) -> Result<Vec<WorkOrderId>, DispatchError> {
        let plan_id = command.plan_id;
        let plan: ProductionPlan = self.load(plan_id.aggregate_id())?.ok_or_else(|| {
            DispatchError::NotFound(format!("{} {plan_id}", ProductionPlan::AGGREGATE_TYPE))
        })?;
        let product_id = plan.work_order_product().map_err(|e| {
            DispatchError::from_domain(e, ProductionPlan::AGGREGATE_TYPE, plan_id.aggregate_id())
        })?;

        let work_order_id = WorkOrderId::for_plan(plan_id);
        if let Some(existing) = self.queries.work_order(work_order_id)? {
            return Err(DispatchError::StateConflict(format!(
                "production plan {plan_id} already has work order {}",
                existing.work_order_number()
            )));
        }

        let routings = self.queries.find_routings_by_product(product_id)?;
        if routings.is_empty() {
            return Err(DispatchError::StateConflict(format!(
                "product {product_id} has no routing"
            )));
        }
        let Some(routing) = routings.into_iter().find(|r| r.first_operation().is_some()) else {
            return Err(DispatchError::StateConflict(format!(
                "no routing of product {product_id} has operations"
            )));
        };

        let number = work_order_number(plan.plan_number(), command.occurred_at);
        self.dispatch(
            WorkOrderCommand::CreateWorkOrder(CreateWorkOrder {
                work_order_id,
                work_order_number: number.clone(),
                production_plan_id: plan_id,
                product_id,
                routing_id: routing.id_typed(),
                quantity: plan.quantity(),
                occurred_at: command.occurred_at,
            })
            .into(),
        )?;
        info!(
            plan_id = %plan_id,
            work_order_id = %work_order_id,
            work_order_number = %number,
            "work order generated from production plan"
        );

        if plan.status() == ProductionPlanStatus::Approved {
            self.dispatch(
                ProductionPlanCommand::StartProductionPlan(StartProductionPlan {
                    plan_id,
                    occurred_at: command.occurred_at,
                })
                .into(),
            )?;
        }

        Ok(vec![work_order_id])
    }

    /// Steps 1–4: validate, load, decide + apply, save with outbox.
    fn execute(&self, command: &ShopFloorCommand) -> Result<CommandOutcome, DispatchError> {
        command.validate()?;
        let aggregate_id = command.target_aggregate_id();

        match command {
            ShopFloorCommand::ProductionPlan(c) => {
                self.execute_on::<ProductionPlan>(aggregate_id, c, ShopFloorEvent::ProductionPlan)
            }
            ShopFloorCommand::WorkOrder(c) => {
                self.execute_on::<WorkOrder>(aggregate_id, c, ShopFloorEvent::WorkOrder)
            }
            ShopFloorCommand::QualityInspection(c) => self.execute_on::<QualityInspection>(
                aggregate_id,
                c,
                ShopFloorEvent::QualityInspection,
            ),
            ShopFloorCommand::Routing(c) => {
                self.execute_on::<Routing>(aggregate_id, c, ShopFloorEvent::Routing)
            }
            ShopFloorCommand::Bom(c) => self.execute_on::<Bom>(aggregate_id, c, ShopFloorEvent::Bom),
            ShopFloorCommand::Equipment(c) => {
                self.execute_on::<Equipment>(aggregate_id, c, ShopFloorEvent::Equipment)
            }
            ShopFloorCommand::Order(c) => {
                self.execute_on::<Order>(aggregate_id, c, ShopFloorEvent::Order)
            }
            ShopFloorCommand::DeliverRecord(c) => {
                self.execute_on::<DeliverRecord>(aggregate_id, c, ShopFloorEvent::DeliverRecord)
            }
        }
    }

    fn execute_on<A>(
        &self,
        aggregate_id: AggregateId,
        command: &A::Command,
        wrap: fn(A::Event) -> ShopFloorEvent,
    ) -> Result<CommandOutcome, DispatchError>
    where
        A: AggregateKind<Error = DomainError> + Serialize + DeserializeOwned,
        A::Event: Event,
    {
        // 1) Load (an absent record starts from the empty instance; only creation
        //    commands succeed against it)
        let record = self.store.load(A::AGGREGATE_TYPE, aggregate_id)?;
        let (aggregate, expected, base_version) = match record {
            Some(record) => {
                let version = record.version;
                (record.to_aggregate::<A>()?, ExpectedVersion::Exact(version), version)
            }
            None => (A::empty(aggregate_id), ExpectedVersion::NotExists, 0),
        };

        // 2) Decide + apply
        let mut tracked = Tracked::new(aggregate);
        tracked
            .execute(command)
            .map_err(|e| DispatchError::from_domain(e, A::AGGREGATE_TYPE, aggregate_id))?;
        let (aggregate, pending) = tracked.into_parts();

        let events: Vec<EventEnvelope<ShopFloorEvent>> = pending
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                EventEnvelope::new(
                    Uuid::now_v7(),
                    aggregate_id,
                    A::AGGREGATE_TYPE,
                    base_version + i as u64 + 1,
                    event.event_type(),
                    event.occurred_at(),
                    wrap(event),
                )
            })
            .collect();

        // 3) Outbox rows for externally significant events
        let outbox: Vec<OutboxMessage> = events
            .iter()
            .filter_map(|env| outbox_message(env).transpose())
            .collect::<Result<_, _>>()?;
        let outbox_ids = outbox.iter().map(|m| m.id).collect();

        // 4) Save aggregate + outbox in one transaction
        let record = AggregateRecord::from_aggregate(aggregate_id, &aggregate, Utc::now())?;
        let version = record.version;
        self.store.save(record, expected, outbox)?;

        debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = %aggregate_id,
            version,
            events = events.len(),
            "command committed"
        );

        Ok(CommandOutcome {
            aggregate_type: A::AGGREGATE_TYPE,
            aggregate_id,
            version,
            events,
            outbox: outbox_ids,
        })
    }

    /// Step 5: hand each committed event to its handlers; report the first failure.
    fn deliver(&self, outcome: &CommandOutcome) -> Result<(), DispatchError> {
        let mut first_failure = None;

        for event in &outcome.events {
            let report = self.bus.deliver(event, self as &dyn ChoreographyContext);
            for failure in report.failures {
                warn!(
                    event_type = failure.event_type,
                    handler = failure.handler,
                    aggregate_id = %outcome.aggregate_id,
                    error = %failure.error,
                    "choreography handler failed"
                );
                if first_failure.is_none() {
                    first_failure = Some(DispatchError::Choreography {
                        trigger: failure.event_type,
                        handler: failure.handler,
                        source: Box::new(failure.error),
                    });
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<S> ChoreographyContext for CommandDispatcher<S>
where
    S: AggregateStore + Clone + 'static,
{
    fn dispatch(&self, command: ShopFloorCommand) -> Result<CommandOutcome, DispatchError> {
        CommandDispatcher::dispatch(self, command)
    }

    fn queries(&self) -> &dyn ShopFloorQueries {
        &self.queries
    }
}

impl<S> core::fmt::Debug for CommandDispatcher<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
