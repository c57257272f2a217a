//! Routing: the ordered list of operations that make a product.
//!
//! Routings are reference data. Choreography reads them through the query
//! boundary to pick the work center of a work order's first operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult, ProductId,
    WorkCenterId, aggregate_id_newtype, require_positive, require_text,
};
use shopfloor_events::{Command, Event};

aggregate_id_newtype!(
    /// Routing identifier.
    RoutingId
);

/// One step of a routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingOperation {
    pub sequence: u32,
    pub name: String,
    pub work_center_id: WorkCenterId,
    pub standard_minutes: u32,
}

/// Aggregate root: Routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    id: RoutingId,
    routing_number: String,
    name: String,
    product_id: Option<ProductId>,
    /// Kept sorted by `sequence`.
    operations: Vec<RoutingOperation>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Routing {
    pub fn empty(id: RoutingId) -> Self {
        Self {
            id,
            routing_number: String::new(),
            name: String::new(),
            product_id: None,
            operations: Vec::new(),
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RoutingId {
        self.id
    }

    pub fn routing_number(&self) -> &str {
        &self.routing_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn operations(&self) -> &[RoutingOperation] {
        &self.operations
    }

    /// Lowest-sequence operation, if any.
    pub fn first_operation(&self) -> Option<&RoutingOperation> {
        self.operations.first()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl AggregateRoot for Routing {
    type Id = RoutingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for Routing {
    const AGGREGATE_TYPE: &'static str = "production.routing";

    fn empty(id: AggregateId) -> Self {
        Routing::empty(RoutingId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.routing_number.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRouting {
    pub routing_id: RoutingId,
    pub routing_number: String,
    pub name: String,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOperation {
    pub routing_id: RoutingId,
    pub operation: RoutingOperation,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOperation {
    pub routing_id: RoutingId,
    pub sequence: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRouting {
    pub routing_id: RoutingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingCommand {
    CreateRouting(CreateRouting),
    AddOperation(AddOperation),
    RemoveOperation(RemoveOperation),
    DeleteRouting(DeleteRouting),
}

impl Command for RoutingCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let routing_id = match self {
            RoutingCommand::CreateRouting(c) => c.routing_id,
            RoutingCommand::AddOperation(c) => c.routing_id,
            RoutingCommand::RemoveOperation(c) => c.routing_id,
            RoutingCommand::DeleteRouting(c) => c.routing_id,
        };
        routing_id.0
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            RoutingCommand::CreateRouting(c) => {
                require_text("routing_number", &c.routing_number)?;
                require_text("name", &c.name)
            }
            RoutingCommand::AddOperation(c) => {
                require_positive("sequence", c.operation.sequence)?;
                require_text("operation name", &c.operation.name)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingCreated {
    pub routing_id: RoutingId,
    pub routing_number: String,
    pub name: String,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationAdded {
    pub routing_id: RoutingId,
    pub operation: RoutingOperation,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRemoved {
    pub routing_id: RoutingId,
    pub sequence: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDeleted {
    pub routing_id: RoutingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingEvent {
    RoutingCreated(RoutingCreated),
    OperationAdded(OperationAdded),
    OperationRemoved(OperationRemoved),
    RoutingDeleted(RoutingDeleted),
}

impl RoutingEvent {
    pub const CREATED: &'static str = "production.routing.created";
    pub const OPERATION_ADDED: &'static str = "production.routing.operation_added";
    pub const OPERATION_REMOVED: &'static str = "production.routing.operation_removed";
    pub const DELETED: &'static str = "production.routing.deleted";
}

impl Event for RoutingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RoutingEvent::RoutingCreated(_) => Self::CREATED,
            RoutingEvent::OperationAdded(_) => Self::OPERATION_ADDED,
            RoutingEvent::OperationRemoved(_) => Self::OPERATION_REMOVED,
            RoutingEvent::RoutingDeleted(_) => Self::DELETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RoutingEvent::RoutingCreated(e) => e.occurred_at,
            RoutingEvent::OperationAdded(e) => e.occurred_at,
            RoutingEvent::OperationRemoved(e) => e.occurred_at,
            RoutingEvent::RoutingDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Routing {
    type Command = RoutingCommand;
    type Event = RoutingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RoutingEvent::RoutingCreated(e) => {
                self.id = e.routing_id;
                self.routing_number = e.routing_number.clone();
                self.name = e.name.clone();
                self.product_id = Some(e.product_id);
                self.created = true;
            }
            RoutingEvent::OperationAdded(e) => {
                let at = self
                    .operations
                    .partition_point(|op| op.sequence < e.operation.sequence);
                self.operations.insert(at, e.operation.clone());
            }
            RoutingEvent::OperationRemoved(e) => {
                self.operations.retain(|op| op.sequence != e.sequence);
            }
            RoutingEvent::RoutingDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let RoutingCommand::CreateRouting(cmd) = command {
            return self.handle_create(cmd);
        }

        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.deleted {
            return Err(DomainError::state_conflict("routing is deleted"));
        }

        match command {
            RoutingCommand::AddOperation(cmd) => {
                require_positive("sequence", cmd.operation.sequence)?;
                require_text("operation name", &cmd.operation.name)?;
                if self
                    .operations
                    .iter()
                    .any(|op| op.sequence == cmd.operation.sequence)
                {
                    return Err(DomainError::state_conflict(format!(
                        "operation sequence {} already exists",
                        cmd.operation.sequence
                    )));
                }
                Ok(vec![RoutingEvent::OperationAdded(OperationAdded {
                    routing_id: self.id,
                    operation: cmd.operation.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            RoutingCommand::RemoveOperation(cmd) => {
                if !self.operations.iter().any(|op| op.sequence == cmd.sequence) {
                    return Err(DomainError::state_conflict(format!(
                        "operation sequence {} does not exist",
                        cmd.sequence
                    )));
                }
                Ok(vec![RoutingEvent::OperationRemoved(OperationRemoved {
                    routing_id: self.id,
                    sequence: cmd.sequence,
                    occurred_at: cmd.occurred_at,
                })])
            }
            RoutingCommand::DeleteRouting(cmd) => {
                Ok(vec![RoutingEvent::RoutingDeleted(RoutingDeleted {
                    routing_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            RoutingCommand::CreateRouting(cmd) => self.handle_create(cmd),
        }
    }
}

impl Routing {
    fn handle_create(&self, cmd: &CreateRouting) -> DomainResult<Vec<RoutingEvent>> {
        require_text("routing_number", &cmd.routing_number)?;
        require_text("name", &cmd.name)?;
        if self.created {
            return Err(DomainError::state_conflict("routing already exists"));
        }

        Ok(vec![RoutingEvent::RoutingCreated(RoutingCreated {
            routing_id: cmd.routing_id,
            routing_number: cmd.routing_number.clone(),
            name: cmd.name.clone(),
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
