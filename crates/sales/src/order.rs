use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult,
    aggregate_id_newtype, require_positive, require_text,
};
use shopfloor_events::{Command, Event};

aggregate_id_newtype!(
    /// Sales order identifier.
    OrderId
);

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    name: String,
    count: u32,
    paid: bool,
    deleted: bool,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            name: String::new(),
            count: 0,
            paid: false,
            deleted: false,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_paid(&self) -> bool {
        self.paid
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for Order {
    const AGGREGATE_TYPE: &'static str = "sales.order";

    fn empty(id: AggregateId) -> Self {
        Order::empty(OrderId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub name: String,
    pub count: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PayOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteOrder (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    PayOrder(PayOrder),
    DeleteOrder(DeleteOrder),
}

impl Command for OrderCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let order_id = match self {
            OrderCommand::CreateOrder(c) => c.order_id,
            OrderCommand::PayOrder(c) => c.order_id,
            OrderCommand::DeleteOrder(c) => c.order_id,
        };
        order_id.0
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            OrderCommand::CreateOrder(c) => {
                require_text("name", &c.name)?;
                require_positive("count", c.count)
            }
            _ => Ok(()),
        }
    }
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub name: String,
    pub count: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderPaid. Published to other processes through the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    OrderPaid(OrderPaid),
    OrderDeleted(OrderDeleted),
}

impl OrderEvent {
    pub const CREATED: &'static str = "sales.order.created";
    pub const PAID: &'static str = "sales.order.paid";
    pub const DELETED: &'static str = "sales.order.deleted";
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => Self::CREATED,
            OrderEvent::OrderPaid(_) => Self::PAID,
            OrderEvent::OrderDeleted(_) => Self::DELETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::OrderPaid(e) => e.occurred_at,
            OrderEvent::OrderDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.name = e.name.clone();
                self.count = e.count;
                self.paid = false;
                self.deleted = false;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderPaid(_) => {
                self.paid = true;
            }
            OrderEvent::OrderDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::PayOrder(cmd) => self.handle_pay(cmd),
            OrderCommand::DeleteOrder(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Order {
    fn ensure_live(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.deleted {
            return Err(DomainError::state_conflict("order has been deleted"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrder) -> DomainResult<Vec<OrderEvent>> {
        require_text("name", &cmd.name)?;
        require_positive("count", cmd.count)?;
        if self.created {
            return Err(DomainError::state_conflict("order already exists"));
        }

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            name: cmd.name.trim().to_string(),
            count: cmd.count,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pay(&self, cmd: &PayOrder) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_live()?;
        if self.paid {
            return Err(DomainError::state_conflict("order has been paid"));
        }

        Ok(vec![OrderEvent::OrderPaid(OrderPaid {
            order_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteOrder) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_live()?;

        Ok(vec![OrderEvent::OrderDeleted(OrderDeleted {
            order_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
