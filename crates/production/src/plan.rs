use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult, ProductId,
    aggregate_id_newtype, require_positive, require_text,
};
use shopfloor_events::{Command, Event};

/// Longest accepted plan number.
pub const MAX_PLAN_NUMBER_LEN: usize = 50;

aggregate_id_newtype!(
    /// Production plan identifier.
    ProductionPlanId
);

/// Production plan status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionPlanStatus {
    Draft,
    Approved,
    InProgress,
    Completed,
    Cancelled,
}

/// Aggregate root: ProductionPlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlan {
    id: ProductionPlanId,
    plan_number: String,
    product_id: Option<ProductId>,
    quantity: u32,
    planned_start: Option<DateTime<Utc>>,
    planned_end: Option<DateTime<Utc>>,
    status: ProductionPlanStatus,
    version: u64,
    created: bool,
}

impl ProductionPlan {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ProductionPlanId) -> Self {
        Self {
            id,
            plan_number: String::new(),
            product_id: None,
            quantity: 0,
            planned_start: None,
            planned_end: None,
            status: ProductionPlanStatus::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductionPlanId {
        self.id
    }

    pub fn plan_number(&self) -> &str {
        &self.plan_number
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn planned_start(&self) -> Option<DateTime<Utc>> {
        self.planned_start
    }

    pub fn planned_end(&self) -> Option<DateTime<Utc>> {
        self.planned_end
    }

    pub fn status(&self) -> ProductionPlanStatus {
        self.status
    }

    /// Whether work orders may be generated from this plan by hand.
    ///
    /// Only an Approved or InProgress plan qualifies. Returns the product the
    /// work order is built for.
    pub fn work_order_product(&self) -> DomainResult<ProductId> {
        self.ensure_created()?;
        if !matches!(
            self.status,
            ProductionPlanStatus::Approved | ProductionPlanStatus::InProgress
        ) {
            return Err(DomainError::state_conflict(format!(
                "cannot generate work orders for a production plan in status {:?}",
                self.status
            )));
        }
        self.product_id
            .ok_or_else(|| DomainError::state_conflict("production plan has no product"))
    }
}

impl AggregateRoot for ProductionPlan {
    type Id = ProductionPlanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for ProductionPlan {
    const AGGREGATE_TYPE: &'static str = "production.plan";

    fn empty(id: AggregateId) -> Self {
        ProductionPlan::empty(ProductionPlanId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.plan_number.clone())
    }
}

/// Command: CreateProductionPlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProductionPlan {
    pub plan_id: ProductionPlanId,
    pub plan_number: String,
    pub product_id: ProductId,
    pub quantity: u32,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

impl CreateProductionPlan {
    fn validate(&self) -> DomainResult<()> {
        require_text("plan_number", &self.plan_number)?;
        if self.plan_number.chars().count() > MAX_PLAN_NUMBER_LEN {
            return Err(DomainError::validation(format!(
                "plan_number must be at most {MAX_PLAN_NUMBER_LEN} characters"
            )));
        }
        require_positive("quantity", self.quantity)?;
        if self.planned_end <= self.planned_start {
            return Err(DomainError::validation(
                "planned_end must be after planned_start",
            ));
        }
        Ok(())
    }
}

/// Command: ApproveProductionPlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveProductionPlan {
    pub plan_id: ProductionPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartProductionPlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProductionPlan {
    pub plan_id: ProductionPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteProductionPlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteProductionPlan {
    pub plan_id: ProductionPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelProductionPlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelProductionPlan {
    pub plan_id: ProductionPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: GenerateWorkOrders.
///
/// Not handled by the plan aggregate alone: it creates the plan's work order
/// and, for an Approved plan, starts the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateWorkOrders {
    pub plan_id: ProductionPlanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionPlanCommand {
    CreateProductionPlan(CreateProductionPlan),
    ApproveProductionPlan(ApproveProductionPlan),
    StartProductionPlan(StartProductionPlan),
    CompleteProductionPlan(CompleteProductionPlan),
    CancelProductionPlan(CancelProductionPlan),
}

impl Command for ProductionPlanCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let plan_id = match self {
            ProductionPlanCommand::CreateProductionPlan(c) => c.plan_id,
            ProductionPlanCommand::ApproveProductionPlan(c) => c.plan_id,
            ProductionPlanCommand::StartProductionPlan(c) => c.plan_id,
            ProductionPlanCommand::CompleteProductionPlan(c) => c.plan_id,
            ProductionPlanCommand::CancelProductionPlan(c) => c.plan_id,
        };
        plan_id.0
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            ProductionPlanCommand::CreateProductionPlan(c) => c.validate(),
            _ => Ok(()),
        }
    }
}

/// Event: ProductionPlanCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlanCreated {
    pub plan_id: ProductionPlanId,
    pub plan_number: String,
    pub product_id: ProductId,
    pub quantity: u32,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductionPlanApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlanApproved {
    pub plan_id: ProductionPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductionPlanStarted.
///
/// Carries what downstream work-order creation needs so reactors don't reload the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlanStarted {
    pub plan_id: ProductionPlanId,
    pub plan_number: String,
    pub product_id: ProductId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductionPlanCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlanCompleted {
    pub plan_id: ProductionPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductionPlanCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlanCancelled {
    pub plan_id: ProductionPlanId,
    pub previous_status: ProductionPlanStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionPlanEvent {
    ProductionPlanCreated(ProductionPlanCreated),
    ProductionPlanApproved(ProductionPlanApproved),
    ProductionPlanStarted(ProductionPlanStarted),
    ProductionPlanCompleted(ProductionPlanCompleted),
    ProductionPlanCancelled(ProductionPlanCancelled),
}

impl ProductionPlanEvent {
    pub const CREATED: &'static str = "production.plan.created";
    pub const APPROVED: &'static str = "production.plan.approved";
    pub const STARTED: &'static str = "production.plan.started";
    pub const COMPLETED: &'static str = "production.plan.completed";
    pub const CANCELLED: &'static str = "production.plan.cancelled";
}

impl Event for ProductionPlanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductionPlanEvent::ProductionPlanCreated(_) => Self::CREATED,
            ProductionPlanEvent::ProductionPlanApproved(_) => Self::APPROVED,
            ProductionPlanEvent::ProductionPlanStarted(_) => Self::STARTED,
            ProductionPlanEvent::ProductionPlanCompleted(_) => Self::COMPLETED,
            ProductionPlanEvent::ProductionPlanCancelled(_) => Self::CANCELLED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductionPlanEvent::ProductionPlanCreated(e) => e.occurred_at,
            ProductionPlanEvent::ProductionPlanApproved(e) => e.occurred_at,
            ProductionPlanEvent::ProductionPlanStarted(e) => e.occurred_at,
            ProductionPlanEvent::ProductionPlanCompleted(e) => e.occurred_at,
            ProductionPlanEvent::ProductionPlanCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductionPlan {
    type Command = ProductionPlanCommand;
    type Event = ProductionPlanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductionPlanEvent::ProductionPlanCreated(e) => {
                self.id = e.plan_id;
                self.plan_number = e.plan_number.clone();
                self.product_id = Some(e.product_id);
                self.quantity = e.quantity;
                self.planned_start = Some(e.planned_start);
                self.planned_end = Some(e.planned_end);
                self.status = ProductionPlanStatus::Draft;
                self.created = true;
            }
            ProductionPlanEvent::ProductionPlanApproved(_) => {
                self.status = ProductionPlanStatus::Approved;
            }
            ProductionPlanEvent::ProductionPlanStarted(_) => {
                self.status = ProductionPlanStatus::InProgress;
            }
            ProductionPlanEvent::ProductionPlanCompleted(_) => {
                self.status = ProductionPlanStatus::Completed;
            }
            ProductionPlanEvent::ProductionPlanCancelled(_) => {
                self.status = ProductionPlanStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductionPlanCommand::CreateProductionPlan(cmd) => self.handle_create(cmd),
            ProductionPlanCommand::ApproveProductionPlan(cmd) => self.handle_approve(cmd),
            ProductionPlanCommand::StartProductionPlan(cmd) => self.handle_start(cmd),
            ProductionPlanCommand::CompleteProductionPlan(cmd) => self.handle_complete(cmd),
            ProductionPlanCommand::CancelProductionPlan(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl ProductionPlan {
    fn ensure_created(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_status(&self, expected: ProductionPlanStatus, action: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::state_conflict(format!(
                "cannot {action} a production plan in status {:?} (expected {:?})",
                self.status, expected
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProductionPlan) -> DomainResult<Vec<ProductionPlanEvent>> {
        cmd.validate()?;
        if self.created {
            return Err(DomainError::state_conflict("production plan already exists"));
        }

        Ok(vec![ProductionPlanEvent::ProductionPlanCreated(
            ProductionPlanCreated {
                plan_id: cmd.plan_id,
                plan_number: cmd.plan_number.trim().to_string(),
                product_id: cmd.product_id,
                quantity: cmd.quantity,
                planned_start: cmd.planned_start,
                planned_end: cmd.planned_end,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(&self, cmd: &ApproveProductionPlan) -> DomainResult<Vec<ProductionPlanEvent>> {
        self.ensure_created()?;
        self.ensure_status(ProductionPlanStatus::Draft, "approve")?;

        Ok(vec![ProductionPlanEvent::ProductionPlanApproved(
            ProductionPlanApproved {
                plan_id: self.id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_start(&self, cmd: &StartProductionPlan) -> DomainResult<Vec<ProductionPlanEvent>> {
        self.ensure_created()?;
        self.ensure_status(ProductionPlanStatus::Approved, "start")?;
        let product_id = self
            .product_id
            .ok_or_else(|| DomainError::state_conflict("production plan has no product"))?;

        Ok(vec![ProductionPlanEvent::ProductionPlanStarted(
            ProductionPlanStarted {
                plan_id: self.id,
                plan_number: self.plan_number.clone(),
                product_id,
                quantity: self.quantity,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_complete(
        &self,
        cmd: &CompleteProductionPlan,
    ) -> DomainResult<Vec<ProductionPlanEvent>> {
        self.ensure_created()?;
        self.ensure_status(ProductionPlanStatus::InProgress, "complete")?;

        Ok(vec![ProductionPlanEvent::ProductionPlanCompleted(
            ProductionPlanCompleted {
                plan_id: self.id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &CancelProductionPlan) -> DomainResult<Vec<ProductionPlanEvent>> {
        self.ensure_created()?;
        if self.status == ProductionPlanStatus::Completed {
            return Err(DomainError::state_conflict(
                "a completed production plan cannot be cancelled",
            ));
        }

        Ok(vec![ProductionPlanEvent::ProductionPlanCancelled(
            ProductionPlanCancelled {
                plan_id: self.id,
                previous_status: self.status,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
