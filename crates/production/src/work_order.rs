use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult, ProductId,
    aggregate_id_newtype, require_positive, require_text,
};
use shopfloor_events::{Command, Event};

use crate::plan::ProductionPlanId;
use crate::routing::RoutingId;

aggregate_id_newtype!(
    /// Work order identifier.
    WorkOrderId
);

impl WorkOrderId {
    /// The work order generated for a production plan.
    pub fn for_plan(plan_id: ProductionPlanId) -> Self {
        Self(plan_id.0.derive("work-order"))
    }
}

/// Work order number for a plan started at `started_at`: `WO-{planNumber}-{yyyyMMddHHmmss}`.
pub fn work_order_number(plan_number: &str, started_at: DateTime<Utc>) -> String {
    format!("WO-{}-{}", plan_number, started_at.format("%Y%m%d%H%M%S"))
}

/// Work order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Created,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

/// Aggregate root: WorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrder {
    id: WorkOrderId,
    work_order_number: String,
    production_plan_id: Option<ProductionPlanId>,
    product_id: Option<ProductId>,
    routing_id: Option<RoutingId>,
    quantity: u32,
    completed_quantity: u32,
    status: WorkOrderStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl WorkOrder {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: WorkOrderId) -> Self {
        Self {
            id,
            work_order_number: String::new(),
            production_plan_id: None,
            product_id: None,
            routing_id: None,
            quantity: 0,
            completed_quantity: 0,
            status: WorkOrderStatus::Created,
            start_time: None,
            end_time: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> WorkOrderId {
        self.id
    }

    pub fn work_order_number(&self) -> &str {
        &self.work_order_number
    }

    pub fn production_plan_id(&self) -> Option<ProductionPlanId> {
        self.production_plan_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn routing_id(&self) -> Option<RoutingId> {
        self.routing_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn completed_quantity(&self) -> u32 {
        self.completed_quantity
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.quantity - self.completed_quantity
    }

    pub fn status(&self) -> WorkOrderStatus {
        self.status
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }
}

impl AggregateRoot for WorkOrder {
    type Id = WorkOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for WorkOrder {
    const AGGREGATE_TYPE: &'static str = "production.work_order";

    fn empty(id: AggregateId) -> Self {
        WorkOrder::empty(WorkOrderId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.work_order_number.clone())
    }
}

/// Command: CreateWorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWorkOrder {
    pub work_order_id: WorkOrderId,
    pub work_order_number: String,
    pub production_plan_id: ProductionPlanId,
    pub product_id: ProductId,
    pub routing_id: RoutingId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartWorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWorkOrder {
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PauseWorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseWorkOrder {
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResumeWorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeWorkOrder {
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReportProgress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportProgress {
    pub work_order_id: WorkOrderId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelWorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelWorkOrder {
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOrderCommand {
    CreateWorkOrder(CreateWorkOrder),
    StartWorkOrder(StartWorkOrder),
    PauseWorkOrder(PauseWorkOrder),
    ResumeWorkOrder(ResumeWorkOrder),
    ReportProgress(ReportProgress),
    CancelWorkOrder(CancelWorkOrder),
}

impl Command for WorkOrderCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let work_order_id = match self {
            WorkOrderCommand::CreateWorkOrder(c) => c.work_order_id,
            WorkOrderCommand::StartWorkOrder(c) => c.work_order_id,
            WorkOrderCommand::PauseWorkOrder(c) => c.work_order_id,
            WorkOrderCommand::ResumeWorkOrder(c) => c.work_order_id,
            WorkOrderCommand::ReportProgress(c) => c.work_order_id,
            WorkOrderCommand::CancelWorkOrder(c) => c.work_order_id,
        };
        work_order_id.0
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            WorkOrderCommand::CreateWorkOrder(c) => {
                require_text("work_order_number", &c.work_order_number)?;
                require_positive("quantity", c.quantity)
            }
            WorkOrderCommand::ReportProgress(c) => require_positive("quantity", c.quantity),
            _ => Ok(()),
        }
    }
}

/// Event: WorkOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderCreated {
    pub work_order_id: WorkOrderId,
    pub work_order_number: String,
    pub production_plan_id: ProductionPlanId,
    pub product_id: ProductId,
    pub routing_id: RoutingId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WorkOrderStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderStarted {
    pub work_order_id: WorkOrderId,
    pub routing_id: RoutingId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WorkOrderPaused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderPaused {
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WorkOrderResumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderResumed {
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProgressReported (completion threshold not reached).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReported {
    pub work_order_id: WorkOrderId,
    pub reported_quantity: u32,
    pub completed_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WorkOrderCompleted (the report that reached `quantity`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderCompleted {
    pub work_order_id: WorkOrderId,
    pub reported_quantity: u32,
    pub completed_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WorkOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderCancelled {
    pub work_order_id: WorkOrderId,
    pub previous_status: WorkOrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOrderEvent {
    WorkOrderCreated(WorkOrderCreated),
    WorkOrderStarted(WorkOrderStarted),
    WorkOrderPaused(WorkOrderPaused),
    WorkOrderResumed(WorkOrderResumed),
    ProgressReported(ProgressReported),
    WorkOrderCompleted(WorkOrderCompleted),
    WorkOrderCancelled(WorkOrderCancelled),
}

impl WorkOrderEvent {
    pub const CREATED: &'static str = "production.work_order.created";
    pub const STARTED: &'static str = "production.work_order.started";
    pub const PAUSED: &'static str = "production.work_order.paused";
    pub const RESUMED: &'static str = "production.work_order.resumed";
    pub const PROGRESS_REPORTED: &'static str = "production.work_order.progress_reported";
    pub const COMPLETED: &'static str = "production.work_order.completed";
    pub const CANCELLED: &'static str = "production.work_order.cancelled";
}

impl Event for WorkOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkOrderEvent::WorkOrderCreated(_) => Self::CREATED,
            WorkOrderEvent::WorkOrderStarted(_) => Self::STARTED,
            WorkOrderEvent::WorkOrderPaused(_) => Self::PAUSED,
            WorkOrderEvent::WorkOrderResumed(_) => Self::RESUMED,
            WorkOrderEvent::ProgressReported(_) => Self::PROGRESS_REPORTED,
            WorkOrderEvent::WorkOrderCompleted(_) => Self::COMPLETED,
            WorkOrderEvent::WorkOrderCancelled(_) => Self::CANCELLED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WorkOrderEvent::WorkOrderCreated(e) => e.occurred_at,
            WorkOrderEvent::WorkOrderStarted(e) => e.occurred_at,
            WorkOrderEvent::WorkOrderPaused(e) => e.occurred_at,
            WorkOrderEvent::WorkOrderResumed(e) => e.occurred_at,
            WorkOrderEvent::ProgressReported(e) => e.occurred_at,
            WorkOrderEvent::WorkOrderCompleted(e) => e.occurred_at,
            WorkOrderEvent::WorkOrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for WorkOrder {
    type Command = WorkOrderCommand;
    type Event = WorkOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WorkOrderEvent::WorkOrderCreated(e) => {
                self.id = e.work_order_id;
                self.work_order_number = e.work_order_number.clone();
                self.production_plan_id = Some(e.production_plan_id);
                self.product_id = Some(e.product_id);
                self.routing_id = Some(e.routing_id);
                self.quantity = e.quantity;
                self.completed_quantity = 0;
                self.status = WorkOrderStatus::Created;
                self.created = true;
            }
            WorkOrderEvent::WorkOrderStarted(e) => {
                self.status = WorkOrderStatus::InProgress;
                if self.start_time.is_none() {
                    self.start_time = Some(e.occurred_at);
                }
            }
            WorkOrderEvent::WorkOrderPaused(_) => {
                self.status = WorkOrderStatus::Paused;
            }
            WorkOrderEvent::WorkOrderResumed(_) => {
                self.status = WorkOrderStatus::InProgress;
            }
            WorkOrderEvent::ProgressReported(e) => {
                self.completed_quantity = e.completed_quantity;
            }
            WorkOrderEvent::WorkOrderCompleted(e) => {
                self.completed_quantity = e.completed_quantity;
                self.status = WorkOrderStatus::Completed;
                self.end_time = Some(e.occurred_at);
            }
            WorkOrderEvent::WorkOrderCancelled(_) => {
                self.status = WorkOrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, WorkOrderCommand::CreateWorkOrder(_)) && !self.created {
            return Err(DomainError::not_found());
        }

        match command {
            WorkOrderCommand::CreateWorkOrder(cmd) => self.handle_create(cmd),
            WorkOrderCommand::StartWorkOrder(cmd) => self.handle_start(cmd),
            WorkOrderCommand::PauseWorkOrder(cmd) => self.handle_pause(cmd),
            WorkOrderCommand::ResumeWorkOrder(cmd) => self.handle_resume(cmd),
            WorkOrderCommand::ReportProgress(cmd) => self.handle_report_progress(cmd),
            WorkOrderCommand::CancelWorkOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl WorkOrder {
    fn state_conflict(&self, action: &str) -> DomainError {
        DomainError::state_conflict(format!(
            "cannot {action} a work order in status {:?}",
            self.status
        ))
    }

    fn handle_create(&self, cmd: &CreateWorkOrder) -> DomainResult<Vec<WorkOrderEvent>> {
        require_text("work_order_number", &cmd.work_order_number)?;
        require_positive("quantity", cmd.quantity)?;
        if self.created {
            return Err(DomainError::state_conflict("work order already exists"));
        }

        Ok(vec![WorkOrderEvent::WorkOrderCreated(WorkOrderCreated {
            work_order_id: cmd.work_order_id,
            work_order_number: cmd.work_order_number.clone(),
            production_plan_id: cmd.production_plan_id,
            product_id: cmd.product_id,
            routing_id: cmd.routing_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start(&self, cmd: &StartWorkOrder) -> DomainResult<Vec<WorkOrderEvent>> {
        if !matches!(self.status, WorkOrderStatus::Created | WorkOrderStatus::Paused) {
            return Err(self.state_conflict("start"));
        }
        let routing_id = self
            .routing_id
            .ok_or_else(|| DomainError::state_conflict("work order has no routing"))?;

        Ok(vec![WorkOrderEvent::WorkOrderStarted(WorkOrderStarted {
            work_order_id: self.id,
            routing_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pause(&self, cmd: &PauseWorkOrder) -> DomainResult<Vec<WorkOrderEvent>> {
        if self.status != WorkOrderStatus::InProgress {
            return Err(self.state_conflict("pause"));
        }

        Ok(vec![WorkOrderEvent::WorkOrderPaused(WorkOrderPaused {
            work_order_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resume(&self, cmd: &ResumeWorkOrder) -> DomainResult<Vec<WorkOrderEvent>> {
        if self.status != WorkOrderStatus::Paused {
            return Err(self.state_conflict("resume"));
        }

        Ok(vec![WorkOrderEvent::WorkOrderResumed(WorkOrderResumed {
            work_order_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_report_progress(&self, cmd: &ReportProgress) -> DomainResult<Vec<WorkOrderEvent>> {
        require_positive("quantity", cmd.quantity)?;
        if self.status != WorkOrderStatus::InProgress {
            return Err(self.state_conflict("report progress on"));
        }

        let completed_quantity = self
            .completed_quantity
            .checked_add(cmd.quantity)
            .filter(|total| *total <= self.quantity)
            .ok_or_else(|| {
                DomainError::state_conflict(format!(
                    "reporting {} would exceed the work order quantity ({} of {} completed)",
                    cmd.quantity, self.completed_quantity, self.quantity
                ))
            })?;

        let event = if completed_quantity == self.quantity {
            WorkOrderEvent::WorkOrderCompleted(WorkOrderCompleted {
                work_order_id: self.id,
                reported_quantity: cmd.quantity,
                completed_quantity,
                occurred_at: cmd.occurred_at,
            })
        } else {
            WorkOrderEvent::ProgressReported(ProgressReported {
                work_order_id: self.id,
                reported_quantity: cmd.quantity,
                completed_quantity,
                occurred_at: cmd.occurred_at,
            })
        };

        Ok(vec![event])
    }

    fn handle_cancel(&self, cmd: &CancelWorkOrder) -> DomainResult<Vec<WorkOrderEvent>> {
        if self.status == WorkOrderStatus::Completed {
            return Err(DomainError::state_conflict(
                "a completed work order cannot be cancelled",
            ));
        }

        Ok(vec![WorkOrderEvent::WorkOrderCancelled(WorkOrderCancelled {
            work_order_id: self.id,
            previous_status: self.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shopfloor_core::Tracked;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_work_order(quantity: u32) -> WorkOrder {
        let work_order_id = WorkOrderId::generate();
        let mut work_order = WorkOrder::empty(work_order_id);
        let cmd = CreateWorkOrder {
            work_order_id,
            work_order_number: "WO-PP-1-20240101080000".to_string(),
            production_plan_id: ProductionPlanId::generate(),
            product_id: ProductId::new(),
            routing_id: RoutingId::generate(),
            quantity,
            occurred_at: test_time(),
        };
        let events = work_order
            .handle(&WorkOrderCommand::CreateWorkOrder(cmd))
            .unwrap();
        work_order.apply(&events[0]);
        work_order
    }

    fn started_work_order(quantity: u32) -> WorkOrder {
        let mut work_order = created_work_order(quantity);
        let events = work_order.handle(&start(&work_order)).unwrap();
        work_order.apply(&events[0]);
        work_order
    }

    fn start(work_order: &WorkOrder) -> WorkOrderCommand {
        WorkOrderCommand::StartWorkOrder(StartWorkOrder {
            work_order_id: work_order.id_typed(),
            occurred_at: test_time(),
        })
    }

    fn pause(work_order: &WorkOrder) -> WorkOrderCommand {
        WorkOrderCommand::PauseWorkOrder(PauseWorkOrder {
            work_order_id: work_order.id_typed(),
            occurred_at: test_time(),
        })
    }

    fn report(work_order: &WorkOrder, quantity: u32) -> WorkOrderCommand {
        WorkOrderCommand::ReportProgress(ReportProgress {
            work_order_id: work_order.id_typed(),
            quantity,
            occurred_at: test_time(),
        })
    }

    fn cancel(work_order: &WorkOrder) -> WorkOrderCommand {
        WorkOrderCommand::CancelWorkOrder(CancelWorkOrder {
            work_order_id: work_order.id_typed(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn work_order_number_uses_plan_number_and_timestamp() {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(
            work_order_number("PP-7", started_at),
            "WO-PP-7-20240305140709"
        );
    }

    #[test]
    fn for_plan_is_deterministic() {
        let plan_id = ProductionPlanId::generate();
        assert_eq!(WorkOrderId::for_plan(plan_id), WorkOrderId::for_plan(plan_id));
    }

    #[test]
    fn start_sets_start_time_once() {
        let mut tracked = Tracked::new(created_work_order(10));
        let cmd = start(tracked.aggregate());
        tracked.execute(&cmd).unwrap();
        let first_start = tracked.aggregate().start_time();
        assert!(first_start.is_some());

        let cmd = pause(tracked.aggregate());
        tracked.execute(&cmd).unwrap();
        let cmd = start(tracked.aggregate());
        tracked.execute(&cmd).unwrap();

        assert_eq!(tracked.aggregate().status(), WorkOrderStatus::InProgress);
        assert_eq!(tracked.aggregate().start_time(), first_start);
    }

    #[test]
    fn resume_only_from_paused() {
        let mut tracked = Tracked::new(started_work_order(10));
        let resume = WorkOrderCommand::ResumeWorkOrder(ResumeWorkOrder {
            work_order_id: tracked.aggregate().id_typed(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            tracked.execute(&resume),
            Err(DomainError::StateConflict(_))
        ));

        let cmd = pause(tracked.aggregate());
        tracked.execute(&cmd).unwrap();
        let events = tracked.execute(&resume).unwrap();
        assert!(matches!(events[0], WorkOrderEvent::WorkOrderResumed(_)));
        assert_eq!(tracked.aggregate().status(), WorkOrderStatus::InProgress);
    }

    #[test]
    fn report_progress_requires_in_progress() {
        let work_order = created_work_order(10);
        let err = work_order.handle(&report(&work_order, 1)).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
    }

    #[test]
    fn report_progress_rejects_zero() {
        let work_order = started_work_order(10);
        let cmd = report(&work_order, 0);

        assert!(matches!(cmd.validate(), Err(DomainError::Validation(_))));
        assert!(matches!(
            work_order.handle(&cmd),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn partial_report_emits_only_progress_reported() {
        let work_order = started_work_order(10);
        let events = work_order.handle(&report(&work_order, 4)).unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            WorkOrderEvent::ProgressReported(e) => {
                assert_eq!(e.reported_quantity, 4);
                assert_eq!(e.completed_quantity, 4);
            }
            _ => panic!("Expected ProgressReported event"),
        }
    }

    #[test]
    fn final_report_emits_only_completed() {
        let mut tracked = Tracked::new(started_work_order(10));
        let cmd = report(tracked.aggregate(), 4);
        tracked.execute(&cmd).unwrap();

        let cmd = report(tracked.aggregate(), 6);
        let events = tracked.execute(&cmd).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WorkOrderEvent::WorkOrderCompleted(_)));

        let work_order = tracked.aggregate();
        assert_eq!(work_order.status(), WorkOrderStatus::Completed);
        assert_eq!(work_order.completed_quantity(), 10);
        assert!(work_order.end_time().is_some());
    }

    #[test]
    fn over_report_is_rejected_and_changes_nothing() {
        let mut tracked = Tracked::new(started_work_order(10));
        let cmd = report(tracked.aggregate(), 7);
        tracked.execute(&cmd).unwrap();
        let before = tracked.aggregate().clone();

        let cmd = report(tracked.aggregate(), 4);
        let err = tracked.execute(&cmd).unwrap_err();

        assert!(matches!(err, DomainError::StateConflict(_)));
        assert_eq!(tracked.aggregate(), &before);
        assert_eq!(tracked.pending_events().len(), 1);
    }

    #[test]
    fn cancel_allowed_until_completed() {
        let mut tracked = Tracked::new(started_work_order(5));
        let cmd = cancel(tracked.aggregate());
        tracked.execute(&cmd).unwrap();
        assert_eq!(tracked.aggregate().status(), WorkOrderStatus::Cancelled);

        let mut completed = Tracked::new(started_work_order(5));
        let cmd = report(completed.aggregate(), 5);
        completed.execute(&cmd).unwrap();
        let cmd = cancel(completed.aggregate());
        assert!(matches!(
            completed.execute(&cmd),
            Err(DomainError::StateConflict(_))
        ));
    }

    #[test]
    fn missing_work_order_is_not_found() {
        let work_order = WorkOrder::empty(WorkOrderId::generate());
        assert_eq!(
            work_order.handle(&start(&work_order)).unwrap_err(),
            DomainError::NotFound
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Split `total` into positive parts using the given cut points.
        fn partition(total: u32, cuts: &[u32]) -> Vec<u32> {
            let mut points: Vec<u32> = cuts.iter().map(|c| c % total).filter(|c| *c > 0).collect();
            points.sort_unstable();
            points.dedup();

            let mut parts = Vec::new();
            let mut last = 0;
            for p in points {
                parts.push(p - last);
                last = p;
            }
            parts.push(total - last);
            parts
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: any positive partition of `quantity` completes exactly once, on the last report.
            #[test]
            fn partial_reports_complete_exactly_once(
                quantity in 1u32..500,
                cuts in proptest::collection::vec(any::<u32>(), 0..20),
            ) {
                let parts = partition(quantity, &cuts);
                prop_assert_eq!(parts.iter().sum::<u32>(), quantity);

                let mut tracked = Tracked::new(started_work_order(quantity));
                for part in &parts {
                    let cmd = report(tracked.aggregate(), *part);
                    let recorded = tracked.execute(&cmd).map(|events| events.len());
                    prop_assert_eq!(recorded, Ok(1));
                }

                let completed = tracked
                    .pending_events()
                    .iter()
                    .filter(|e| matches!(e, WorkOrderEvent::WorkOrderCompleted(_)))
                    .count();
                prop_assert_eq!(completed, 1);
                prop_assert!(matches!(
                    tracked.pending_events().last(),
                    Some(WorkOrderEvent::WorkOrderCompleted(_))
                ));
                prop_assert_eq!(tracked.aggregate().status(), WorkOrderStatus::Completed);
                prop_assert_eq!(tracked.aggregate().completed_quantity(), quantity);
            }

            /// Property: a report pushing past `quantity` is rejected without mutation.
            #[test]
            fn over_report_never_mutates(
                quantity in 1u32..500,
                done in 0u32..500,
                extra in 1u32..500,
            ) {
                let done = done % quantity;
                let mut tracked = Tracked::new(started_work_order(quantity));
                if done > 0 {
                    let cmd = report(tracked.aggregate(), done);
                    tracked.execute(&cmd).unwrap();
                }
                let remaining = quantity - done;
                let too_much = remaining + extra;
                let before = tracked.aggregate().clone();

                let cmd = report(tracked.aggregate(), too_much);
                let rejected = matches!(tracked.execute(&cmd), Err(DomainError::StateConflict(_)));
                prop_assert!(rejected);
                prop_assert_eq!(tracked.aggregate(), &before);
            }
        }
    }
}
