use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult,
    aggregate_id_newtype, require_positive, require_text,
};
use shopfloor_events::{Command, Event};

use crate::work_order::WorkOrderId;

/// Work orders of at least this size are sampled instead of fully inspected.
pub const SAMPLING_THRESHOLD: u32 = 100;

aggregate_id_newtype!(
    /// Quality inspection identifier.
    QualityInspectionId
);

impl QualityInspectionId {
    /// The inspection generated for a work order.
    pub fn for_work_order(work_order_id: WorkOrderId) -> Self {
        Self(work_order_id.0.derive("quality-inspection"))
    }
}

/// Number of units to inspect for a work order of `quantity` units.
///
/// 10% (at least one) from [`SAMPLING_THRESHOLD`] upwards, full inspection below.
pub fn sample_quantity(quantity: u32) -> u32 {
    if quantity >= SAMPLING_THRESHOLD {
        (quantity / 10).max(1)
    } else {
        quantity
    }
}

/// `QC-{workOrderNumber}`.
pub fn inspection_number(work_order_number: &str) -> String {
    format!("QC-{work_order_number}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    Pending,
    InProgress,
    Completed,
}

/// Aggregate root: QualityInspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityInspection {
    id: QualityInspectionId,
    inspection_number: String,
    work_order_id: Option<WorkOrderId>,
    sample_quantity: u32,
    qualified_quantity: u32,
    unqualified_quantity: u32,
    remark: Option<String>,
    status: InspectionStatus,
    inspected_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl QualityInspection {
    pub fn empty(id: QualityInspectionId) -> Self {
        Self {
            id,
            inspection_number: String::new(),
            work_order_id: None,
            sample_quantity: 0,
            qualified_quantity: 0,
            unqualified_quantity: 0,
            remark: None,
            status: InspectionStatus::Pending,
            inspected_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> QualityInspectionId {
        self.id
    }

    pub fn inspection_number(&self) -> &str {
        &self.inspection_number
    }

    pub fn work_order_id(&self) -> Option<WorkOrderId> {
        self.work_order_id
    }

    pub fn sample_quantity(&self) -> u32 {
        self.sample_quantity
    }

    pub fn qualified_quantity(&self) -> u32 {
        self.qualified_quantity
    }

    pub fn unqualified_quantity(&self) -> u32 {
        self.unqualified_quantity
    }

    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    pub fn status(&self) -> InspectionStatus {
        self.status
    }

    pub fn inspected_at(&self) -> Option<DateTime<Utc>> {
        self.inspected_at
    }
}

impl AggregateRoot for QualityInspection {
    type Id = QualityInspectionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for QualityInspection {
    const AGGREGATE_TYPE: &'static str = "production.quality_inspection";

    fn empty(id: AggregateId) -> Self {
        QualityInspection::empty(QualityInspectionId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.inspection_number.clone())
    }
}

/// Command: CreateQualityInspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateQualityInspection {
    pub inspection_id: QualityInspectionId,
    pub inspection_number: String,
    pub work_order_id: WorkOrderId,
    pub sample_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartInspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartInspection {
    pub inspection_id: QualityInspectionId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Inspect (record the result).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspect {
    pub inspection_id: QualityInspectionId,
    pub qualified_quantity: u32,
    pub unqualified_quantity: u32,
    pub remark: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityInspectionCommand {
    CreateQualityInspection(CreateQualityInspection),
    StartInspection(StartInspection),
    Inspect(Inspect),
}

impl Command for QualityInspectionCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let inspection_id = match self {
            QualityInspectionCommand::CreateQualityInspection(c) => c.inspection_id,
            QualityInspectionCommand::StartInspection(c) => c.inspection_id,
            QualityInspectionCommand::Inspect(c) => c.inspection_id,
        };
        inspection_id.0
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            QualityInspectionCommand::CreateQualityInspection(c) => {
                require_text("inspection_number", &c.inspection_number)?;
                require_positive("sample_quantity", c.sample_quantity)
            }
            _ => Ok(()),
        }
    }
}

/// Event: QualityInspectionCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityInspectionCreated {
    pub inspection_id: QualityInspectionId,
    pub inspection_number: String,
    pub work_order_id: WorkOrderId,
    pub sample_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InspectionStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionStarted {
    pub inspection_id: QualityInspectionId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InspectionCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionCompleted {
    pub inspection_id: QualityInspectionId,
    pub work_order_id: WorkOrderId,
    pub qualified_quantity: u32,
    pub unqualified_quantity: u32,
    pub remark: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityInspectionEvent {
    QualityInspectionCreated(QualityInspectionCreated),
    InspectionStarted(InspectionStarted),
    InspectionCompleted(InspectionCompleted),
}

impl QualityInspectionEvent {
    pub const CREATED: &'static str = "production.quality_inspection.created";
    pub const STARTED: &'static str = "production.quality_inspection.started";
    pub const COMPLETED: &'static str = "production.quality_inspection.completed";
}

impl Event for QualityInspectionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QualityInspectionEvent::QualityInspectionCreated(_) => Self::CREATED,
            QualityInspectionEvent::InspectionStarted(_) => Self::STARTED,
            QualityInspectionEvent::InspectionCompleted(_) => Self::COMPLETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            QualityInspectionEvent::QualityInspectionCreated(e) => e.occurred_at,
            QualityInspectionEvent::InspectionStarted(e) => e.occurred_at,
            QualityInspectionEvent::InspectionCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for QualityInspection {
    type Command = QualityInspectionCommand;
    type Event = QualityInspectionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            QualityInspectionEvent::QualityInspectionCreated(e) => {
                self.id = e.inspection_id;
                self.inspection_number = e.inspection_number.clone();
                self.work_order_id = Some(e.work_order_id);
                self.sample_quantity = e.sample_quantity;
                self.status = InspectionStatus::Pending;
                self.created = true;
            }
            QualityInspectionEvent::InspectionStarted(_) => {
                self.status = InspectionStatus::InProgress;
            }
            QualityInspectionEvent::InspectionCompleted(e) => {
                self.qualified_quantity = e.qualified_quantity;
                self.unqualified_quantity = e.unqualified_quantity;
                self.remark = e.remark.clone();
                self.inspected_at = Some(e.occurred_at);
                self.status = InspectionStatus::Completed;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            QualityInspectionCommand::CreateQualityInspection(cmd) => self.handle_create(cmd),
            QualityInspectionCommand::StartInspection(cmd) => self.handle_start(cmd),
            QualityInspectionCommand::Inspect(cmd) => self.handle_inspect(cmd),
        }
    }
}

impl QualityInspection {
    fn ensure_open(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status == InspectionStatus::Completed {
            return Err(DomainError::state_conflict(
                "quality inspection is already completed",
            ));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreateQualityInspection,
    ) -> DomainResult<Vec<QualityInspectionEvent>> {
        require_text("inspection_number", &cmd.inspection_number)?;
        require_positive("sample_quantity", cmd.sample_quantity)?;
        if self.created {
            return Err(DomainError::state_conflict(
                "quality inspection already exists",
            ));
        }

        Ok(vec![QualityInspectionEvent::QualityInspectionCreated(
            QualityInspectionCreated {
                inspection_id: cmd.inspection_id,
                inspection_number: cmd.inspection_number.clone(),
                work_order_id: cmd.work_order_id,
                sample_quantity: cmd.sample_quantity,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_start(&self, cmd: &StartInspection) -> DomainResult<Vec<QualityInspectionEvent>> {
        self.ensure_open()?;
        if self.status != InspectionStatus::Pending {
            return Err(DomainError::state_conflict(format!(
                "cannot start a quality inspection in status {:?}",
                self.status
            )));
        }

        Ok(vec![QualityInspectionEvent::InspectionStarted(
            InspectionStarted {
                inspection_id: self.id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_inspect(&self, cmd: &Inspect) -> DomainResult<Vec<QualityInspectionEvent>> {
        self.ensure_open()?;

        let total = u64::from(cmd.qualified_quantity) + u64::from(cmd.unqualified_quantity);
        if total != u64::from(self.sample_quantity) {
            return Err(DomainError::state_conflict(format!(
                "qualified ({}) + unqualified ({}) must equal the sample quantity ({})",
                cmd.qualified_quantity, cmd.unqualified_quantity, self.sample_quantity
            )));
        }
        let work_order_id = self
            .work_order_id
            .ok_or_else(|| DomainError::state_conflict("quality inspection has no work order"))?;

        Ok(vec![QualityInspectionEvent::InspectionCompleted(
            InspectionCompleted {
                inspection_id: self.id,
                work_order_id,
                qualified_quantity: cmd.qualified_quantity,
                unqualified_quantity: cmd.unqualified_quantity,
                remark: cmd
                    .remark
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
