use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult,
    WorkCenterId, aggregate_id_newtype, require_text,
};
use shopfloor_events::{Command, Event};
use shopfloor_production::WorkOrderId;

aggregate_id_newtype!(
    /// Equipment identifier.
    EquipmentId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Machine,
    Tool,
    Fixture,
}

/// Equipment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    Idle,
    Running,
    Maintenance,
    Fault,
}

/// Aggregate root: Equipment.
///
/// `current_work_order` is set only by an assignment and cleared on every
/// transition back to `Idle`, so a piece of equipment is never attached to two
/// work orders at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    id: EquipmentId,
    code: String,
    name: String,
    kind: EquipmentKind,
    work_center_id: Option<WorkCenterId>,
    current_work_order: Option<WorkOrderId>,
    status: EquipmentStatus,
    version: u64,
    created: bool,
}

impl Equipment {
    pub fn empty(id: EquipmentId) -> Self {
        Self {
            id,
            code: String::new(),
            name: String::new(),
            kind: EquipmentKind::Machine,
            work_center_id: None,
            current_work_order: None,
            status: EquipmentStatus::Idle,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> EquipmentId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EquipmentKind {
        self.kind
    }

    pub fn work_center_id(&self) -> Option<WorkCenterId> {
        self.work_center_id
    }

    pub fn current_work_order(&self) -> Option<WorkOrderId> {
        self.current_work_order
    }

    pub fn status(&self) -> EquipmentStatus {
        self.status
    }
}

impl AggregateRoot for Equipment {
    type Id = EquipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for Equipment {
    const AGGREGATE_TYPE: &'static str = "equipment.equipment";

    fn empty(id: AggregateId) -> Self {
        Equipment::empty(EquipmentId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.code.clone())
    }
}

/// Command: RegisterEquipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEquipment {
    pub equipment_id: EquipmentId,
    pub code: String,
    pub name: String,
    pub kind: EquipmentKind,
    pub work_center_id: Option<WorkCenterId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateEquipmentInfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEquipmentInfo {
    pub equipment_id: EquipmentId,
    pub code: String,
    pub name: String,
    pub kind: EquipmentKind,
    pub work_center_id: Option<WorkCenterId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignToWorkOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignToWorkOrder {
    pub equipment_id: EquipmentId,
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseEquipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEquipment {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMaintenance {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMaintenance {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFault {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairFault {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentCommand {
    RegisterEquipment(RegisterEquipment),
    UpdateEquipmentInfo(UpdateEquipmentInfo),
    AssignToWorkOrder(AssignToWorkOrder),
    ReleaseEquipment(ReleaseEquipment),
    StartMaintenance(StartMaintenance),
    CompleteMaintenance(CompleteMaintenance),
    ReportFault(ReportFault),
    RepairFault(RepairFault),
}

impl Command for EquipmentCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let equipment_id = match self {
            EquipmentCommand::RegisterEquipment(c) => c.equipment_id,
            EquipmentCommand::UpdateEquipmentInfo(c) => c.equipment_id,
            EquipmentCommand::AssignToWorkOrder(c) => c.equipment_id,
            EquipmentCommand::ReleaseEquipment(c) => c.equipment_id,
            EquipmentCommand::StartMaintenance(c) => c.equipment_id,
            EquipmentCommand::CompleteMaintenance(c) => c.equipment_id,
            EquipmentCommand::ReportFault(c) => c.equipment_id,
            EquipmentCommand::RepairFault(c) => c.equipment_id,
        };
        equipment_id.0
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            EquipmentCommand::RegisterEquipment(c) => validate_info(&c.code, &c.name),
            EquipmentCommand::UpdateEquipmentInfo(c) => validate_info(&c.code, &c.name),
            _ => Ok(()),
        }
    }
}

fn validate_info(code: &str, name: &str) -> DomainResult<()> {
    require_text("code", code)?;
    require_text("name", name)
}

/// Event: EquipmentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRegistered {
    pub equipment_id: EquipmentId,
    pub code: String,
    pub name: String,
    pub kind: EquipmentKind,
    pub work_center_id: Option<WorkCenterId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentInfoUpdated {
    pub equipment_id: EquipmentId,
    pub code: String,
    pub name: String,
    pub kind: EquipmentKind,
    pub work_center_id: Option<WorkCenterId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EquipmentAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentAssigned {
    pub equipment_id: EquipmentId,
    pub work_order_id: WorkOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EquipmentReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentReleased {
    pub equipment_id: EquipmentId,
    pub work_order_id: Option<WorkOrderId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStarted {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceCompleted {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentFaultReported {
    pub equipment_id: EquipmentId,
    pub previous_status: EquipmentStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentFaultRepaired {
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentEvent {
    EquipmentRegistered(EquipmentRegistered),
    EquipmentInfoUpdated(EquipmentInfoUpdated),
    EquipmentAssigned(EquipmentAssigned),
    EquipmentReleased(EquipmentReleased),
    MaintenanceStarted(MaintenanceStarted),
    MaintenanceCompleted(MaintenanceCompleted),
    EquipmentFaultReported(EquipmentFaultReported),
    EquipmentFaultRepaired(EquipmentFaultRepaired),
}

impl EquipmentEvent {
    pub const REGISTERED: &'static str = "equipment.registered";
    pub const INFO_UPDATED: &'static str = "equipment.info_updated";
    pub const ASSIGNED: &'static str = "equipment.assigned";
    pub const RELEASED: &'static str = "equipment.released";
    pub const MAINTENANCE_STARTED: &'static str = "equipment.maintenance_started";
    pub const MAINTENANCE_COMPLETED: &'static str = "equipment.maintenance_completed";
    pub const FAULT_REPORTED: &'static str = "equipment.fault_reported";
    pub const FAULT_REPAIRED: &'static str = "equipment.fault_repaired";
}

impl Event for EquipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EquipmentEvent::EquipmentRegistered(_) => Self::REGISTERED,
            EquipmentEvent::EquipmentInfoUpdated(_) => Self::INFO_UPDATED,
            EquipmentEvent::EquipmentAssigned(_) => Self::ASSIGNED,
            EquipmentEvent::EquipmentReleased(_) => Self::RELEASED,
            EquipmentEvent::MaintenanceStarted(_) => Self::MAINTENANCE_STARTED,
            EquipmentEvent::MaintenanceCompleted(_) => Self::MAINTENANCE_COMPLETED,
            EquipmentEvent::EquipmentFaultReported(_) => Self::FAULT_REPORTED,
            EquipmentEvent::EquipmentFaultRepaired(_) => Self::FAULT_REPAIRED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EquipmentEvent::EquipmentRegistered(e) => e.occurred_at,
            EquipmentEvent::EquipmentInfoUpdated(e) => e.occurred_at,
            EquipmentEvent::EquipmentAssigned(e) => e.occurred_at,
            EquipmentEvent::EquipmentReleased(e) => e.occurred_at,
            EquipmentEvent::MaintenanceStarted(e) => e.occurred_at,
            EquipmentEvent::MaintenanceCompleted(e) => e.occurred_at,
            EquipmentEvent::EquipmentFaultReported(e) => e.occurred_at,
            EquipmentEvent::EquipmentFaultRepaired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Equipment {
    type Command = EquipmentCommand;
    type Event = EquipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EquipmentEvent::EquipmentRegistered(e) => {
                self.id = e.equipment_id;
                self.code = e.code.clone();
                self.name = e.name.clone();
                self.kind = e.kind;
                self.work_center_id = e.work_center_id;
                self.current_work_order = None;
                self.status = EquipmentStatus::Idle;
                self.created = true;
            }
            EquipmentEvent::EquipmentInfoUpdated(e) => {
                self.code = e.code.clone();
                self.name = e.name.clone();
                self.kind = e.kind;
                self.work_center_id = e.work_center_id;
            }
            EquipmentEvent::EquipmentAssigned(e) => {
                self.current_work_order = Some(e.work_order_id);
                self.status = EquipmentStatus::Running;
            }
            EquipmentEvent::MaintenanceStarted(_) => {
                self.status = EquipmentStatus::Maintenance;
            }
            EquipmentEvent::EquipmentFaultReported(_) => {
                self.status = EquipmentStatus::Fault;
            }
            EquipmentEvent::EquipmentReleased(_)
            | EquipmentEvent::MaintenanceCompleted(_)
            | EquipmentEvent::EquipmentFaultRepaired(_) => {
                self.current_work_order = None;
                self.status = EquipmentStatus::Idle;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let EquipmentCommand::RegisterEquipment(cmd) = command {
            return self.handle_register(cmd);
        }
        if !self.created {
            return Err(DomainError::not_found());
        }

        let event = match command {
            EquipmentCommand::RegisterEquipment(cmd) => return self.handle_register(cmd),
            EquipmentCommand::UpdateEquipmentInfo(cmd) => {
                validate_info(&cmd.code, &cmd.name)?;
                self.reject_if(EquipmentStatus::Running, "update a running equipment")?;
                EquipmentEvent::EquipmentInfoUpdated(EquipmentInfoUpdated {
                    equipment_id: self.id,
                    code: cmd.code.trim().to_string(),
                    name: cmd.name.trim().to_string(),
                    kind: cmd.kind,
                    work_center_id: cmd.work_center_id,
                    occurred_at: cmd.occurred_at,
                })
            }
            EquipmentCommand::AssignToWorkOrder(cmd) => {
                self.require(EquipmentStatus::Idle, "assign")?;
                EquipmentEvent::EquipmentAssigned(EquipmentAssigned {
                    equipment_id: self.id,
                    work_order_id: cmd.work_order_id,
                    occurred_at: cmd.occurred_at,
                })
            }
            EquipmentCommand::ReleaseEquipment(cmd) => {
                self.require(EquipmentStatus::Running, "release")?;
                EquipmentEvent::EquipmentReleased(EquipmentReleased {
                    equipment_id: self.id,
                    work_order_id: self.current_work_order,
                    occurred_at: cmd.occurred_at,
                })
            }
            EquipmentCommand::StartMaintenance(cmd) => {
                self.reject_if(EquipmentStatus::Running, "start maintenance on")?;
                self.reject_if(EquipmentStatus::Maintenance, "start maintenance on")?;
                EquipmentEvent::MaintenanceStarted(MaintenanceStarted {
                    equipment_id: self.id,
                    occurred_at: cmd.occurred_at,
                })
            }
            EquipmentCommand::CompleteMaintenance(cmd) => {
                self.require(EquipmentStatus::Maintenance, "complete maintenance on")?;
                EquipmentEvent::MaintenanceCompleted(MaintenanceCompleted {
                    equipment_id: self.id,
                    occurred_at: cmd.occurred_at,
                })
            }
            EquipmentCommand::ReportFault(cmd) => {
                self.reject_if(EquipmentStatus::Fault, "report a fault on")?;
                EquipmentEvent::EquipmentFaultReported(EquipmentFaultReported {
                    equipment_id: self.id,
                    previous_status: self.status,
                    occurred_at: cmd.occurred_at,
                })
            }
            EquipmentCommand::RepairFault(cmd) => {
                self.require(EquipmentStatus::Fault, "repair")?;
                EquipmentEvent::EquipmentFaultRepaired(EquipmentFaultRepaired {
                    equipment_id: self.id,
                    occurred_at: cmd.occurred_at,
                })
            }
        };

        Ok(vec![event])
    }
}

impl Equipment {
    fn require(&self, expected: EquipmentStatus, action: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::state_conflict(format!(
                "cannot {action} equipment {} in status {:?} (expected {:?})",
                self.code, self.status, expected
            )));
        }
        Ok(())
    }

    fn reject_if(&self, forbidden: EquipmentStatus, action: &str) -> DomainResult<()> {
        if self.status == forbidden {
            return Err(DomainError::state_conflict(format!(
                "cannot {action} equipment {} in status {:?}",
                self.code, self.status
            )));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterEquipment) -> DomainResult<Vec<EquipmentEvent>> {
        validate_info(&cmd.code, &cmd.name)?;
        if self.created {
            return Err(DomainError::state_conflict("equipment already exists"));
        }

        Ok(vec![EquipmentEvent::EquipmentRegistered(
            EquipmentRegistered {
                equipment_id: cmd.equipment_id,
                code: cmd.code.trim().to_string(),
                name: cmd.name.trim().to_string(),
                kind: cmd.kind,
                work_center_id: cmd.work_center_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfloor_core::Tracked;

    fn registered() -> Tracked<Equipment> {
        let equipment_id = EquipmentId::generate();
        let mut tracked = Tracked::new(Equipment::empty(equipment_id));
        tracked
            .execute(&EquipmentCommand::RegisterEquipment(RegisterEquipment {
                equipment_id,
                code: "EQ-001".to_string(),
                name: "CNC lathe".to_string(),
                kind: EquipmentKind::Machine,
                work_center_id: Some(WorkCenterId::new()),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        tracked
    }

    fn assign(equipment: &Equipment, work_order_id: WorkOrderId) -> EquipmentCommand {
        EquipmentCommand::AssignToWorkOrder(AssignToWorkOrder {
            equipment_id: equipment.id_typed(),
            work_order_id,
            occurred_at: Utc::now(),
        })
    }

    fn release(equipment: &Equipment) -> EquipmentCommand {
        EquipmentCommand::ReleaseEquipment(ReleaseEquipment {
            equipment_id: equipment.id_typed(),
            occurred_at: Utc::now(),
        })
    }

    fn report_fault(equipment: &Equipment) -> EquipmentCommand {
        EquipmentCommand::ReportFault(ReportFault {
            equipment_id: equipment.id_typed(),
            occurred_at: Utc::now(),
        })
    }

    fn start_maintenance(equipment: &Equipment) -> EquipmentCommand {
        EquipmentCommand::StartMaintenance(StartMaintenance {
            equipment_id: equipment.id_typed(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn assign_and_release_round_trip() {
        let mut tracked = registered();
        let work_order_id = WorkOrderId::generate();

        let cmd = assign(tracked.aggregate(), work_order_id);
        tracked.execute(&cmd).unwrap();
        assert_eq!(tracked.aggregate().status(), EquipmentStatus::Running);
        assert_eq!(tracked.aggregate().current_work_order(), Some(work_order_id));

        let cmd = release(tracked.aggregate());
        let events = tracked.execute(&cmd).unwrap();
        match &events[0] {
            EquipmentEvent::EquipmentReleased(e) => assert_eq!(e.work_order_id, Some(work_order_id)),
            _ => panic!("Expected EquipmentReleased event"),
        }
        assert_eq!(tracked.aggregate().status(), EquipmentStatus::Idle);
        assert_eq!(tracked.aggregate().current_work_order(), None);
    }

    #[test]
    fn running_equipment_cannot_be_reassigned() {
        let mut tracked = registered();
        let cmd = assign(tracked.aggregate(), WorkOrderId::generate());
        tracked.execute(&cmd).unwrap();

        let cmd = assign(tracked.aggregate(), WorkOrderId::generate());
        assert!(matches!(
            tracked.execute(&cmd),
            Err(DomainError::StateConflict(_))
        ));
    }

    #[test]
    fn maintenance_rejected_while_running_or_in_maintenance() {
        let mut tracked = registered();
        let cmd = start_maintenance(tracked.aggregate());
        tracked.execute(&cmd).unwrap();
        assert!(tracked.execute(&cmd).is_err());

        let complete = EquipmentCommand::CompleteMaintenance(CompleteMaintenance {
            equipment_id: tracked.aggregate().id_typed(),
            occurred_at: Utc::now(),
        });
        tracked.execute(&complete).unwrap();
        assert_eq!(tracked.aggregate().status(), EquipmentStatus::Idle);

        let cmd = assign(tracked.aggregate(), WorkOrderId::generate());
        tracked.execute(&cmd).unwrap();
        let cmd = start_maintenance(tracked.aggregate());
        assert!(matches!(
            tracked.execute(&cmd),
            Err(DomainError::StateConflict(_))
        ));
    }

    #[test]
    fn fault_while_running_keeps_attachment_until_repaired() {
        let mut tracked = registered();
        let work_order_id = WorkOrderId::generate();
        let cmd = assign(tracked.aggregate(), work_order_id);
        tracked.execute(&cmd).unwrap();

        let cmd = report_fault(tracked.aggregate());
        tracked.execute(&cmd).unwrap();
        assert_eq!(tracked.aggregate().status(), EquipmentStatus::Fault);
        assert_eq!(tracked.aggregate().current_work_order(), Some(work_order_id));
        assert!(tracked.execute(&cmd).is_err());

        let repair = EquipmentCommand::RepairFault(RepairFault {
            equipment_id: tracked.aggregate().id_typed(),
            occurred_at: Utc::now(),
        });
        tracked.execute(&repair).unwrap();
        assert_eq!(tracked.aggregate().status(), EquipmentStatus::Idle);
        assert_eq!(tracked.aggregate().current_work_order(), None);
    }

    #[test]
    fn update_info_rejected_while_running() {
        let mut tracked = registered();
        let update = |equipment: &Equipment| {
            EquipmentCommand::UpdateEquipmentInfo(UpdateEquipmentInfo {
                equipment_id: equipment.id_typed(),
                code: "EQ-001".to_string(),
                name: "CNC lathe #2".to_string(),
                kind: EquipmentKind::Machine,
                work_center_id: Some(WorkCenterId::new()),
                occurred_at: Utc::now(),
            })
        };

        let cmd = update(tracked.aggregate());
        tracked.execute(&cmd).unwrap();
        assert_eq!(tracked.aggregate().name(), "CNC lathe #2");

        let cmd = assign(tracked.aggregate(), WorkOrderId::generate());
        tracked.execute(&cmd).unwrap();
        let cmd = update(tracked.aggregate());
        assert!(matches!(
            tracked.execute(&cmd),
            Err(DomainError::StateConflict(_))
        ));
    }

    #[test]
    fn register_validates_code_and_name() {
        let cmd = EquipmentCommand::RegisterEquipment(RegisterEquipment {
            equipment_id: EquipmentId::generate(),
            code: " ".to_string(),
            name: "Press".to_string(),
            kind: EquipmentKind::Tool,
            work_center_id: None,
            occurred_at: Utc::now(),
        });
        assert!(matches!(cmd.validate(), Err(DomainError::Validation(_))));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Assign(usize),
            Release,
            Fault,
            Repair,
            Maintain,
            FinishMaintenance,
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (0usize..3).prop_map(Op::Assign),
                3 => Just(Op::Release),
                1 => Just(Op::Fault),
                1 => Just(Op::Repair),
                1 => Just(Op::Maintain),
                1 => Just(Op::FinishMaintenance),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: an assignment only ever succeeds on unattached equipment, and
            /// the attachment always names the last successful assignment.
            #[test]
            fn never_attached_to_two_work_orders(ops in proptest::collection::vec(op_strategy(), 1..60)) {
                let work_orders = [WorkOrderId::generate(), WorkOrderId::generate(), WorkOrderId::generate()];
                let mut tracked = registered();

                for op in ops {
                    let equipment = tracked.aggregate().clone();
                    let id = equipment.id_typed();
                    let at = Utc::now();
                    let cmd = match op {
                        Op::Assign(i) => assign(&equipment, work_orders[i]),
                        Op::Release => release(&equipment),
                        Op::Fault => report_fault(&equipment),
                        Op::Repair => EquipmentCommand::RepairFault(RepairFault { equipment_id: id, occurred_at: at }),
                        Op::Maintain => start_maintenance(&equipment),
                        Op::FinishMaintenance => EquipmentCommand::CompleteMaintenance(CompleteMaintenance { equipment_id: id, occurred_at: at }),
                    };

                    let accepted = tracked.execute(&cmd).is_ok();
                    let after = tracked.aggregate();

                    if !accepted {
                        prop_assert_eq!(after, &equipment);
                        continue;
                    }
                    if let EquipmentCommand::AssignToWorkOrder(c) = &cmd {
                        prop_assert_eq!(equipment.current_work_order(), None);
                        prop_assert_eq!(after.current_work_order(), Some(c.work_order_id));
                    }
                    match after.status() {
                        EquipmentStatus::Running => prop_assert!(after.current_work_order().is_some()),
                        EquipmentStatus::Idle => prop_assert!(after.current_work_order().is_none()),
                        _ => {}
                    }
                }
            }
        }
    }
}
