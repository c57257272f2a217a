//! Production domain module.
//!
//! Plans, work orders, quality inspections and the reference data (routings,
//! bills of materials) they are built from. Pure decision logic: no IO, no
//! storage, no knowledge of the other aggregates' state.

pub mod bom;
pub mod plan;
pub mod quality;
pub mod routing;
pub mod work_order;

pub use bom::{
    ActivateBom, AddBomItem, Bom, BomActivated, BomCommand, BomCreated, BomDeactivated, BomEvent,
    BomId, BomItem, BomItemAdded, BomItemRemoved, CreateBom, DeactivateBom, RemoveBomItem,
};
pub use plan::{
    ApproveProductionPlan, CancelProductionPlan, CompleteProductionPlan, CreateProductionPlan,
    GenerateWorkOrders, MAX_PLAN_NUMBER_LEN, ProductionPlan, ProductionPlanApproved,
    ProductionPlanCancelled, ProductionPlanCommand, ProductionPlanCompleted, ProductionPlanCreated,
    ProductionPlanEvent, ProductionPlanId, ProductionPlanStarted, ProductionPlanStatus,
    StartProductionPlan,
};
pub use quality::{
    CreateQualityInspection, Inspect, InspectionCompleted, InspectionStarted, InspectionStatus,
    QualityInspection, QualityInspectionCommand, QualityInspectionCreated, QualityInspectionEvent,
    QualityInspectionId, SAMPLING_THRESHOLD, StartInspection, inspection_number, sample_quantity,
};
pub use routing::{
    AddOperation, CreateRouting, DeleteRouting, OperationAdded, OperationRemoved, RemoveOperation,
    Routing, RoutingCommand, RoutingCreated, RoutingDeleted, RoutingEvent, RoutingId,
    RoutingOperation,
};
pub use work_order::{
    CancelWorkOrder, CreateWorkOrder, PauseWorkOrder, ProgressReported, ReportProgress,
    ResumeWorkOrder, StartWorkOrder, WorkOrder, WorkOrderCancelled, WorkOrderCommand,
    WorkOrderCompleted, WorkOrderCreated, WorkOrderEvent, WorkOrderId, WorkOrderPaused,
    WorkOrderResumed, WorkOrderStarted, WorkOrderStatus, work_order_number,
};
