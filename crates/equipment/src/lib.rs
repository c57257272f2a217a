//! Equipment domain module.
//!
//! Machines, tools and fixtures, and their attachment to running work orders.

pub mod equipment;

pub use equipment::{
    AssignToWorkOrder, CompleteMaintenance, Equipment, EquipmentAssigned, EquipmentCommand,
    EquipmentEvent, EquipmentFaultRepaired, EquipmentFaultReported, EquipmentId,
    EquipmentInfoUpdated, EquipmentKind, EquipmentRegistered, EquipmentReleased, EquipmentStatus,
    MaintenanceCompleted, MaintenanceStarted, RegisterEquipment, ReleaseEquipment, RepairFault,
    ReportFault, StartMaintenance, UpdateEquipmentInfo,
};
