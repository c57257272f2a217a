//! Production flow: plan → work order → inspection, equipment allocation.
//!
//! 1. Plan started → create the plan's work order
//! 2. Work order created → create its quality inspection
//! 3. Work order started → assign the first idle equipment of the first operation's work center
//! 4. Work order completed → release every equipment still running on it
//!
//! Every command is stamped with the triggering event's business time, and the
//! ids of created aggregates are derived from the trigger, so replaying a trigger
//! targets the same aggregate.

use tracing::{info, warn};

use shopfloor_core::AggregateKind;
use shopfloor_equipment::{
    AssignToWorkOrder, EquipmentCommand, EquipmentEvent, EquipmentStatus, ReleaseEquipment,
};
use shopfloor_events::{EventEnvelope, EventHandler};
use shopfloor_production::{
    CreateQualityInspection, CreateWorkOrder, ProductionPlanEvent, QualityInspection,
    QualityInspectionCommand, QualityInspectionEvent, QualityInspectionId, WorkOrder,
    WorkOrderCommand, WorkOrderEvent, WorkOrderId, inspection_number, sample_quantity,
    work_order_number,
};

use crate::command_dispatcher::{ChoreographyContext, DispatchError, ShopFloorEvent};

/// ProductionPlan.Started → CreateWorkOrder.
///
/// Skipped (with a warning) when the plan's product has no live routing with at
/// least one operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateWorkOrderOnPlanStarted;

impl EventHandler<ShopFloorEvent, dyn ChoreographyContext, DispatchError>
    for CreateWorkOrderOnPlanStarted
{
    fn name(&self) -> &'static str {
        "production.create_work_order_on_plan_started"
    }

    fn emits(&self) -> &'static [&'static str] {
        &[WorkOrderEvent::CREATED]
    }

    fn handle(
        &self,
        event: &EventEnvelope<ShopFloorEvent>,
        ctx: &dyn ChoreographyContext,
    ) -> Result<(), DispatchError> {
        let ShopFloorEvent::ProductionPlan(ProductionPlanEvent::ProductionPlanStarted(started)) =
            event.payload()
        else {
            return Ok(());
        };

        let work_order_id = WorkOrderId::for_plan(started.plan_id);
        if ctx
            .queries()
            .exists(WorkOrder::AGGREGATE_TYPE, work_order_id.aggregate_id())?
        {
            info!(
                plan_id = %started.plan_id,
                work_order_id = %work_order_id,
                "work order already created for plan, skipping"
            );
            return Ok(());
        }

        let routing = ctx
            .queries()
            .find_routings_by_product(started.product_id)?
            .into_iter()
            .find(|r| r.first_operation().is_some());
        let Some(routing) = routing else {
            warn!(
                plan_id = %started.plan_id,
                product_id = %started.product_id,
                "no routing with operations for product, work order not created"
            );
            return Ok(());
        };

        let command = WorkOrderCommand::CreateWorkOrder(CreateWorkOrder {
            work_order_id,
            work_order_number: work_order_number(&started.plan_number, started.occurred_at),
            production_plan_id: started.plan_id,
            product_id: started.product_id,
            routing_id: routing.id_typed(),
            quantity: started.quantity,
            occurred_at: started.occurred_at,
        });
        ctx.dispatch(command.into())?;

        info!(
            plan_id = %started.plan_id,
            work_order_id = %work_order_id,
            routing_id = %routing.id_typed(),
            "work order created for started plan"
        );
        Ok(())
    }
}

/// WorkOrder.Created → CreateQualityInspection, sampled per [`sample_quantity`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateInspectionOnWorkOrderCreated;

impl EventHandler<ShopFloorEvent, dyn ChoreographyContext, DispatchError>
    for CreateInspectionOnWorkOrderCreated
{
    fn name(&self) -> &'static str {
        "production.create_inspection_on_work_order_created"
    }

    fn emits(&self) -> &'static [&'static str] {
        &[QualityInspectionEvent::CREATED]
    }

    fn handle(
        &self,
        event: &EventEnvelope<ShopFloorEvent>,
        ctx: &dyn ChoreographyContext,
    ) -> Result<(), DispatchError> {
        let ShopFloorEvent::WorkOrder(WorkOrderEvent::WorkOrderCreated(created)) = event.payload()
        else {
            return Ok(());
        };

        let inspection_id = QualityInspectionId::for_work_order(created.work_order_id);
        if ctx
            .queries()
            .exists(QualityInspection::AGGREGATE_TYPE, inspection_id.aggregate_id())?
        {
            info!(
                work_order_id = %created.work_order_id,
                inspection_id = %inspection_id,
                "inspection already created for work order, skipping"
            );
            return Ok(());
        }

        let sample = sample_quantity(created.quantity);
        let command = QualityInspectionCommand::CreateQualityInspection(CreateQualityInspection {
            inspection_id,
            inspection_number: inspection_number(&created.work_order_number),
            work_order_id: created.work_order_id,
            sample_quantity: sample,
            occurred_at: created.occurred_at,
        });
        ctx.dispatch(command.into())?;

        info!(
            work_order_id = %created.work_order_id,
            inspection_id = %inspection_id,
            sample_quantity = sample,
            "quality inspection created for work order"
        );
        Ok(())
    }
}

/// WorkOrder.Started → AssignToWorkOrder on the first idle equipment (by code)
/// in the work center of the routing's first operation.
///
/// A work order resumed from Paused starts again; if equipment is still attached
/// to it, nothing more is assigned.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignEquipmentOnWorkOrderStarted;

impl EventHandler<ShopFloorEvent, dyn ChoreographyContext, DispatchError>
    for AssignEquipmentOnWorkOrderStarted
{
    fn name(&self) -> &'static str {
        "equipment.assign_on_work_order_started"
    }

    fn emits(&self) -> &'static [&'static str] {
        &[EquipmentEvent::ASSIGNED]
    }

    fn handle(
        &self,
        event: &EventEnvelope<ShopFloorEvent>,
        ctx: &dyn ChoreographyContext,
    ) -> Result<(), DispatchError> {
        let ShopFloorEvent::WorkOrder(WorkOrderEvent::WorkOrderStarted(started)) = event.payload()
        else {
            return Ok(());
        };
        let work_order_id = started.work_order_id;

        if !ctx
            .queries()
            .find_equipment_by_work_order(work_order_id)?
            .is_empty()
        {
            info!(work_order_id = %work_order_id, "equipment already assigned, skipping");
            return Ok(());
        }

        let work_center_id = ctx
            .queries()
            .routing(started.routing_id)?
            .and_then(|r| r.first_operation().map(|op| op.work_center_id));
        let Some(work_center_id) = work_center_id else {
            warn!(
                work_order_id = %work_order_id,
                routing_id = %started.routing_id,
                "routing missing or without operations, no equipment assigned"
            );
            return Ok(());
        };

        let Some(equipment) = ctx
            .queries()
            .find_idle_equipment(work_center_id)?
            .into_iter()
            .next()
        else {
            warn!(
                work_order_id = %work_order_id,
                work_center_id = %work_center_id,
                "no idle equipment in work center, no equipment assigned"
            );
            return Ok(());
        };

        let command = EquipmentCommand::AssignToWorkOrder(AssignToWorkOrder {
            equipment_id: equipment.id_typed(),
            work_order_id,
            occurred_at: started.occurred_at,
        });
        ctx.dispatch(command.into())?;

        info!(
            work_order_id = %work_order_id,
            equipment_id = %equipment.id_typed(),
            equipment_code = equipment.code(),
            "equipment assigned to started work order"
        );
        Ok(())
    }
}

/// WorkOrder.Completed → ReleaseEquipment for every equipment running on it.
///
/// Equipment that faulted while running keeps its attachment until repaired and
/// is skipped. Every release is attempted; the first failure is returned after
/// the others have run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReleaseEquipmentOnWorkOrderCompleted;

impl EventHandler<ShopFloorEvent, dyn ChoreographyContext, DispatchError>
    for ReleaseEquipmentOnWorkOrderCompleted
{
    fn name(&self) -> &'static str {
        "equipment.release_on_work_order_completed"
    }

    fn emits(&self) -> &'static [&'static str] {
        &[EquipmentEvent::RELEASED]
    }

    fn handle(
        &self,
        event: &EventEnvelope<ShopFloorEvent>,
        ctx: &dyn ChoreographyContext,
    ) -> Result<(), DispatchError> {
        let ShopFloorEvent::WorkOrder(WorkOrderEvent::WorkOrderCompleted(completed)) =
            event.payload()
        else {
            return Ok(());
        };
        let work_order_id = completed.work_order_id;

        let mut first_error = None;
        for equipment in ctx.queries().find_equipment_by_work_order(work_order_id)? {
            if equipment.status() != EquipmentStatus::Running {
                warn!(
                    work_order_id = %work_order_id,
                    equipment_id = %equipment.id_typed(),
                    status = ?equipment.status(),
                    "attached equipment is not running, left attached"
                );
                continue;
            }

            let command = EquipmentCommand::ReleaseEquipment(ReleaseEquipment {
                equipment_id: equipment.id_typed(),
                occurred_at: completed.occurred_at,
            });
            match ctx.dispatch(command.into()) {
                Ok(_) => info!(
                    work_order_id = %work_order_id,
                    equipment_id = %equipment.id_typed(),
                    "equipment released for completed work order"
                ),
                Err(err) => {
                    warn!(
                        work_order_id = %work_order_id,
                        equipment_id = %equipment.id_typed(),
                        error = %err,
                        "equipment release failed"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
