//! Choreography: the fixed event → command table.
//!
//! | Trigger | Command | Handler |
//! |---------|---------|---------|
//! | `production.plan.started` | CreateWorkOrder | [`CreateWorkOrderOnPlanStarted`] |
//! | `production.work_order.created` | CreateQualityInspection | [`CreateInspectionOnWorkOrderCreated`] |
//! | `production.work_order.started` | AssignToWorkOrder | [`AssignEquipmentOnWorkOrderStarted`] |
//! | `production.work_order.completed` | ReleaseEquipment | [`ReleaseEquipmentOnWorkOrderCompleted`] |
//! | `integration.order.paid` (broker) | CreateDeliverRecord | [`CreateDeliverRecordOnOrderPaid`] |
//!
//! The table is built once at startup. It must stay acyclic: every handler
//! declares what its command emits and `find_cycle()` on the built bus must
//! return `None` (asserted in the tests below).

pub mod production;
pub mod sales;

use shopfloor_events::{DomainEventBus, IntegrationEvent, ORDER_PAID_TOPIC};
use shopfloor_production::{ProductionPlanEvent, WorkOrderEvent};

use crate::command_dispatcher::{IntegrationEventBus, ShopFloorEventBus};

pub use production::{
    AssignEquipmentOnWorkOrderStarted, CreateInspectionOnWorkOrderCreated,
    CreateWorkOrderOnPlanStarted, ReleaseEquipmentOnWorkOrderCompleted,
};
pub use sales::CreateDeliverRecordOnOrderPaid;

/// Broker topics the integration consumer subscribes to.
pub const INTEGRATION_TOPICS: &[&str] = &[ORDER_PAID_TOPIC];

/// The in-process domain event table.
pub fn build_event_bus() -> ShopFloorEventBus {
    DomainEventBus::builder()
        .register(ProductionPlanEvent::STARTED, CreateWorkOrderOnPlanStarted)
        .register(WorkOrderEvent::CREATED, CreateInspectionOnWorkOrderCreated)
        .register(WorkOrderEvent::STARTED, AssignEquipmentOnWorkOrderStarted)
        .register(WorkOrderEvent::COMPLETED, ReleaseEquipmentOnWorkOrderCompleted)
        .build()
}

/// The integration event table, keyed by integration event type.
pub fn build_integration_bus() -> IntegrationEventBus {
    DomainEventBus::builder()
        .register(IntegrationEvent::ORDER_PAID, CreateDeliverRecordOnOrderPaid)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    use shopfloor_equipment::EquipmentEvent;
    use shopfloor_production::QualityInspectionEvent;

    #[test]
    fn domain_table_is_acyclic() {
        let bus = build_event_bus();
        assert_eq!(bus.find_cycle(), None);
    }

    #[test]
    fn integration_table_is_acyclic() {
        assert_eq!(build_integration_bus().find_cycle(), None);
    }

    #[test]
    fn domain_table_registers_one_handler_per_rule() {
        let bus = build_event_bus();
        assert_eq!(
            bus.event_types(),
            vec![
                ProductionPlanEvent::STARTED,
                WorkOrderEvent::COMPLETED,
                WorkOrderEvent::CREATED,
                WorkOrderEvent::STARTED,
            ]
        );
        for event_type in bus.event_types() {
            assert_eq!(bus.handlers_for(event_type).len(), 1);
        }
        assert!(bus.handlers_for(EquipmentEvent::ASSIGNED).is_empty());
        assert!(bus.handlers_for(QualityInspectionEvent::CREATED).is_empty());
    }

    #[test]
    fn integration_table_covers_every_subscribed_topic() {
        let bus = build_integration_bus();
        assert_eq!(INTEGRATION_TOPICS, &[ORDER_PAID_TOPIC]);
        assert_eq!(bus.handlers_for(IntegrationEvent::ORDER_PAID).len(), 1);
    }
}
