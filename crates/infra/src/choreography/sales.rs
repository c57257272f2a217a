//! Sales flow: a paid order gets a delivery record.
//!
//! `OrderPaid` reaches this process as an integration event through the broker,
//! so it may arrive more than once. The handler checks for an existing record
//! first and the record id is derived from the order id, so a duplicate
//! delivery never creates a second record.

use tracing::info;

use shopfloor_events::{EventEnvelope, EventHandler, IntegrationEvent};
use shopfloor_sales::{
    CreateDeliverRecord, DeliverRecordCommand, DeliverRecordEvent, DeliverRecordId, OrderId,
};

use crate::command_dispatcher::{ChoreographyContext, DispatchError};

/// OrderPaid (integration) → CreateDeliverRecord.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateDeliverRecordOnOrderPaid;

impl EventHandler<IntegrationEvent, dyn ChoreographyContext, DispatchError>
    for CreateDeliverRecordOnOrderPaid
{
    fn name(&self) -> &'static str {
        "sales.create_deliver_record_on_order_paid"
    }

    fn emits(&self) -> &'static [&'static str] {
        &[DeliverRecordEvent::CREATED]
    }

    fn handle(
        &self,
        event: &EventEnvelope<IntegrationEvent>,
        ctx: &dyn ChoreographyContext,
    ) -> Result<(), DispatchError> {
        let IntegrationEvent::OrderPaid(paid) = event.payload();
        let order_id = OrderId::new(paid.order_id);

        if let Some(existing) = ctx.queries().find_deliver_record_by_order(order_id)? {
            info!(
                message_id = %event.event_id(),
                order_id = %order_id,
                deliver_record_id = %existing.id_typed(),
                "deliver record already exists for order, skipping"
            );
            return Ok(());
        }

        let deliver_record_id = DeliverRecordId::for_order(order_id);
        let command = DeliverRecordCommand::CreateDeliverRecord(CreateDeliverRecord {
            deliver_record_id,
            order_id,
            occurred_at: paid.occurred_at,
        });
        ctx.dispatch(command.into())?;

        info!(
            message_id = %event.event_id(),
            order_id = %order_id,
            deliver_record_id = %deliver_record_id,
            "deliver record created for paid order"
        );
        Ok(())
    }
}
