//! Transactional outbox: which domain events leave the process, and the
//! publisher that delivers them.
//!
//! The dispatcher converts every externally significant event 1:1 into an
//! [`OutboxMessage`] and saves it in the same transaction as the aggregate.

pub mod publisher;
pub mod retry;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use shopfloor_events::{Event, EventEnvelope, IntegrationEvent, OrderPaidIntegrationEvent};
use shopfloor_sales::OrderEvent;

use crate::command_dispatcher::ShopFloorEvent;
use crate::store::{OutboxMessage, StoreError};

pub use publisher::{
    OutboxPublisher, OutboxPublisherConfig, OutboxPublisherHandle, PublishPass, PublisherStats,
    publish_pending,
};
pub use retry::{BackoffStrategy, RetryPolicy};

/// The integration event a domain event maps to, if it is externally significant.
pub fn integration_event(event: &ShopFloorEvent) -> Option<IntegrationEvent> {
    match event {
        ShopFloorEvent::Order(OrderEvent::OrderPaid(paid)) => {
            Some(IntegrationEvent::OrderPaid(OrderPaidIntegrationEvent {
                order_id: paid.order_id.aggregate_id(),
                occurred_at: paid.occurred_at,
            }))
        }
        _ => None,
    }
}

/// Outbox row for a committed domain event, or `None` if it stays in-process.
pub fn outbox_message(
    envelope: &EventEnvelope<ShopFloorEvent>,
) -> Result<Option<OutboxMessage>, StoreError> {
    let Some(event) = integration_event(envelope.payload()) else {
        return Ok(None);
    };

    let payload: JsonValue = serde_json::to_value(&event).map_err(|e| {
        StoreError::Serialization(format!(
            "integration event {} serialization failed: {e}",
            event.event_type()
        ))
    })?;

    Ok(Some(OutboxMessage {
        id: Uuid::now_v7(),
        topic: event.topic().to_string(),
        aggregate_type: envelope.aggregate_type().to_string(),
        aggregate_id: envelope.aggregate_id(),
        sequence_number: envelope.sequence_number(),
        event_type: event.event_type().to_string(),
        occurred_at: envelope.occurred_at(),
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use shopfloor_events::ORDER_PAID_TOPIC;
    use shopfloor_sales::{OrderCreated, OrderId, OrderPaid};

    fn envelope(event: OrderEvent) -> EventEnvelope<ShopFloorEvent> {
        let event = ShopFloorEvent::Order(event);
        EventEnvelope::new(
            Uuid::now_v7(),
            shopfloor_core::AggregateId::new(),
            "sales.order",
            2,
            event.event_type(),
            event.occurred_at(),
            event,
        )
    }

    #[test]
    fn order_paid_becomes_an_outbox_message_on_its_topic() {
        let order_id = OrderId::generate();
        let env = envelope(OrderEvent::OrderPaid(OrderPaid {
            order_id,
            occurred_at: Utc::now(),
        }));

        let message = outbox_message(&env).unwrap().unwrap();
        assert_eq!(message.topic, ORDER_PAID_TOPIC);
        assert_eq!(message.event_type, IntegrationEvent::ORDER_PAID);
        assert_eq!(message.sequence_number, 2);

        let decoded: IntegrationEvent = serde_json::from_value(message.payload).unwrap();
        assert_eq!(decoded.aggregate_id(), order_id.aggregate_id());
    }

    #[test]
    fn internal_events_produce_no_outbox_rows() {
        let env = envelope(OrderEvent::OrderCreated(OrderCreated {
            order_id: OrderId::generate(),
            name: "order-1".to_string(),
            count: 5,
            occurred_at: Utc::now(),
        }));
        assert_eq!(outbox_message(&env).unwrap(), None);
    }
}
