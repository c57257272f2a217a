//! Integration events: facts published to other processes through the broker.
//!
//! Payloads carry the triggering aggregate's id plus the minimal facts a consumer
//! needs; consumers load anything else themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::AggregateId;

use crate::Event;

/// Topic carrying [`OrderPaidIntegrationEvent`].
pub const ORDER_PAID_TOPIC: &str = "sales.order.paid";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaidIntegrationEvent {
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationEvent {
    OrderPaid(OrderPaidIntegrationEvent),
}

impl IntegrationEvent {
    pub const ORDER_PAID: &'static str = "integration.order.paid";

    pub fn topic(&self) -> &'static str {
        match self {
            IntegrationEvent::OrderPaid(_) => ORDER_PAID_TOPIC,
        }
    }

    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            IntegrationEvent::OrderPaid(e) => e.order_id,
        }
    }
}

impl Event for IntegrationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            IntegrationEvent::OrderPaid(_) => Self::ORDER_PAID,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            IntegrationEvent::OrderPaid(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_paid_wire_shape_is_tagged() {
        let order_id = AggregateId::new();
        let event = IntegrationEvent::OrderPaid(OrderPaidIntegrationEvent {
            order_id,
            occurred_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_paid");
        assert_eq!(json["order_id"], order_id.to_string());

        let back: IntegrationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.topic(), ORDER_PAID_TOPIC);
    }
}
