use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult,
    aggregate_id_newtype,
};
use shopfloor_events::{Command, Event};

use crate::order::OrderId;

aggregate_id_newtype!(
    /// Delivery record identifier.
    DeliverRecordId
);

impl DeliverRecordId {
    /// The delivery record generated when an order is paid.
    pub fn for_order(order_id: OrderId) -> Self {
        Self(order_id.0.derive("deliver-record"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverStatus {
    Pending,
    InTransit,
    Delivered,
    Cancelled,
}

/// Aggregate root: DeliverRecord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverRecord {
    id: DeliverRecordId,
    order_id: Option<OrderId>,
    status: DeliverStatus,
    version: u64,
    created: bool,
}

impl DeliverRecord {
    pub fn empty(id: DeliverRecordId) -> Self {
        Self {
            id,
            order_id: None,
            status: DeliverStatus::Pending,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DeliverRecordId {
        self.id
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn status(&self) -> DeliverStatus {
        self.status
    }
}

impl AggregateRoot for DeliverRecord {
    type Id = DeliverRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for DeliverRecord {
    const AGGREGATE_TYPE: &'static str = "sales.deliver_record";

    fn empty(id: AggregateId) -> Self {
        DeliverRecord::empty(DeliverRecordId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }

    /// One delivery record per order.
    fn unique_key(&self) -> Option<String> {
        self.order_id.map(|order_id| order_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDeliverRecord {
    pub deliver_record_id: DeliverRecordId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchDelivery {
    pub deliver_record_id: DeliverRecordId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDelivery {
    pub deliver_record_id: DeliverRecordId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDelivery {
    pub deliver_record_id: DeliverRecordId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliverRecordCommand {
    CreateDeliverRecord(CreateDeliverRecord),
    DispatchDelivery(DispatchDelivery),
    ConfirmDelivery(ConfirmDelivery),
    CancelDelivery(CancelDelivery),
}

impl Command for DeliverRecordCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let id = match self {
            DeliverRecordCommand::CreateDeliverRecord(c) => c.deliver_record_id,
            DeliverRecordCommand::DispatchDelivery(c) => c.deliver_record_id,
            DeliverRecordCommand::ConfirmDelivery(c) => c.deliver_record_id,
            DeliverRecordCommand::CancelDelivery(c) => c.deliver_record_id,
        };
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverRecordCreated {
    pub deliver_record_id: DeliverRecordId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryDispatched {
    pub deliver_record_id: DeliverRecordId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmed {
    pub deliver_record_id: DeliverRecordId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCancelled {
    pub deliver_record_id: DeliverRecordId,
    pub previous_status: DeliverStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliverRecordEvent {
    DeliverRecordCreated(DeliverRecordCreated),
    DeliveryDispatched(DeliveryDispatched),
    DeliveryConfirmed(DeliveryConfirmed),
    DeliveryCancelled(DeliveryCancelled),
}

impl DeliverRecordEvent {
    pub const CREATED: &'static str = "sales.deliver_record.created";
    pub const DISPATCHED: &'static str = "sales.deliver_record.dispatched";
    pub const DELIVERED: &'static str = "sales.deliver_record.delivered";
    pub const CANCELLED: &'static str = "sales.deliver_record.cancelled";
}

impl Event for DeliverRecordEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeliverRecordEvent::DeliverRecordCreated(_) => Self::CREATED,
            DeliverRecordEvent::DeliveryDispatched(_) => Self::DISPATCHED,
            DeliverRecordEvent::DeliveryConfirmed(_) => Self::DELIVERED,
            DeliverRecordEvent::DeliveryCancelled(_) => Self::CANCELLED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DeliverRecordEvent::DeliverRecordCreated(e) => e.occurred_at,
            DeliverRecordEvent::DeliveryDispatched(e) => e.occurred_at,
            DeliverRecordEvent::DeliveryConfirmed(e) => e.occurred_at,
            DeliverRecordEvent::DeliveryCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DeliverRecord {
    type Command = DeliverRecordCommand;
    type Event = DeliverRecordEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DeliverRecordEvent::DeliverRecordCreated(e) => {
                self.id = e.deliver_record_id;
                self.order_id = Some(e.order_id);
                self.status = DeliverStatus::Pending;
                self.created = true;
            }
            DeliverRecordEvent::DeliveryDispatched(_) => self.status = DeliverStatus::InTransit,
            DeliverRecordEvent::DeliveryConfirmed(_) => self.status = DeliverStatus::Delivered,
            DeliverRecordEvent::DeliveryCancelled(_) => self.status = DeliverStatus::Cancelled,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let DeliverRecordCommand::CreateDeliverRecord(cmd) = command {
            if self.created {
                return Err(DomainError::state_conflict(format!(
                    "a delivery record already exists for order {}",
                    cmd.order_id
                )));
            }
            return Ok(vec![DeliverRecordEvent::DeliverRecordCreated(
                DeliverRecordCreated {
                    deliver_record_id: cmd.deliver_record_id,
                    order_id: cmd.order_id,
                    occurred_at: cmd.occurred_at,
                },
            )]);
        }
        if !self.created {
            return Err(DomainError::not_found());
        }

        let event = match command {
            DeliverRecordCommand::DispatchDelivery(cmd) => {
                self.require(&[DeliverStatus::Pending], "dispatch")?;
                DeliverRecordEvent::DeliveryDispatched(DeliveryDispatched {
                    deliver_record_id: self.id,
                    occurred_at: cmd.occurred_at,
                })
            }
            DeliverRecordCommand::ConfirmDelivery(cmd) => {
                self.require(&[DeliverStatus::InTransit], "confirm")?;
                DeliverRecordEvent::DeliveryConfirmed(DeliveryConfirmed {
                    deliver_record_id: self.id,
                    occurred_at: cmd.occurred_at,
                })
            }
            DeliverRecordCommand::CancelDelivery(cmd) => {
                self.require(&[DeliverStatus::Pending, DeliverStatus::InTransit], "cancel")?;
                DeliverRecordEvent::DeliveryCancelled(DeliveryCancelled {
                    deliver_record_id: self.id,
                    previous_status: self.status,
                    occurred_at: cmd.occurred_at,
                })
            }
            DeliverRecordCommand::CreateDeliverRecord(_) => {
                return Err(DomainError::state_conflict("delivery record already exists"));
            }
        };

        Ok(vec![event])
    }
}

impl DeliverRecord {
    fn require(&self, allowed: &[DeliverStatus], action: &str) -> DomainResult<()> {
        if !allowed.contains(&self.status) {
            return Err(DomainError::state_conflict(format!(
                "cannot {action} a delivery in status {:?}",
                self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfloor_core::Tracked;

    fn pending_record() -> Tracked<DeliverRecord> {
        let order_id = OrderId::generate();
        let deliver_record_id = DeliverRecordId::for_order(order_id);
        let mut tracked = Tracked::new(DeliverRecord::empty(deliver_record_id));
        tracked
            .execute(&DeliverRecordCommand::CreateDeliverRecord(
                CreateDeliverRecord {
                    deliver_record_id,
                    order_id,
                    occurred_at: Utc::now(),
                },
            ))
            .unwrap();
        tracked
    }

    #[test]
    fn for_order_is_deterministic() {
        let order_id = OrderId::generate();
        assert_eq!(
            DeliverRecordId::for_order(order_id),
            DeliverRecordId::for_order(order_id)
        );
        assert_ne!(DeliverRecordId::for_order(order_id).0, order_id.0);
    }

    #[test]
    fn second_create_is_a_conflict() {
        let mut tracked = pending_record();
        let record = tracked.aggregate().clone();
        let cmd = DeliverRecordCommand::CreateDeliverRecord(CreateDeliverRecord {
            deliver_record_id: record.id_typed(),
            order_id: record.order_id().unwrap(),
            occurred_at: Utc::now(),
        });

        assert!(matches!(
            tracked.execute(&cmd),
            Err(DomainError::StateConflict(_))
        ));
        assert_eq!(tracked.aggregate(), &record);
    }

    #[test]
    fn delivery_lifecycle() {
        let mut tracked = pending_record();
        let id = tracked.aggregate().id_typed();
        assert_eq!(tracked.aggregate().status(), DeliverStatus::Pending);

        let confirm = DeliverRecordCommand::ConfirmDelivery(ConfirmDelivery {
            deliver_record_id: id,
            occurred_at: Utc::now(),
        });
        assert!(tracked.execute(&confirm).is_err());

        tracked
            .execute(&DeliverRecordCommand::DispatchDelivery(DispatchDelivery {
                deliver_record_id: id,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        tracked.execute(&confirm).unwrap();
        assert_eq!(tracked.aggregate().status(), DeliverStatus::Delivered);

        let cancel = DeliverRecordCommand::CancelDelivery(CancelDelivery {
            deliver_record_id: id,
            occurred_at: Utc::now(),
        });
        assert!(matches!(
            tracked.execute(&cancel),
            Err(DomainError::StateConflict(_))
        ));
    }

    #[test]
    fn cancel_from_in_transit() {
        let mut tracked = pending_record();
        let id = tracked.aggregate().id_typed();
        tracked
            .execute(&DeliverRecordCommand::DispatchDelivery(DispatchDelivery {
                deliver_record_id: id,
                occurred_at: Utc::now(),
            }))
            .unwrap();

        let events = tracked
            .execute(&DeliverRecordCommand::CancelDelivery(CancelDelivery {
                deliver_record_id: id,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            DeliverRecordEvent::DeliveryCancelled(e) => {
                assert_eq!(e.previous_status, DeliverStatus::InTransit)
            }
            _ => panic!("Expected DeliveryCancelled event"),
        }
        assert_eq!(tracked.aggregate().status(), DeliverStatus::Cancelled);
    }
}
