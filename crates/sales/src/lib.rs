//! Sales domain module.
//!
//! Orders and the delivery records created once an order is paid. Pure
//! decision logic, no IO.

pub mod deliver;
pub mod order;

pub use deliver::{
    CancelDelivery, ConfirmDelivery, CreateDeliverRecord, DeliverRecord, DeliverRecordCommand,
    DeliverRecordCreated, DeliverRecordEvent, DeliverRecordId, DeliverStatus, DeliveryCancelled,
    DeliveryConfirmed, DeliveryDispatched, DispatchDelivery,
};
pub use order::{
    CreateOrder, DeleteOrder, Order, OrderCommand, OrderCreated, OrderDeleted, OrderEvent, OrderId,
    OrderPaid, PayOrder,
};
