//! Domain & integration events: event/command abstractions, the in-process domain
//! event bus, and the broker boundary used for integration events.

pub mod broker;
pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_broker;
pub mod integration;

pub use broker::{Acknowledger, Delivery, MessageBroker, Subscription};
pub use bus::{DeliveryReport, DomainEventBus, DomainEventBusBuilder, EventHandler, HandlerFailure};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_broker::{InMemoryBroker, InMemoryBrokerError};
pub use integration::{IntegrationEvent, ORDER_PAID_TOPIC, OrderPaidIntegrationEvent};
