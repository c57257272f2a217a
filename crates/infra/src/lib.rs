//! Infrastructure layer: storage, dispatch, choreography, outbox and workers.

pub mod choreography;
pub mod command_dispatcher;
pub mod config;
pub mod event_bus;
pub mod outbox;
pub mod queries;
pub mod store;
pub mod workers;


pub use choreography::{INTEGRATION_TOPICS, build_event_bus, build_integration_bus};
pub use command_dispatcher::{
    ChoreographyContext, CommandDispatcher, CommandOutcome, DispatchError, IntegrationEventBus,
    ShopFloorCommand, ShopFloorEvent, ShopFloorEventBus,
};
pub use config::{ConfigError, ShopFloorConfig};
pub use outbox::{OutboxPublisher, OutboxPublisherConfig, OutboxPublisherHandle, RetryPolicy};
pub use queries::{ShopFloorQueries, StoreQueries};
pub use store::{AggregateStore, InMemoryStore, OutboxStore, PostgresStore, StoreError};
pub use workers::{IntegrationConsumer, IntegrationConsumerConfig, IntegrationConsumerHandle};
