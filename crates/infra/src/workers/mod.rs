//! Background workers.

pub mod integration_consumer;

pub use integration_consumer::{
    ConsumerStats, IntegrationConsumer, IntegrationConsumerConfig, IntegrationConsumerHandle,
};
