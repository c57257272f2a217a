//! Shop floor worker: runs the outbox publisher and the integration consumer
//! until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use shopfloor_events::{EventEnvelope, InMemoryBroker, MessageBroker};
use shopfloor_infra::event_bus::RedisStreamsBroker;
use shopfloor_infra::{
    AggregateStore, CommandDispatcher, InMemoryStore, IntegrationConsumer, OutboxPublisher,
    OutboxStore, PostgresStore, ShopFloorConfig, build_event_bus,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shopfloor_observability::init();

    let config = ShopFloorConfig::from_env().context("invalid configuration")?;

    if config.use_persistent_stores {
        let database_url = config
            .database_url
            .clone()
            .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
        let pool = PgPool::connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;
        let store = PostgresStore::new(pool, tokio::runtime::Handle::current());
        store.ensure_schema().await.context("failed to prepare schema")?;

        let broker = RedisStreamsBroker::new(&config.redis_url, config.consumer_group.clone())
            .context("failed to create Redis Streams broker")?
            .with_max_deliveries(config.consumer_max_deliveries);

        tracing::info!(redis_url = %config.redis_url, "using Postgres store and Redis Streams broker");
        run(store, broker, &config).await
    } else {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::<EventEnvelope<JsonValue>>::with_max_deliveries(
            config.consumer_max_deliveries,
        ));

        tracing::warn!("USE_PERSISTENT_STORES is off; state is lost on exit");
        run(store, broker, &config).await
    }
}

async fn run<S, B>(store: S, broker: B, config: &ShopFloorConfig) -> anyhow::Result<()>
where
    S: AggregateStore + OutboxStore + Clone + 'static,
    B: MessageBroker<EventEnvelope<JsonValue>> + Clone + 'static,
{
    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), build_event_bus()));

    let publisher = OutboxPublisher::spawn(store, broker.clone(), config.outbox_publisher())
        .context("failed to start outbox publisher")?;
    let consumer = IntegrationConsumer::spawn(broker, dispatcher, config.integration_consumer())
        .context("failed to start integration consumer")?;

    tracing::info!("shop floor worker running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");

    // Joining the loops blocks; keep it off the runtime's threads.
    let (published, consumed) = tokio::task::spawn_blocking(move || {
        let consumed = consumer.shutdown();
        let published = publisher.shutdown();
        (published, consumed)
    })
    .await
    .context("shutdown task failed")?;

    tracing::info!(
        published = published.published,
        publish_failures = published.failed,
        received = consumed.received,
        acked = consumed.acked,
        nacked = consumed.nacked,
        "shop floor worker stopped"
    );
    Ok(())
}
