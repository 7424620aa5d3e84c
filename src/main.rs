//! Flash-sale service binary.
//!
//! Wires the shared infrastructure (Redis stock cache and status fan-out,
//! Redpanda reservation queue, Postgres storage) and runs this instance's
//! payment worker and status router. The inbound request layer attaches to
//! [`flash_sale::FlashSale`] and [`flash_sale::OrderStatusRouter`].

use flash_sale::notifier::StatusFeed;
use flash_sale::{
    Config, OrderStatusRouter, PaymentWorker, PostgresStorage, RedisStatusNotifier,
    RedisStockCache, RedpandaSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        instance_id = %config.server.instance_id,
        redis_url = %config.redis.url,
        redpanda_brokers = %config.redpanda.brokers,
        "starting flash-sale service"
    );

    let cache = Arc::new(RedisStockCache::connect(&config.redis.url).await?);
    let notifier = Arc::new(RedisStatusNotifier::connect(&config.redis.url).await?);
    let storage = Arc::new(
        PostgresStorage::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            Duration::from_secs(config.postgres.connect_timeout),
        )
        .await?,
    );
    info!("infrastructure connected");

    // This instance's share of the payment workers.
    let source = RedpandaSource::new(
        &config.redpanda.brokers,
        &config.redpanda.consumer_group,
        &config.redpanda.payment_topic,
    )?;
    let worker = PaymentWorker::new(
        storage,
        cache,
        Arc::clone(&notifier) as Arc<dyn flash_sale::StatusNotifier>,
        config.sale.settlement_delay(),
    );
    tokio::spawn(async move { worker.run(source).await });

    // Status events addressed to this instance, fanned out to the push
    // connections it holds.
    let feed = notifier.subscribe(&config.server.instance_id).await?;
    let router = Arc::new(OrderStatusRouter::new());
    let consumer = Arc::clone(&router);
    tokio::spawn(async move { consumer.run(feed).await });

    info!("payment worker and status router running, press ctrl-c to stop");
    signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
