//! Bridge from `courier_config::Config` to bus and logging types.
//!
//! The config crate has no dependency on the bus crates, so conversion
//! happens here, once, at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use courier_config::{AsyncPolicyChoice, Config, StoreSection, StrategyChoice};
use courier_events::{
    AsyncPolicy, DeliveryStrategy, EventBus, LocalStrategy, RemoteStrategy,
};
use courier_storage::{MemoryQueueStore, QueueStore};
use courier_telemetry::{FileRotation, LogConfig, LogFormat};
use tracing::info;

/// Convert the `[logging]` section to a [`LogConfig`].
pub(crate) fn to_log_config(cfg: &Config) -> LogConfig {
    let format = cfg
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or(LogFormat::Compact);

    let log_config = LogConfig::new(&cfg.logging.level)
        .with_format(format)
        .with_directives(cfg.logging.directives.iter().cloned());

    match &cfg.logging.directory {
        Some(dir) => log_config.with_file_logging(dir, FileRotation::Daily),
        None => log_config,
    }
}

/// Explicit async policy, or `None` to use the strategy default.
pub(crate) fn to_async_policy(choice: AsyncPolicyChoice) -> Option<AsyncPolicy> {
    match choice {
        AsyncPolicyChoice::Auto => None,
        AsyncPolicyChoice::Await => Some(AsyncPolicy::Await),
        AsyncPolicyChoice::Detach => Some(AsyncPolicy::Detach),
    }
}

/// Open the queue store named by `[store].url`.
///
/// `redis://` and `rediss://` need the `redis` feature.
pub(crate) async fn open_store(store: &StoreSection) -> Result<Arc<dyn QueueStore>> {
    match store.scheme() {
        Some("memory") => Ok(Arc::new(MemoryQueueStore::new())),
        Some("redis" | "rediss") => connect_redis(store).await,
        _ => bail!("unsupported store URL: {}", store.redacted_url()),
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(store: &StoreSection) -> Result<Arc<dyn QueueStore>> {
    let redis = courier_storage::RedisQueueStore::connect(&store.url, &store.key_prefix).await?;
    Ok(Arc::new(redis))
}

#[cfg(not(feature = "redis"))]
#[allow(clippy::unused_async)]
async fn connect_redis(store: &StoreSection) -> Result<Arc<dyn QueueStore>> {
    bail!(
        "store URL {} needs courier built with the `redis` feature",
        store.redacted_url()
    )
}

/// Build a bus over an already-open store.
pub(crate) fn build_event_bus(cfg: &Config, store: Arc<dyn QueueStore>) -> EventBus {
    let consumer = cfg.bus.consumer.clone();
    let strategy = match cfg.bus.strategy {
        StrategyChoice::Local => DeliveryStrategy::Local(
            LocalStrategy::new()
                .with_queue(store)
                .with_consumer(consumer),
        ),
        StrategyChoice::Remote => DeliveryStrategy::Remote(
            RemoteStrategy::new(store)
                .with_consumer(consumer)
                .with_lock_ttl(Duration::from_secs(cfg.store.lock_ttl_secs)),
        ),
    };

    let mut builder = EventBus::builder(strategy);
    if let Some(policy) = to_async_policy(cfg.bus.async_policy) {
        builder = builder.async_policy(policy);
    }
    if cfg.bus.handler_timeout_secs > 0 {
        builder = builder.handler_timeout(Duration::from_secs(cfg.bus.handler_timeout_secs));
    }
    builder.build()
}

/// Open the configured store and build the bus.
pub(crate) async fn to_event_bus(cfg: &Config) -> Result<EventBus> {
    let store = open_store(&cfg.store).await?;
    let bus = build_event_bus(cfg, store);
    info!(
        strategy = %bus.strategy_kind(),
        consumer = bus.consumer(),
        store = %cfg.store.redacted_url(),
        "Event bus ready"
    );
    Ok(bus)
}
