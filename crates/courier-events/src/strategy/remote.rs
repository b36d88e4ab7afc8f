use std::sync::Arc;
use std::time::Duration;

use courier_storage::QueueStore;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    DEFAULT_CONSUMER, EmitReceipt, OfflineLock, OfflineOptions, OfflineReport, deliver, drain,
};
use crate::dispatcher::{AsyncPolicy, Dispatcher};
use crate::error::{BusError, BusResult};
use crate::event::Event;

/// Default lifetime of the offline consumer lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Delivery through a shared durable store.
///
/// Persistent events that pass the synchronous subscribers are appended to
/// the store so every process sharing it can replay them. Subscribers in the emitting process
/// are still invoked immediately.
#[derive(Debug, Clone)]
pub struct RemoteStrategy {
    store: Arc<dyn QueueStore>,
    consumer: String,
    lock_ttl: Duration,
}

impl RemoteStrategy {
    /// Deliver through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            consumer: DEFAULT_CONSUMER.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Set the consumer name; each name has its own cursor and lock.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Set how long the offline lock survives a crashed holder. A running
    /// pass extends it before each record.
    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// The consumer name.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// The offline lock lifetime.
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub(crate) async fn emit(
        &self,
        event: Event,
        dispatcher: &Dispatcher,
        policy: AsyncPolicy,
    ) -> BusResult<EmitReceipt> {
        deliver(Some(self.store.as_ref()), event, dispatcher, policy).await
    }

    pub(crate) async fn process_offline(
        &self,
        dispatcher: &Dispatcher,
        options: OfflineOptions,
    ) -> BusResult<OfflineReport> {
        let lock = OfflineLock {
            name: format!("offline:{}", self.consumer),
            token: Uuid::new_v4().to_string(),
            ttl: self.lock_ttl,
        };

        if !self.store.try_lock(&lock.name, &lock.token, lock.ttl).await? {
            debug!(consumer = %self.consumer, "Offline consumer lock held elsewhere");
            return Err(BusError::ConsumerBusy(self.consumer.clone()));
        }

        let result = drain(
            self.store.as_ref(),
            &self.consumer,
            dispatcher,
            options.limit,
            Some(&lock),
        )
        .await;

        if let Err(e) = self.store.unlock(&lock.name, &lock.token).await {
            warn!(consumer = %self.consumer, error = %e, "Failed to release offline lock");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use courier_storage::{MemoryQueueStore, QueuedEvent};
    use serde_json::json;

    use super::*;
    use crate::event::HandlerOutcome;
    use crate::subscriber::{SubscriberDescriptor, SubscriberRegistry, handler_fn};

    async fn seed(store: &MemoryQueueStore, count: usize) {
        for _ in 0..count {
            let id = store.next_id().await.unwrap();
            store
                .append(QueuedEvent::new(id, "t.e", json!({})))
                .await
                .unwrap();
        }
    }

    /// Persistent subscriber that sleeps, then reports whether `thief` could
    /// take the offline lock from under the running pass.
    fn contender(
        store: Arc<MemoryQueueStore>,
        nap: Duration,
        stolen: Arc<std::sync::Mutex<Vec<bool>>>,
    ) -> SubscriberDescriptor {
        SubscriberDescriptor::new(
            "contender",
            "t.e",
            handler_fn(move |_| {
                let store = Arc::clone(&store);
                let stolen = Arc::clone(&stolen);
                async move {
                    tokio::time::sleep(nap).await;
                    let took = store
                        .try_lock("offline:default", "thief", DEFAULT_LOCK_TTL)
                        .await
                        .unwrap();
                    stolen.lock().unwrap().push(took);
                    Ok(HandlerOutcome::Continue)
                }
            }),
        )
        .persistent()
    }

    #[tokio::test]
    async fn test_persistent_events_get_increasing_ids() {
        let dispatcher = Dispatcher::new(Arc::new(SubscriberRegistry::new()));
        let remote = RemoteStrategy::new(Arc::new(MemoryQueueStore::new()));

        let first = remote
            .emit(
                Event::new("a.b").with_payload(json!({"n": 1})).persistent(),
                &dispatcher,
                AsyncPolicy::Detach,
            )
            .await
            .unwrap();
        let transient = remote
            .emit(Event::new("a.b"), &dispatcher, AsyncPolicy::Detach)
            .await
            .unwrap();
        let second = remote
            .emit(Event::new("a.b").persistent(), &dispatcher, AsyncPolicy::Detach)
            .await
            .unwrap();

        assert_eq!(first.queued_id, Some(1));
        assert_eq!(transient.queued_id, None);
        assert_eq!(second.queued_id, Some(2));
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere_is_busy() {
        let store = Arc::new(MemoryQueueStore::new());
        let dispatcher = Dispatcher::new(Arc::new(SubscriberRegistry::new()));
        let remote = RemoteStrategy::new(store.clone()).with_consumer("worker");

        assert!(
            store
                .try_lock("offline:worker", "someone-else", DEFAULT_LOCK_TTL)
                .await
                .unwrap()
        );
        let err = remote
            .process_offline(&dispatcher, OfflineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ConsumerBusy(ref c) if c == "worker"));

        store.unlock("offline:worker", "someone-else").await.unwrap();
        assert!(
            remote
                .process_offline(&dispatcher, OfflineOptions::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_lock_released_after_pass() {
        let store = Arc::new(MemoryQueueStore::new());
        let dispatcher = Dispatcher::new(Arc::new(SubscriberRegistry::new()));
        let remote = RemoteStrategy::new(store.clone());

        remote
            .process_offline(&dispatcher, OfflineOptions::default())
            .await
            .unwrap();
        assert!(
            store
                .try_lock("offline:default", "next", DEFAULT_LOCK_TTL)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_pass_stops_when_lock_expires_and_is_taken() {
        let store = Arc::new(MemoryQueueStore::new());
        seed(&store, 2).await;
        let stolen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = Arc::new(SubscriberRegistry::new());
        registry
            .register(contender(
                Arc::clone(&store),
                Duration::from_millis(80),
                Arc::clone(&stolen),
            ))
            .unwrap();

        let remote = RemoteStrategy::new(store.clone()).with_lock_ttl(Duration::from_millis(20));
        let err = remote
            .process_offline(&Dispatcher::new(registry), OfflineOptions::with_limit(10))
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::ConsumerBusy(ref c) if c == "default"));
        assert_eq!(*stolen.lock().unwrap(), vec![true]);
        assert_eq!(store.cursor("default").await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().pending, 1);
        // The lock now belongs to the other holder and was not released.
        assert!(!store.unlock("offline:default", "someone").await.unwrap());
        assert!(store.unlock("offline:default", "thief").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_is_extended_before_each_record() {
        let store = Arc::new(MemoryQueueStore::new());
        seed(&store, 3).await;
        let stolen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = Arc::new(SubscriberRegistry::new());
        registry
            .register(contender(
                Arc::clone(&store),
                Duration::from_millis(120),
                Arc::clone(&stolen),
            ))
            .unwrap();

        // Three records outlive one ttl, but each stays within it.
        let remote = RemoteStrategy::new(store.clone()).with_lock_ttl(Duration::from_millis(250));
        let report = remote
            .process_offline(&Dispatcher::new(registry), OfflineOptions::with_limit(10))
            .await
            .unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(*stolen.lock().unwrap(), vec![false, false, false]);
    }
}
