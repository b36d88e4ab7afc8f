use std::sync::Arc;

use courier_storage::QueueStore;

use super::{DEFAULT_CONSUMER, EmitReceipt, OfflineOptions, OfflineReport, deliver, drain};
use crate::dispatcher::{AsyncPolicy, Dispatcher};
use crate::error::BusResult;
use crate::event::Event;

/// In-process delivery.
///
/// Without a queue nothing is durable: persistent events are dispatched
/// like any other and offline processing has nothing to catch up on. A
/// queue can be attached for tests that exercise the replay path without a
/// shared store.
#[derive(Debug, Clone)]
pub struct LocalStrategy {
    queue: Option<Arc<dyn QueueStore>>,
    consumer: String,
}

impl Default for LocalStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStrategy {
    /// Pure in-memory delivery with no queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: None,
            consumer: DEFAULT_CONSUMER.to_string(),
        }
    }

    /// Record persistent events in `queue`.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn QueueStore>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the consumer name used for offline processing.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// The attached queue, if any.
    #[must_use]
    pub fn queue(&self) -> Option<&Arc<dyn QueueStore>> {
        self.queue.as_ref()
    }

    /// The consumer name.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub(crate) async fn emit(
        &self,
        event: Event,
        dispatcher: &Dispatcher,
        policy: AsyncPolicy,
    ) -> BusResult<EmitReceipt> {
        deliver(self.queue.as_deref(), event, dispatcher, policy).await
    }

    pub(crate) async fn process_offline(
        &self,
        dispatcher: &Dispatcher,
        options: OfflineOptions,
    ) -> BusResult<OfflineReport> {
        match &self.queue {
            Some(queue) => {
                drain(queue.as_ref(), &self.consumer, dispatcher, options.limit, None).await
            },
            None => Ok(OfflineReport::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_storage::MemoryQueueStore;
    use serde_json::json;

    use super::*;
    use crate::subscriber::SubscriberRegistry;

    #[tokio::test]
    async fn test_without_queue_nothing_is_durable() {
        let dispatcher = Dispatcher::new(Arc::new(SubscriberRegistry::new()));
        let local = LocalStrategy::new();

        let receipt = local
            .emit(
                Event::new("a.b").with_payload(json!({})).persistent(),
                &dispatcher,
                AsyncPolicy::Await,
            )
            .await
            .unwrap();
        assert_eq!(receipt.queued_id, None);

        let report = local
            .process_offline(&dispatcher, OfflineOptions::default())
            .await
            .unwrap();
        assert_eq!(report, OfflineReport::default());
    }

    #[tokio::test]
    async fn test_with_queue_records_persistent_events() {
        let dispatcher = Dispatcher::new(Arc::new(SubscriberRegistry::new()));
        let queue = Arc::new(MemoryQueueStore::new());
        let local = LocalStrategy::new().with_queue(queue.clone());

        let receipt = local
            .emit(Event::new("a.b").persistent(), &dispatcher, AsyncPolicy::Await)
            .await
            .unwrap();
        assert_eq!(receipt.queued_id, Some(1));

        let receipt = local
            .emit(Event::new("a.b"), &dispatcher, AsyncPolicy::Await)
            .await
            .unwrap();
        assert_eq!(receipt.queued_id, None);

        let report = local
            .process_offline(&dispatcher, OfflineOptions::with_limit(10))
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.last_id, 1);
    }
}
