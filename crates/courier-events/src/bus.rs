//! The event bus facade.

use std::sync::Arc;
use std::time::Duration;

use courier_storage::{QueueStats, QueueStore};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatcher::{AsyncPolicy, Dispatcher};
use crate::error::BusResult;
use crate::event::{EmitOptions, Event, validate_event_name};
use crate::strategy::{
    DeliveryStrategy, EmitReceipt, LocalStrategy, OfflineOptions, OfflineReport, RemoteStrategy,
    StrategyKind,
};
use crate::subscriber::{EventHandler, SubscriberDescriptor, SubscriberRegistry};

/// Builder for [`EventBus`].
#[derive(Debug)]
pub struct EventBusBuilder {
    strategy: DeliveryStrategy,
    async_policy: Option<AsyncPolicy>,
    handler_timeout: Option<Duration>,
}

impl EventBusBuilder {
    /// Override the async policy. Defaults to `Await` for local delivery
    /// and `Detach` for remote delivery.
    #[must_use]
    pub fn async_policy(mut self, policy: AsyncPolicy) -> Self {
        self.async_policy = Some(policy);
        self
    }

    /// Bound every handler invocation.
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Build the bus.
    #[must_use]
    pub fn build(self) -> EventBus {
        let registry = Arc::new(SubscriberRegistry::new());
        let dispatcher =
            Dispatcher::new(Arc::clone(&registry)).with_handler_timeout(self.handler_timeout);
        let async_policy = self
            .async_policy
            .unwrap_or_else(|| self.strategy.kind().default_async_policy());

        debug!(
            strategy = %self.strategy.kind(),
            async_policy = %async_policy,
            handler_timeout = ?self.handler_timeout,
            "Built event bus"
        );

        EventBus {
            registry,
            dispatcher,
            strategy: Arc::new(self.strategy),
            async_policy,
        }
    }
}

/// Publish/subscribe facade over a registry, a dispatcher and a delivery
/// strategy.
///
/// Each instance owns its own registry, so tests can create as many buses
/// as they need. Clones share the registry, strategy and in-flight task set.
///
/// # Example
///
/// ```ignore
/// let bus = EventBus::local();
/// bus.register(
///     SubscriberDescriptor::new("prevent-uncomplete", "example.todo.updating", handler)
///         .synchronous()
///         .with_priority(60),
/// )?;
///
/// let receipt = bus
///     .emit_event("example.todo.updating", payload, EmitOptions::new().with_previous(prev))
///     .await?;
/// if let Some(veto) = receipt.outcome.veto() {
///     return Err(http_error(veto.status, &veto.message));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    registry: Arc<SubscriberRegistry>,
    dispatcher: Dispatcher,
    strategy: Arc<DeliveryStrategy>,
    async_policy: AsyncPolicy,
}

impl EventBus {
    /// Start building a bus over `strategy`.
    #[must_use]
    pub fn builder(strategy: DeliveryStrategy) -> EventBusBuilder {
        EventBusBuilder {
            strategy,
            async_policy: None,
            handler_timeout: None,
        }
    }

    /// In-process bus with no durable queue.
    #[must_use]
    pub fn local() -> Self {
        Self::builder(DeliveryStrategy::Local(LocalStrategy::new())).build()
    }

    /// Bus delivering through a shared store.
    #[must_use]
    pub fn remote(store: Arc<dyn QueueStore>) -> Self {
        Self::builder(DeliveryStrategy::Remote(RemoteStrategy::new(store))).build()
    }

    /// Register an asynchronous, non-persistent subscriber at default
    /// priority. Returns the generated subscriber id.
    ///
    /// # Errors
    ///
    /// Returns a registration error if `event` is malformed.
    pub fn on(
        &self,
        event: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> BusResult<String> {
        let id = format!("on:{}", Uuid::new_v4());
        self.registry
            .register(SubscriberDescriptor::new(id.clone(), event, handler))?;
        Ok(id)
    }

    /// Register one subscriber, replacing any with the same id and event.
    ///
    /// # Errors
    ///
    /// Returns a registration error if the descriptor is malformed.
    pub fn register(&self, descriptor: SubscriberDescriptor) -> BusResult<()> {
        self.registry.register(descriptor)
    }

    /// Register the subscribers a module declares at bootstrap.
    ///
    /// Every descriptor is validated before any is registered, so a
    /// malformed declaration leaves the registry untouched.
    ///
    /// # Errors
    ///
    /// Returns the first registration error found.
    pub fn register_module_subscribers(
        &self,
        descriptors: Vec<SubscriberDescriptor>,
    ) -> BusResult<usize> {
        for descriptor in &descriptors {
            descriptor.validate()?;
        }
        let count = descriptors.len();
        for descriptor in descriptors {
            self.registry.register(descriptor)?;
        }
        info!(count, "Registered module subscribers");
        Ok(count)
    }

    /// Remove every subscriber owned by `module`.
    pub fn unregister_module(&self, module: &str) -> usize {
        self.registry.unregister_all(module)
    }

    /// Publish an event.
    ///
    /// Returns once synchronous subscribers have run. A veto comes back as
    /// data in the receipt, not as an error.
    ///
    /// # Errors
    ///
    /// - invalid event name
    /// - [`BusError::Delivery`](crate::BusError::Delivery) when the queue is
    ///   unreachable; the caller decides whether to retry
    /// - [`BusError::Handler`](crate::BusError::Handler) when a synchronous
    ///   subscriber fails
    pub async fn emit(&self, event: Event) -> BusResult<EmitReceipt> {
        validate_event_name(&event.name)?;
        self.strategy
            .emit(event, &self.dispatcher, self.async_policy)
            .await
    }

    /// Publish `name` with `payload`. Durability comes from `options`, never
    /// from the subscribers.
    ///
    /// # Errors
    ///
    /// Same as [`EventBus::emit`].
    pub async fn emit_event(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: EmitOptions,
    ) -> BusResult<EmitReceipt> {
        self.emit(Event::from_parts(name, payload, options)).await
    }

    /// Replay pending records for this bus's consumer.
    ///
    /// # Errors
    ///
    /// Delivery errors leave the cursor where it was. Returns
    /// [`BusError::ConsumerBusy`](crate::BusError::ConsumerBusy) when another
    /// consumer with the same name is running.
    pub async fn process_offline(&self, options: OfflineOptions) -> BusResult<OfflineReport> {
        self.strategy
            .process_offline(&self.dispatcher, options)
            .await
    }

    /// Delete every queued record.
    ///
    /// # Errors
    ///
    /// Returns a delivery error when the queue is unreachable.
    pub async fn clear_queue(&self) -> BusResult<u64> {
        self.strategy.clear_queue().await
    }

    /// Delete processed records only.
    ///
    /// # Errors
    ///
    /// Returns a delivery error when the queue is unreachable.
    pub async fn clear_processed(&self) -> BusResult<u64> {
        self.strategy.clear_processed().await
    }

    /// Queue counters.
    ///
    /// # Errors
    ///
    /// Returns a delivery error when the queue is unreachable.
    pub async fn queue_stats(&self) -> BusResult<QueueStats> {
        self.strategy.stats().await
    }

    /// This bus's consumer cursor.
    ///
    /// # Errors
    ///
    /// Returns a delivery error when the queue is unreachable.
    pub async fn cursor(&self) -> BusResult<u64> {
        self.strategy.cursor().await
    }

    /// Wait for every detached subscriber to settle.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    /// The subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Which strategy this bus uses.
    #[must_use]
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// The effective async policy.
    #[must_use]
    pub fn async_policy(&self) -> AsyncPolicy {
        self.async_policy
    }

    /// The consumer name used for offline processing.
    #[must_use]
    pub fn consumer(&self) -> &str {
        self.strategy.consumer()
    }
}
