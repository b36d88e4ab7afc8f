//! Subscriber descriptors and the per-bus registry.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{BusError, BusResult, HandlerError};
use crate::event::{EventEnvelope, HandlerOutcome, validate_event_name};

/// Priority assigned when a descriptor does not set one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Result returned by an [`EventHandler`].
pub type HandlerResult = Result<HandlerOutcome, HandlerError>;

/// A subscriber's callback.
///
/// Synchronous subscribers may return [`HandlerOutcome::Veto`] to reject the
/// mutation that triggered the event. Asynchronous subscribers' outcomes are
/// only logged.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one dispatch of an event.
    async fn handle(&self, envelope: &EventEnvelope) -> HandlerResult;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, envelope: &EventEnvelope) -> HandlerResult {
        (self.f)(envelope.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```ignore
/// let handler = handler_fn(|env| async move {
///     tracing::info!(event = %env.event, "seen");
///     Ok(HandlerOutcome::Continue)
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// A registered subscription.
///
/// Immutable once registered. Re-registering the same `id` for the same
/// event replaces the previous descriptor.
#[derive(Clone)]
pub struct SubscriberDescriptor {
    /// Identifier, unique per event name.
    pub id: String,
    /// Event name subscribed to.
    pub event: String,
    /// Callback.
    pub handler: Arc<dyn EventHandler>,
    /// Receive replayed events during offline processing.
    pub persistent: bool,
    /// Run inline before the dispatch completes, with veto power.
    pub sync: bool,
    /// Lower runs first.
    pub priority: i32,
    /// Owning module, for bulk unregistration.
    pub source_module: Option<String>,
}

impl std::fmt::Debug for SubscriberDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberDescriptor")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("persistent", &self.persistent)
            .field("sync", &self.sync)
            .field("priority", &self.priority)
            .field("source_module", &self.source_module)
            .finish_non_exhaustive()
    }
}

impl SubscriberDescriptor {
    /// Create an asynchronous, non-persistent descriptor at default priority.
    pub fn new(
        id: impl Into<String>,
        event: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            event: event.into(),
            handler,
            persistent: false,
            sync: false,
            priority: DEFAULT_PRIORITY,
            source_module: None,
        }
    }

    /// Run this subscriber in the synchronous veto phase.
    #[must_use]
    pub fn synchronous(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Receive persistent events again during offline processing.
    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Record the owning module.
    #[must_use]
    pub fn from_module(mut self, module: impl Into<String>) -> Self {
        self.source_module = Some(module.into());
        self
    }

    /// Check the descriptor is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Registration`] for an empty identifier or a
    /// malformed event name.
    pub fn validate(&self) -> BusResult<()> {
        if self.id.trim().is_empty() {
            return Err(BusError::Registration(format!(
                "subscriber for '{}' has an empty identifier",
                self.event
            )));
        }
        validate_event_name(&self.event).map_err(|e| {
            BusError::Registration(format!("subscriber '{}': {e}", self.id))
        })
    }
}

struct Registered {
    seq: u64,
    descriptor: Arc<SubscriberDescriptor>,
}

/// Mapping from event name to its ordered subscribers.
///
/// Owned by one bus instance; there is no global registry.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: DashMap<String, Vec<Registered>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("event_count", &self.entries.len())
            .field("subscriber_count", &self.len())
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor, replacing any existing one with the same id and
    /// event.
    ///
    /// A replaced descriptor keeps its original registration order.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Registration`] if the descriptor is malformed.
    pub fn register(&self, descriptor: SubscriberDescriptor) -> BusResult<()> {
        descriptor.validate()?;

        let mut list = self.entries.entry(descriptor.event.clone()).or_default();
        let descriptor = Arc::new(descriptor);

        if let Some(existing) = list.iter_mut().find(|r| r.descriptor.id == descriptor.id) {
            debug!(
                event = %descriptor.event,
                subscriber = %descriptor.id,
                "Replacing subscriber"
            );
            existing.descriptor = descriptor;
        } else {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            debug!(
                event = %descriptor.event,
                subscriber = %descriptor.id,
                priority = descriptor.priority,
                sync = descriptor.sync,
                "Registered subscriber"
            );
            list.push(Registered { seq, descriptor });
        }

        list.sort_by_key(|r| (r.descriptor.priority, r.seq));
        Ok(())
    }

    /// Remove one subscriber. Returns `true` if it existed.
    pub fn unregister(&self, event: &str, id: &str) -> bool {
        let removed = match self.entries.get_mut(event) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|r| r.descriptor.id != id);
                before != list.len()
            },
            None => false,
        };
        self.entries.remove_if(event, |_, list| list.is_empty());
        removed
    }

    /// Remove every subscriber owned by `module`. Returns how many were
    /// removed; zero when the module has none.
    pub fn unregister_all(&self, module: &str) -> usize {
        let mut removed = 0_usize;
        for mut list in self.entries.iter_mut() {
            let before = list.len();
            list.retain(|r| r.descriptor.source_module.as_deref() != Some(module));
            removed = removed.saturating_add(before.saturating_sub(list.len()));
        }
        self.entries.retain(|_, list| !list.is_empty());

        if removed > 0 {
            debug!(module, removed, "Unregistered module subscribers");
        }
        removed
    }

    /// Subscribers for `event`, by priority ascending then registration
    /// order. Empty when nothing is subscribed.
    #[must_use]
    pub fn lookup(&self, event: &str) -> Vec<Arc<SubscriberDescriptor>> {
        let found: Vec<_> = self
            .entries
            .get(event)
            .map(|list| list.iter().map(|r| Arc::clone(&r.descriptor)).collect())
            .unwrap_or_default();
        trace!(event, count = found.len(), "Subscriber lookup");
        found
    }

    /// Total number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|list| list.len()).sum()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Event names with at least one subscriber, sorted.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Remove every subscriber.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
