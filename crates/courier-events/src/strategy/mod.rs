//! Delivery strategies.
//!
//! A closed set of transports behind one contract, chosen once when the bus
//! is built:
//!
//! - [`LocalStrategy`]: in-process only, optionally backed by a queue for
//!   tests.
//! - [`RemoteStrategy`]: every persistent event goes through a shared
//!   [`QueueStore`] so other processes can catch up on it.

mod local;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_storage::{QueueStats, QueueStore, QueuedEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use local::LocalStrategy;
pub use remote::{DEFAULT_LOCK_TTL, RemoteStrategy};

use crate::dispatcher::{AsyncPolicy, DispatchOutcome, Dispatcher, SyncVerdict};
use crate::error::{BusError, BusResult};
use crate::event::{Event, EventEnvelope};

/// Default number of records read by one offline pass.
pub const DEFAULT_OFFLINE_LIMIT: usize = 100;

/// Consumer name used when none is configured.
pub const DEFAULT_CONSUMER: &str = "default";

/// Which strategy a bus uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// In-process delivery.
    Local,
    /// Shared durable store plus in-process delivery.
    Remote,
}

impl StrategyKind {
    /// The async policy used when none is configured.
    #[must_use]
    pub fn default_async_policy(self) -> AsyncPolicy {
        match self {
            Self::Local => AsyncPolicy::Await,
            Self::Remote => AsyncPolicy::Detach,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// What `emit` returns when the event reached the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitReceipt {
    /// Verdict of the dispatch.
    pub outcome: DispatchOutcome,
    /// Queue record id, when the event was persisted.
    pub queued_id: Option<u64>,
}

impl EmitReceipt {
    /// Whether a synchronous subscriber vetoed.
    #[must_use]
    pub fn is_vetoed(&self) -> bool {
        self.outcome.is_vetoed()
    }
}

/// Options for one offline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineOptions {
    /// Maximum number of records read.
    pub limit: usize,
}

impl Default for OfflineOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_OFFLINE_LIMIT,
        }
    }
}

impl OfflineOptions {
    /// Options with an explicit limit.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit }
    }
}

/// Result of one offline pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OfflineReport {
    /// Records dispatched and marked processed.
    pub processed: usize,
    /// Cursor after the pass.
    pub last_id: u64,
    /// Record whose dispatch failed. It stays pending and the pass stopped
    /// there.
    pub failed_id: Option<u64>,
}

/// Active delivery strategy.
#[derive(Debug, Clone)]
pub enum DeliveryStrategy {
    /// In-process delivery.
    Local(LocalStrategy),
    /// Shared durable store plus in-process delivery.
    Remote(RemoteStrategy),
}

impl DeliveryStrategy {
    /// Which variant this is.
    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Local(_) => StrategyKind::Local,
            Self::Remote(_) => StrategyKind::Remote,
        }
    }

    /// The queue behind this strategy, if any.
    #[must_use]
    pub fn queue(&self) -> Option<&Arc<dyn QueueStore>> {
        match self {
            Self::Local(s) => s.queue(),
            Self::Remote(s) => Some(s.store()),
        }
    }

    /// Consumer name used for offline processing.
    #[must_use]
    pub fn consumer(&self) -> &str {
        match self {
            Self::Local(s) => s.consumer(),
            Self::Remote(s) => s.consumer(),
        }
    }

    /// Persist (when requested and possible) and dispatch an event.
    ///
    /// # Errors
    ///
    /// [`BusError::Delivery`] when the queue is unreachable, or
    /// [`BusError::Handler`] when a synchronous subscriber fails.
    pub async fn emit(
        &self,
        event: Event,
        dispatcher: &Dispatcher,
        policy: AsyncPolicy,
    ) -> BusResult<EmitReceipt> {
        match self {
            Self::Local(s) => s.emit(event, dispatcher, policy).await,
            Self::Remote(s) => s.emit(event, dispatcher, policy).await,
        }
    }

    /// Replay pending records from the consumer's cursor.
    ///
    /// # Errors
    ///
    /// [`BusError::Delivery`] when the queue is unreachable, or
    /// [`BusError::ConsumerBusy`] when another consumer holds the lock.
    pub async fn process_offline(
        &self,
        dispatcher: &Dispatcher,
        options: OfflineOptions,
    ) -> BusResult<OfflineReport> {
        match self {
            Self::Local(s) => s.process_offline(dispatcher, options).await,
            Self::Remote(s) => s.process_offline(dispatcher, options).await,
        }
    }

    /// Delete every record. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`BusError::Delivery`] when the queue is unreachable.
    pub async fn clear_queue(&self) -> BusResult<u64> {
        let Some(store) = self.queue() else {
            return Ok(0);
        };
        let removed = store.clear().await?;
        info!(removed, strategy = %self.kind(), "Cleared event queue");
        Ok(removed)
    }

    /// Delete processed records. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`BusError::Delivery`] when the queue is unreachable.
    pub async fn clear_processed(&self) -> BusResult<u64> {
        let Some(store) = self.queue() else {
            return Ok(0);
        };
        let removed = store.clear_processed().await?;
        info!(removed, strategy = %self.kind(), "Cleared processed events");
        Ok(removed)
    }

    /// Queue counters. All zero when there is no queue.
    ///
    /// # Errors
    ///
    /// [`BusError::Delivery`] when the queue is unreachable.
    pub async fn stats(&self) -> BusResult<QueueStats> {
        match self.queue() {
            Some(store) => Ok(store.stats().await?),
            None => Ok(QueueStats::default()),
        }
    }

    /// The consumer's cursor. Zero when there is no queue.
    ///
    /// # Errors
    ///
    /// [`BusError::Delivery`] when the queue is unreachable.
    pub async fn cursor(&self) -> BusResult<u64> {
        match self.queue() {
            Some(store) => Ok(store.cursor(self.consumer()).await?),
            None => Ok(0),
        }
    }
}

/// Append a persistent event to the queue and return its id.
pub(crate) async fn enqueue(store: &dyn QueueStore, envelope: &EventEnvelope) -> BusResult<u64> {
    let id = store.next_id().await?;
    let mut record = QueuedEvent::new(id, envelope.event.clone(), envelope.payload.clone());
    record.persistent = envelope.persistent;
    store.append(record).await?;
    debug!(event = %envelope.event, queued_id = id, "Queued persistent event");
    Ok(id)
}

/// Dispatch an event on the live path.
///
/// The event is only queued once the synchronous subscribers approved it,
/// so a vetoed or failed mutation never reaches offline replay. Queueing
/// happens before any asynchronous subscriber starts.
pub(crate) async fn deliver(
    store: Option<&dyn QueueStore>,
    event: Event,
    dispatcher: &Dispatcher,
    policy: AsyncPolicy,
) -> BusResult<EmitReceipt> {
    let mut envelope = EventEnvelope::live(event, None);

    let pending = match dispatcher.run_sync(&envelope).await? {
        SyncVerdict::Approved(pending) => pending,
        SyncVerdict::Vetoed(outcome) => {
            return Ok(EmitReceipt {
                outcome,
                queued_id: None,
            });
        },
    };

    if let Some(store) = store.filter(|_| envelope.persistent) {
        envelope.queued_id = Some(enqueue(store, &envelope).await?);
    }

    let queued_id = envelope.queued_id;
    let outcome = dispatcher.run_async(envelope, pending, policy).await;
    Ok(EmitReceipt { outcome, queued_id })
}

/// Advisory lock held for the length of an offline pass.
#[derive(Debug)]
pub(crate) struct OfflineLock {
    pub(crate) name: String,
    pub(crate) token: String,
    pub(crate) ttl: Duration,
}

impl OfflineLock {
    /// Extend the lock by another `ttl`. Fails with
    /// [`BusError::ConsumerBusy`] once someone else holds it.
    async fn refresh(&self, store: &dyn QueueStore, consumer: &str) -> BusResult<()> {
        if store.try_lock(&self.name, &self.token, self.ttl).await? {
            return Ok(());
        }
        warn!(consumer, lock = %self.name, "Offline lock lost mid-pass, stopping");
        Err(BusError::ConsumerBusy(consumer.to_owned()))
    }
}

/// Replay up to `limit` records after the consumer's cursor.
///
/// Each success marks the record processed and advances the cursor. The
/// first failing record stops the pass and stays pending. With a `lock`, it
/// is extended before every record and the pass stops if it was lost.
pub(crate) async fn drain(
    store: &dyn QueueStore,
    consumer: &str,
    dispatcher: &Dispatcher,
    limit: usize,
    lock: Option<&OfflineLock>,
) -> BusResult<OfflineReport> {
    let start = store.cursor(consumer).await?;
    let records = store.range_after(start, limit).await?;

    let mut report = OfflineReport {
        last_id: start,
        ..OfflineReport::default()
    };

    for record in records {
        if let Some(lock) = lock {
            lock.refresh(store, consumer).await?;
        }

        match dispatcher
            .dispatch(EventEnvelope::replay(&record), AsyncPolicy::Await)
            .await
        {
            Ok(_) => {},
            Err(BusError::Handler {
                subscriber, source, ..
            }) => {
                warn!(
                    event = %record.event,
                    queued_id = record.id,
                    subscriber = %subscriber,
                    error = %source,
                    "Offline dispatch failed, record left pending"
                );
                report.failed_id = Some(record.id);
                break;
            },
            Err(e) => return Err(e),
        }

        store.mark_processed(record.id, Utc::now()).await?;
        store.set_cursor(consumer, record.id).await?;
        report.processed = report.processed.saturating_add(1);
        report.last_id = record.id;
    }

    info!(
        consumer,
        processed = report.processed,
        last_id = report.last_id,
        failed_id = ?report.failed_id,
        "Offline processing pass finished"
    );
    Ok(report)
}
