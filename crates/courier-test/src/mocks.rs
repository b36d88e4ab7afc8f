//! Test doubles for subscribers and queue stores.
//!
//! Handlers are cheap to clone: clones share their recorded state, so a test
//! keeps one copy for assertions and registers another through
//! [`handler`](RecordingHandler::handler).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_events::{
    EventEnvelope, EventHandler, HandlerError, HandlerOutcome, HandlerResult, Veto,
};
use courier_storage::{
    MemoryQueueStore, QueueStats, QueueStore, QueuedEvent, StorageError, StorageResult,
};

/// Shared log of handler labels in invocation order.
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn push_label(log: Option<&(CallLog, String)>) {
    if let Some((log, label)) = log
        && let Ok(mut guard) = log.lock()
    {
        guard.push(label.clone());
    }
}

// ---------------------------------------------------------------------------
// RecordingHandler
// ---------------------------------------------------------------------------

/// Handler that records every envelope it receives and approves.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<EventEnvelope>>>,
    order: Option<(CallLog, String)>,
}

impl RecordingHandler {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append `label` to a log shared with other handlers.
    #[must_use]
    pub fn with_call_log(mut self, log: &CallLog, label: impl Into<String>) -> Self {
        self.order = Some((Arc::clone(log), label.into()));
        self
    }

    /// Shareable handler feeding this recorder.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(self.clone())
    }

    /// Number of envelopes received.
    #[must_use]
    pub fn count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }

    /// Envelopes received, in order.
    #[must_use]
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Queue ids of the envelopes received, skipping live-only ones.
    #[must_use]
    pub fn queued_ids(&self) -> Vec<u64> {
        self.envelopes()
            .iter()
            .filter_map(|e| e.queued_id)
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> HandlerResult {
        if let Ok(mut guard) = self.seen.lock() {
            guard.push(envelope.clone());
        }
        push_label(self.order.as_ref());
        Ok(HandlerOutcome::Continue)
    }
}

// ---------------------------------------------------------------------------
// VetoHandler
// ---------------------------------------------------------------------------

type VetoPredicate = Arc<dyn Fn(&EventEnvelope) -> bool + Send + Sync>;

/// Handler that vetoes, unconditionally or when a predicate matches.
#[derive(Clone)]
pub struct VetoHandler {
    veto: Veto,
    when: Option<VetoPredicate>,
    calls: Arc<AtomicUsize>,
    order: Option<(CallLog, String)>,
}

impl std::fmt::Debug for VetoHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VetoHandler")
            .field("veto", &self.veto)
            .field("conditional", &self.when.is_some())
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl VetoHandler {
    /// Always veto with `veto`.
    #[must_use]
    pub fn new(veto: Veto) -> Self {
        Self {
            veto,
            when: None,
            calls: Arc::new(AtomicUsize::new(0)),
            order: None,
        }
    }

    /// Veto only when `predicate` returns `true`; approve otherwise.
    #[must_use]
    pub fn when<F>(veto: Veto, predicate: F) -> Self
    where
        F: Fn(&EventEnvelope) -> bool + Send + Sync + 'static,
    {
        Self {
            when: Some(Arc::new(predicate)),
            ..Self::new(veto)
        }
    }

    /// Also append `label` to a shared call log.
    #[must_use]
    pub fn with_call_log(mut self, log: &CallLog, label: impl Into<String>) -> Self {
        self.order = Some((Arc::clone(log), label.into()));
        self
    }

    /// Shareable handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(self.clone())
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for VetoHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        push_label(self.order.as_ref());
        let vetoes = self.when.as_ref().is_none_or(|pred| pred(envelope));
        if vetoes {
            Ok(HandlerOutcome::Veto(self.veto.clone()))
        } else {
            Ok(HandlerOutcome::Continue)
        }
    }
}

// ---------------------------------------------------------------------------
// FailingHandler
// ---------------------------------------------------------------------------

/// Handler that returns [`HandlerError::Failed`].
///
/// By default it fails forever; [`times`](FailingHandler::times) makes it
/// succeed after a number of failures.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
    remaining: Option<Arc<AtomicUsize>>,
    calls: Arc<AtomicUsize>,
}

impl FailingHandler {
    /// Always fail with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            remaining: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `failures` calls, then approve.
    #[must_use]
    pub fn times(message: impl Into<String>, failures: usize) -> Self {
        Self {
            remaining: Some(Arc::new(AtomicUsize::new(failures))),
            ..Self::new(message)
        }
    }

    /// Shareable handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(self.clone())
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, _envelope: &EventEnvelope) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        };
        if fail {
            Err(HandlerError::Failed(self.message.clone()))
        } else {
            Ok(HandlerOutcome::Continue)
        }
    }
}

// ---------------------------------------------------------------------------
// SlowHandler
// ---------------------------------------------------------------------------

/// Handler that sleeps before approving.
#[derive(Debug, Clone)]
pub struct SlowHandler {
    delay: Duration,
    completed: Arc<AtomicUsize>,
}

impl SlowHandler {
    /// Sleep for `delay` on every call.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shareable handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(self.clone())
    }

    /// Number of calls that ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for SlowHandler {
    async fn handle(&self, _envelope: &EventEnvelope) -> HandlerResult {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerOutcome::Continue)
    }
}

// ---------------------------------------------------------------------------
// FlakyQueueStore
// ---------------------------------------------------------------------------

/// Queue store that can be switched offline.
///
/// While offline every operation returns [`StorageError::Connection`],
/// which the bus reports as a delivery error.
#[derive(Debug, Clone)]
pub struct FlakyQueueStore {
    inner: Arc<dyn QueueStore>,
    offline: Arc<AtomicBool>,
}

impl Default for FlakyQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyQueueStore {
    /// Wrap a fresh in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(Arc::new(MemoryQueueStore::new()))
    }

    /// Wrap an existing store.
    #[must_use]
    pub fn wrap(inner: Arc<dyn QueueStore>) -> Self {
        Self {
            inner,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail (`true`) or pass through (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The wrapped store, bypassing the switch.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn QueueStore> {
        &self.inner
    }

    fn check(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::Connection("store unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueStore for FlakyQueueStore {
    async fn next_id(&self) -> StorageResult<u64> {
        self.check()?;
        self.inner.next_id().await
    }

    async fn append(&self, record: QueuedEvent) -> StorageResult<()> {
        self.check()?;
        self.inner.append(record).await
    }

    async fn range_after(&self, cursor: u64, limit: usize) -> StorageResult<Vec<QueuedEvent>> {
        self.check()?;
        self.inner.range_after(cursor, limit).await
    }

    async fn get(&self, id: u64) -> StorageResult<Option<QueuedEvent>> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn mark_processed(&self, id: u64, at: DateTime<Utc>) -> StorageResult<bool> {
        self.check()?;
        self.inner.mark_processed(id, at).await
    }

    async fn cursor(&self, consumer: &str) -> StorageResult<u64> {
        self.check()?;
        self.inner.cursor(consumer).await
    }

    async fn set_cursor(&self, consumer: &str, id: u64) -> StorageResult<()> {
        self.check()?;
        self.inner.set_cursor(consumer, id).await
    }

    async fn clear(&self) -> StorageResult<u64> {
        self.check()?;
        self.inner.clear().await
    }

    async fn clear_processed(&self) -> StorageResult<u64> {
        self.check()?;
        self.inner.clear_processed().await
    }

    async fn stats(&self) -> StorageResult<QueueStats> {
        self.check()?;
        self.inner.stats().await
    }

    async fn try_lock(&self, name: &str, token: &str, ttl: Duration) -> StorageResult<bool> {
        self.check()?;
        self.inner.try_lock(name, token, ttl).await
    }

    async fn unlock(&self, name: &str, token: &str) -> StorageResult<bool> {
        self.check()?;
        self.inner.unlock(name, token).await
    }
}
