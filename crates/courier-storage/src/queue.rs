//! Queue record types, the [`QueueStore`] trait and the in-memory backend.
//!
//! The queue is append-only. A record is created when a persistent event is
//! emitted, flipped from pending to processed once, and otherwise never
//! touched until an operator clears it. Identifiers come from a sequence
//! counter that is never reset, so a consumer cursor stays meaningful across
//! [`clear`](QueueStore::clear) calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a consumer or lock name.
///
/// Names must be non-empty and must not contain whitespace or null bytes,
/// since they end up embedded in backend keys.
pub(crate) fn validate_name(kind: &str, name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidKey(format!("{kind} must not be empty")));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '\0') {
        return Err(StorageError::InvalidKey(format!(
            "{kind} must not contain whitespace or null bytes: {name:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A persistent event recorded in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Strictly increasing identifier within one store.
    pub id: u64,
    /// Dot-namespaced event name, e.g. `example.todo.created`.
    pub event: String,
    /// Opaque event payload.
    pub payload: serde_json::Value,
    /// Whether the emitter asked for durable delivery.
    #[serde(default = "default_persistent")]
    pub persistent: bool,
    /// When the record was appended.
    pub created_at: DateTime<Utc>,
    /// When the record was processed, `None` while pending.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

fn default_persistent() -> bool {
    true
}

impl QueuedEvent {
    /// Create a pending record.
    #[must_use]
    pub fn new(id: u64, event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id,
            event: event.into(),
            payload,
            persistent: true,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Whether the record has been processed.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Point-in-time counts for a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Records currently stored.
    pub total: u64,
    /// Records still pending.
    pub pending: u64,
    /// Records already processed.
    pub processed: u64,
    /// Last identifier handed out by the sequence counter.
    pub last_id: u64,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable queue backing persistent events.
///
/// Implementations must hand out identifiers atomically: two emitters in
/// different processes must never receive the same id.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Atomically advance the sequence counter and return the new value.
    ///
    /// The first id on a fresh store is `1`.
    async fn next_id(&self) -> StorageResult<u64>;

    /// Append a record keyed and ordered by its id.
    async fn append(&self, record: QueuedEvent) -> StorageResult<()>;

    /// Fetch up to `limit` records with an id strictly greater than `cursor`,
    /// in ascending id order.
    async fn range_after(&self, cursor: u64, limit: usize) -> StorageResult<Vec<QueuedEvent>>;

    /// Fetch a single record by id.
    async fn get(&self, id: u64) -> StorageResult<Option<QueuedEvent>>;

    /// Flip a record from pending to processed.
    ///
    /// Returns `false` if the record does not exist. Marking an already
    /// processed record keeps its original timestamp.
    async fn mark_processed(&self, id: u64, at: DateTime<Utc>) -> StorageResult<bool>;

    /// Read the cursor of a consumer. Unknown consumers start at `0`.
    async fn cursor(&self, consumer: &str) -> StorageResult<u64>;

    /// Persist the cursor of a consumer.
    async fn set_cursor(&self, consumer: &str, id: u64) -> StorageResult<()>;

    /// Delete every record regardless of state. Returns the number removed.
    async fn clear(&self) -> StorageResult<u64>;

    /// Delete processed records only. Returns the number removed.
    async fn clear_processed(&self) -> StorageResult<u64>;

    /// Current queue counts.
    async fn stats(&self) -> StorageResult<QueueStats>;

    /// Try to take the advisory lock `name` for `ttl`, identified by `token`.
    ///
    /// Returns `true` if the lock was taken (or was already held by `token`).
    async fn try_lock(&self, name: &str, token: &str, ttl: Duration) -> StorageResult<bool>;

    /// Release the advisory lock `name` if it is held by `token`.
    async fn unlock(&self, name: &str, token: &str) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (always available)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    seq: u64,
    records: BTreeMap<u64, QueuedEvent>,
    cursors: HashMap<String, u64>,
    locks: HashMap<String, (String, Instant)>,
}

/// In-memory queue for single-process deployments and tests.
///
/// Sharing one `Arc<MemoryQueueStore>` between several buses behaves like
/// several processes pointed at the same external store.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: Mutex<MemoryState>,
}

impl MemoryQueueStore {
    /// Create an empty in-memory queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StorageResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn next_id(&self) -> StorageResult<u64> {
        let mut state = self.state()?;
        state.seq = state
            .seq
            .checked_add(1)
            .ok_or_else(|| StorageError::Internal("sequence counter overflow".into()))?;
        Ok(state.seq)
    }

    async fn append(&self, record: QueuedEvent) -> StorageResult<()> {
        let mut state = self.state()?;
        trace!(queued_id = record.id, event = %record.event, "Appending queue record");
        state.records.insert(record.id, record);
        Ok(())
    }

    async fn range_after(&self, cursor: u64, limit: usize) -> StorageResult<Vec<QueuedEvent>> {
        let state = self.state()?;
        Ok(state
            .records
            .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn get(&self, id: u64) -> StorageResult<Option<QueuedEvent>> {
        Ok(self.state()?.records.get(&id).cloned())
    }

    async fn mark_processed(&self, id: u64, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut state = self.state()?;
        match state.records.get_mut(&id) {
            Some(record) => {
                if record.processed_at.is_none() {
                    record.processed_at = Some(at);
                }
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn cursor(&self, consumer: &str) -> StorageResult<u64> {
        validate_name("consumer", consumer)?;
        Ok(self
            .state()?
            .cursors
            .get(consumer)
            .copied()
            .unwrap_or_default())
    }

    async fn set_cursor(&self, consumer: &str, id: u64) -> StorageResult<()> {
        validate_name("consumer", consumer)?;
        self.state()?.cursors.insert(consumer.to_owned(), id);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<u64> {
        let mut state = self.state()?;
        let removed = state.records.len() as u64;
        state.records.clear();
        debug!(removed, "Cleared queue");
        Ok(removed)
    }

    async fn clear_processed(&self) -> StorageResult<u64> {
        let mut state = self.state()?;
        let before = state.records.len();
        state.records.retain(|_, record| !record.is_processed());
        let removed = before.saturating_sub(state.records.len()) as u64;
        debug!(removed, "Cleared processed queue records");
        Ok(removed)
    }

    async fn stats(&self) -> StorageResult<QueueStats> {
        let state = self.state()?;
        let total = state.records.len() as u64;
        let processed = state.records.values().filter(|r| r.is_processed()).count() as u64;
        Ok(QueueStats {
            total,
            pending: total.saturating_sub(processed),
            processed,
            last_id: state.seq,
        })
    }

    async fn try_lock(&self, name: &str, token: &str, ttl: Duration) -> StorageResult<bool> {
        validate_name("lock name", name)?;
        let mut state = self.state()?;
        let now = Instant::now();

        if let Some((holder, expires_at)) = state.locks.get(name)
            && holder != token
            && *expires_at > now
        {
            return Ok(false);
        }

        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| StorageError::Internal("lock ttl overflow".into()))?;
        state
            .locks
            .insert(name.to_owned(), (token.to_owned(), expires_at));
        Ok(true)
    }

    async fn unlock(&self, name: &str, token: &str) -> StorageResult<bool> {
        let mut state = self.state()?;
        if state.locks.get(name).is_some_and(|(holder, _)| holder == token) {
            state.locks.remove(name);
            return Ok(true);
        }
        Ok(false)
    }
}
