//! Courier Storage — the durable event queue behind the event bus.
//!
//! Persistent events are appended to an ordered, append-only queue with a
//! pending/processed flag per record. Consumers resume from a per-consumer
//! cursor so a process that was down can catch up on what it missed.
//!
//! # Backends
//!
//! | Backend | Feature | Use |
//! |---------|---------|-----|
//! | [`MemoryQueueStore`] | always | single process, tests |
//! | [`RedisQueueStore`] | `redis` | shared queue across processes |
//!
//! Both implement [`QueueStore`]; the event bus only sees the trait.
//!
//! # Usage
//!
//! ```rust
//! use courier_storage::{MemoryQueueStore, QueueStore, QueuedEvent};
//!
//! # async fn example() -> courier_storage::StorageResult<()> {
//! let store = MemoryQueueStore::new();
//! let id = store.next_id().await?;
//! store
//!     .append(QueuedEvent::new(id, "example.todo.created", serde_json::json!({"id": "t1"})))
//!     .await?;
//!
//! let pending = store.range_after(0, 10).await?;
//! assert_eq!(pending.len(), 1);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod queue;

#[cfg(feature = "redis")]
pub mod redis;

pub use error::{StorageError, StorageResult};
pub use queue::{MemoryQueueStore, QueueStats, QueueStore, QueuedEvent};

#[cfg(feature = "redis")]
pub use redis::RedisQueueStore;
