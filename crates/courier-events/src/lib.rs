//! Courier Events - publish/subscribe event bus with veto subscribers and a
//! durable queue.
//!
//! This crate provides:
//! - A per-bus subscriber registry ordered by priority
//! - A dispatcher that runs synchronous (veto) subscribers before
//!   asynchronous ones and isolates asynchronous failures
//! - Local and remote delivery strategies, the latter backed by a shared
//!   [`QueueStore`](courier_storage::QueueStore) for offline catch-up
//! - The [`EventBus`] facade tying them together
//!
//! # Example
//!
//! ```rust
//! use courier_events::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), BusError> {
//! let bus = EventBus::local();
//!
//! bus.register(
//!     SubscriberDescriptor::new(
//!         "prevent-uncomplete",
//!         "example.todo.updated",
//!         handler_fn(|env| async move {
//!             let reopening = env.previous_field("isDone") == Some(&json!(true))
//!                 && env.payload.get("isDone") == Some(&json!(false));
//!             if reopening {
//!                 Ok(HandlerOutcome::Veto(Veto::new("Completed todos cannot be reopened")))
//!             } else {
//!                 Ok(HandlerOutcome::Continue)
//!             }
//!         }),
//!     )
//!     .synchronous()
//!     .with_priority(60),
//! )?;
//!
//! let receipt = bus
//!     .emit_event(
//!         "example.todo.updated",
//!         json!({"isDone": false}),
//!         EmitOptions::new().with_previous(json!({"isDone": true})),
//!     )
//!     .await?;
//! assert_eq!(receipt.outcome.veto().map(|v| v.status), Some(422));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod dispatcher;
mod error;
mod event;
mod strategy;
mod subscriber;

pub use bus::{EventBus, EventBusBuilder};
pub use dispatcher::{AsyncPolicy, DispatchOutcome, Dispatcher};
pub use error::{BusError, BusResult, HandlerError};
pub use event::{
    DEFAULT_VETO_STATUS, DispatchPhase, EmitOptions, Event, EventContext, EventEnvelope,
    HandlerOutcome, Veto, validate_event_name,
};
pub use strategy::{
    DEFAULT_CONSUMER, DEFAULT_LOCK_TTL, DEFAULT_OFFLINE_LIMIT, DeliveryStrategy, EmitReceipt,
    LocalStrategy, OfflineOptions, OfflineReport, RemoteStrategy, StrategyKind,
};
pub use subscriber::{
    DEFAULT_PRIORITY, EventHandler, FnHandler, HandlerResult, SubscriberDescriptor,
    SubscriberRegistry, handler_fn,
};
