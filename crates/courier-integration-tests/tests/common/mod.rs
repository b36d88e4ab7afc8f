//! Shared fixtures for integration tests.

use std::sync::Arc;

use courier_events::{
    DeliveryStrategy, EventBus, HandlerOutcome, RemoteStrategy, SubscriberDescriptor, Veto,
    handler_fn,
};
use courier_storage::{MemoryQueueStore, QueueStore};
use serde_json::json;

/// A fresh in-memory store, shared as the trait object buses take.
#[allow(dead_code)]
pub fn shared_store() -> Arc<dyn QueueStore> {
    Arc::new(MemoryQueueStore::new())
}

/// Remote bus over `store` with its own consumer name.
#[allow(dead_code)]
pub fn remote_bus(store: &Arc<dyn QueueStore>, consumer: &str) -> EventBus {
    EventBus::builder(DeliveryStrategy::Remote(
        RemoteStrategy::new(Arc::clone(store)).with_consumer(consumer),
    ))
    .build()
}

/// The todo example's guard: completed todos cannot be reopened.
#[allow(dead_code)]
pub fn prevent_uncomplete() -> SubscriberDescriptor {
    SubscriberDescriptor::new(
        "prevent-uncomplete",
        "example.todo.updated",
        handler_fn(|env| async move {
            let reopening = env.previous_field("isDone") == Some(&json!(true))
                && env.payload.get("isDone") == Some(&json!(false));
            if reopening {
                Ok(HandlerOutcome::Veto(
                    Veto::new("Completed todos cannot be reopened").with_status(422),
                ))
            } else {
                Ok(HandlerOutcome::Continue)
            }
        }),
    )
    .synchronous()
    .with_priority(60)
}
