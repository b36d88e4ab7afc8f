//! Prelude module - commonly used types for convenient import.
//!
//! Use `use courier_events::prelude::*;` to import all essential types.

// Bus
pub use crate::{AsyncPolicy, EventBus, EventBusBuilder};

// Events
pub use crate::{EmitOptions, Event, EventContext, EventEnvelope, HandlerOutcome, Veto};

// Subscribers
pub use crate::{EventHandler, HandlerResult, SubscriberDescriptor, handler_fn};

// Delivery
pub use crate::{DeliveryStrategy, EmitReceipt, LocalStrategy, OfflineOptions, RemoteStrategy};

// Errors
pub use crate::{BusError, BusResult, HandlerError};
