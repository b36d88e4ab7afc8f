//! Dispatch of one event to its subscribers, including the synchronous veto
//! phase.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::error::{BusError, BusResult, HandlerError};
use crate::event::{DispatchPhase, EventEnvelope, HandlerOutcome, Veto};
use crate::subscriber::{HandlerResult, SubscriberDescriptor, SubscriberRegistry};

/// How the emitter relates to asynchronous subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncPolicy {
    /// Wait for every asynchronous subscriber to settle before returning.
    Await,
    /// Spawn asynchronous subscribers and return immediately.
    Detach,
}

impl std::fmt::Display for AsyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Await => f.write_str("await"),
            Self::Detach => f.write_str("detach"),
        }
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No veto. Counts of subscribers invoked (or scheduled) per phase.
    Completed {
        /// Synchronous subscribers that ran.
        sync_invoked: usize,
        /// Asynchronous subscribers started.
        async_invoked: usize,
    },
    /// A synchronous subscriber rejected the mutation. The caller must abort
    /// it.
    Vetoed {
        /// Identifier of the vetoing subscriber.
        subscriber: String,
        /// The verdict, forwarded verbatim to the client.
        veto: Veto,
    },
}

impl DispatchOutcome {
    /// Whether a synchronous subscriber vetoed.
    #[must_use]
    pub fn is_vetoed(&self) -> bool {
        matches!(self, Self::Vetoed { .. })
    }

    /// The veto, if any.
    #[must_use]
    pub fn veto(&self) -> Option<&Veto> {
        match self {
            Self::Vetoed { veto, .. } => Some(veto),
            Self::Completed { .. } => None,
        }
    }
}

/// Verdict of the synchronous phase.
#[derive(Debug)]
pub(crate) enum SyncVerdict {
    /// Every synchronous subscriber let the mutation through.
    Approved(PendingAsync),
    /// Terminal: nothing asynchronous may run.
    Vetoed(DispatchOutcome),
}

/// Asynchronous subscribers still owed an invocation.
#[derive(Debug)]
pub(crate) struct PendingAsync {
    sync_invoked: usize,
    subscribers: Vec<Arc<SubscriberDescriptor>>,
}

/// Invokes registered subscribers for an envelope.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<SubscriberRegistry>,
    handler_timeout: Option<Duration>,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            handler_timeout: None,
            tracker: TaskTracker::new(),
        }
    }

    /// Bound every handler invocation. `None` disables the bound.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// The per-handler timeout.
    #[must_use]
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout
    }

    /// The registry this dispatcher reads.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Dispatch `envelope`: the synchronous phase, then, unless vetoed, the
    /// asynchronous one.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Handler`] when a synchronous subscriber fails.
    /// Asynchronous failures are logged and never returned.
    pub async fn dispatch(
        &self,
        envelope: EventEnvelope,
        policy: AsyncPolicy,
    ) -> BusResult<DispatchOutcome> {
        match self.run_sync(&envelope).await? {
            SyncVerdict::Approved(pending) => Ok(self.run_async(envelope, pending, policy).await),
            SyncVerdict::Vetoed(outcome) => Ok(outcome),
        }
    }

    /// Run the synchronous subscribers one at a time, by priority.
    ///
    /// During a live dispatch the first veto stops the chain. During replay
    /// only persistent subscribers are selected and vetoes are logged.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Handler`] when a synchronous subscriber fails.
    pub(crate) async fn run_sync(&self, envelope: &EventEnvelope) -> BusResult<SyncVerdict> {
        let mut subscribers = self.registry.lookup(&envelope.event);
        if envelope.phase == DispatchPhase::Replay {
            subscribers.retain(|s| s.persistent);
        }
        let (sync_subs, async_subs): (Vec<_>, Vec<_>) =
            subscribers.into_iter().partition(|s| s.sync);

        debug!(
            event = %envelope.event,
            phase = ?envelope.phase,
            sync_count = sync_subs.len(),
            async_count = async_subs.len(),
            "Dispatching event"
        );

        for subscriber in &sync_subs {
            match invoke(subscriber, envelope, self.handler_timeout).await {
                Ok(HandlerOutcome::Continue) => {},
                Ok(HandlerOutcome::Veto(veto)) => match envelope.phase {
                    DispatchPhase::Live => {
                        debug!(
                            event = %envelope.event,
                            subscriber = %subscriber.id,
                            status = veto.status,
                            "Event vetoed"
                        );
                        return Ok(SyncVerdict::Vetoed(DispatchOutcome::Vetoed {
                            subscriber: subscriber.id.clone(),
                            veto,
                        }));
                    },
                    DispatchPhase::Replay => {
                        warn!(
                            event = %envelope.event,
                            subscriber = %subscriber.id,
                            queued_id = ?envelope.queued_id,
                            message = %veto.message,
                            "Veto during replay ignored, mutation already committed"
                        );
                    },
                },
                Err(source) => {
                    return Err(BusError::Handler {
                        subscriber: subscriber.id.clone(),
                        event: envelope.event.clone(),
                        source,
                    });
                },
            }
        }

        Ok(SyncVerdict::Approved(PendingAsync {
            sync_invoked: sync_subs.len(),
            subscribers: async_subs,
        }))
    }

    /// Start the asynchronous subscribers selected by [`Self::run_sync`].
    pub(crate) async fn run_async(
        &self,
        envelope: EventEnvelope,
        pending: PendingAsync,
        policy: AsyncPolicy,
    ) -> DispatchOutcome {
        let PendingAsync {
            sync_invoked,
            subscribers,
        } = pending;
        let async_invoked = subscribers.len();

        let envelope = Arc::new(envelope);
        match policy {
            AsyncPolicy::Await => {
                join_all(
                    subscribers
                        .into_iter()
                        .map(|s| run_isolated(s, Arc::clone(&envelope), self.handler_timeout)),
                )
                .await;
            },
            AsyncPolicy::Detach => {
                for subscriber in subscribers {
                    self.tracker.spawn(run_isolated(
                        subscriber,
                        Arc::clone(&envelope),
                        self.handler_timeout,
                    ));
                }
            },
        }

        DispatchOutcome::Completed {
            sync_invoked,
            async_invoked,
        }
    }

    /// Wait until every detached subscriber has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Number of detached subscribers still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

/// Run one asynchronous subscriber, logging any failure.
async fn run_isolated(
    subscriber: Arc<SubscriberDescriptor>,
    envelope: Arc<EventEnvelope>,
    timeout: Option<Duration>,
) {
    match invoke(&subscriber, &envelope, timeout).await {
        Ok(HandlerOutcome::Continue) => {},
        Ok(HandlerOutcome::Veto(veto)) => {
            warn!(
                event = %envelope.event,
                subscriber = %subscriber.id,
                message = %veto.message,
                "Asynchronous subscriber returned a veto, ignored"
            );
        },
        Err(e) => {
            error!(
                event = %envelope.event,
                subscriber = %subscriber.id,
                queued_id = ?envelope.queued_id,
                error = %e,
                "Asynchronous subscriber failed"
            );
        },
    }
}

/// Invoke a handler inside a panic boundary and optional timeout.
async fn invoke(
    subscriber: &SubscriberDescriptor,
    envelope: &EventEnvelope,
    timeout: Option<Duration>,
) -> HandlerResult {
    let call = AssertUnwindSafe(subscriber.handler.handle(envelope)).catch_unwind();

    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_) => return Err(HandlerError::Timeout(limit)),
        },
        None => call.await,
    };

    caught.unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
