//! Event, envelope and veto types.

use chrono::{DateTime, Utc};
use courier_storage::QueuedEvent;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

/// Default HTTP-style status attached to a veto.
pub const DEFAULT_VETO_STATUS: u16 = 422;

/// Validate a dot-namespaced event name such as `example.todo.created`.
///
/// Names must be non-empty, contain no whitespace, and have no empty
/// segments (`a..b`, `.a`, `a.`).
///
/// # Errors
///
/// Returns [`BusError::InvalidEvent`] describing the problem.
pub fn validate_event_name(name: &str) -> BusResult<()> {
    if name.is_empty() {
        return Err(BusError::InvalidEvent("event name must not be empty".into()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(BusError::InvalidEvent(format!(
            "event name must not contain whitespace: {name:?}"
        )));
    }
    if name.split('.').any(str::is_empty) {
        return Err(BusError::InvalidEvent(format!(
            "event name has an empty segment: {name:?}"
        )));
    }
    Ok(())
}

/// Who triggered an event and in which tenant scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    /// Acting user or service, if known.
    #[serde(default)]
    pub actor: Option<String>,
    /// Tenant scope.
    #[serde(default)]
    pub tenant: Option<String>,
    /// Organization scope within the tenant.
    #[serde(default)]
    pub organization: Option<String>,
}

impl EventContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set the organization.
    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

/// Options accepted by [`EventBus::emit_event`](crate::EventBus::emit_event).
///
/// Durability is decided here, by the emitter, independent of who is
/// listening.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Record the event in the durable queue.
    pub persistent: bool,
    /// Snapshot of the state before the mutation, for veto subscribers.
    pub previous: Option<serde_json::Value>,
    /// Actor and tenant scope.
    pub context: EventContext,
}

impl EmitOptions {
    /// Options for a non-persistent event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a persistent event.
    #[must_use]
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Self::default()
        }
    }

    /// Attach the previous state snapshot.
    #[must_use]
    pub fn with_previous(mut self, previous: serde_json::Value) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Attach the actor/tenant context.
    #[must_use]
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

/// An event as submitted by a producer.
#[derive(Debug, Clone)]
pub struct Event {
    /// Dot-namespaced event name.
    pub name: String,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Record the event in the durable queue.
    pub persistent: bool,
    /// State before the mutation.
    pub previous: Option<serde_json::Value>,
    /// Actor and tenant scope.
    pub context: EventContext,
}

impl Event {
    /// Create a non-persistent event with an empty object payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Object(serde_json::Map::new()),
            persistent: false,
            previous: None,
            context: EventContext::default(),
        }
    }

    /// Build an event from a name, payload and emit options.
    pub fn from_parts(
        name: impl Into<String>,
        payload: serde_json::Value,
        options: EmitOptions,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            persistent: options.persistent,
            previous: options.previous,
            context: options.context,
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Mark the event persistent.
    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Attach the previous state snapshot.
    #[must_use]
    pub fn with_previous(mut self, previous: serde_json::Value) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Attach the actor/tenant context.
    #[must_use]
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

/// Whether a dispatch happens on the emitting path or while replaying the
/// durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    /// Dispatch triggered by `emit`. Vetoes short-circuit.
    Live,
    /// Dispatch of a queued record during offline processing. The mutation
    /// already committed, so vetoes are only logged.
    Replay,
}

/// What a subscriber receives for one dispatch.
///
/// Lives only for the duration of the dispatch and is never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Event name.
    pub event: String,
    /// Current payload candidate.
    pub payload: serde_json::Value,
    /// State before the mutation, when the emitter supplied it.
    pub previous: Option<serde_json::Value>,
    /// Actor and tenant scope.
    pub context: EventContext,
    /// Whether the emitter asked for durable delivery.
    pub persistent: bool,
    /// Queue record id, when the event was persisted. Live synchronous
    /// subscribers run before the record exists and always see `None`.
    pub queued_id: Option<u64>,
    /// Live or replayed dispatch.
    pub phase: DispatchPhase,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Envelope for a live emission.
    #[must_use]
    pub fn live(event: Event, queued_id: Option<u64>) -> Self {
        Self {
            event: event.name,
            payload: event.payload,
            previous: event.previous,
            context: event.context,
            persistent: event.persistent,
            queued_id,
            phase: DispatchPhase::Live,
            emitted_at: Utc::now(),
        }
    }

    /// Envelope for a record read back from the durable queue.
    #[must_use]
    pub fn replay(record: &QueuedEvent) -> Self {
        Self {
            event: record.event.clone(),
            payload: record.payload.clone(),
            previous: None,
            context: EventContext::default(),
            persistent: record.persistent,
            queued_id: Some(record.id),
            phase: DispatchPhase::Replay,
            emitted_at: record.created_at,
        }
    }

    /// Deserialize the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload does not match `T`.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Read a top-level field of the previous state snapshot.
    #[must_use]
    pub fn previous_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.previous.as_ref().and_then(|p| p.get(key))
    }

    /// Whether this dispatch replays a queued record.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.phase == DispatchPhase::Replay
    }
}

/// A synchronous subscriber's rejection of the triggering mutation.
///
/// Serializes as `{"ok": false, "message": ..., "status": ...}` so the HTTP
/// layer can forward it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Veto {
    /// Human-readable reason.
    pub message: String,
    /// HTTP-style status code.
    #[serde(default = "default_veto_status")]
    pub status: u16,
}

fn default_veto_status() -> u16 {
    DEFAULT_VETO_STATUS
}

impl Veto {
    /// Create a veto with the default `422` status.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: DEFAULT_VETO_STATUS,
        }
    }

    /// Override the status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Always `false`; present for wire compatibility.
    #[must_use]
    pub fn ok(&self) -> bool {
        false
    }
}

impl Serialize for Veto {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Veto", 3)?;
        state.serialize_field("ok", &false)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("status", &self.status)?;
        state.end()
    }
}

impl std::fmt::Display for Veto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

/// What a subscriber returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Approve and continue.
    #[default]
    Continue,
    /// Reject the triggering mutation. Only honored for synchronous
    /// subscribers during a live dispatch.
    Veto(Veto),
}

impl HandlerOutcome {
    /// Whether this outcome is a veto.
    #[must_use]
    pub fn is_veto(&self) -> bool {
        matches!(self, Self::Veto(_))
    }
}

impl From<Veto> for HandlerOutcome {
    fn from(veto: Veto) -> Self {
        Self::Veto(veto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_event_name() {
        assert!(validate_event_name("example.todo.created").is_ok());
        assert!(validate_event_name("single").is_ok());
        assert!(validate_event_name("").is_err());
        assert!(validate_event_name("a..b").is_err());
        assert!(validate_event_name(".a").is_err());
        assert!(validate_event_name("a.").is_err());
        assert!(validate_event_name("a b").is_err());
    }

    #[test]
    fn test_veto_wire_format() {
        let veto = Veto::new("Completed todos cannot be reopened");
        let value = serde_json::to_value(&veto).unwrap();
        assert_eq!(
            value,
            json!({
                "ok": false,
                "message": "Completed todos cannot be reopened",
                "status": 422
            })
        );

        let parsed: Veto = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, veto);
    }

    #[test]
    fn test_veto_status_defaults_when_missing() {
        let parsed: Veto = serde_json::from_value(json!({"message": "no"})).unwrap();
        assert_eq!(parsed.status, DEFAULT_VETO_STATUS);
        assert_eq!(Veto::new("x").with_status(409).status, 409);
    }

    #[test]
    fn test_event_from_parts() {
        let event = Event::from_parts(
            "example.todo.updated",
            json!({"isDone": false}),
            EmitOptions::persistent()
                .with_previous(json!({"isDone": true}))
                .with_context(EventContext::new().with_actor("u1").with_tenant("t1")),
        );
        assert!(event.persistent);
        assert_eq!(event.previous, Some(json!({"isDone": true})));
        assert_eq!(event.context.tenant.as_deref(), Some("t1"));
    }

    #[test]
    fn test_envelope_live_and_replay() {
        let live = EventEnvelope::live(
            Event::new("example.todo.updated")
                .with_payload(json!({"isDone": false}))
                .with_previous(json!({"isDone": true})),
            None,
        );
        assert_eq!(live.phase, DispatchPhase::Live);
        assert_eq!(live.previous_field("isDone"), Some(&json!(true)));
        assert!(!live.is_replay());

        let record = QueuedEvent::new(4, "example.todo.created", json!({"id": "t1"}));
        let replay = EventEnvelope::replay(&record);
        assert!(replay.is_replay());
        assert_eq!(replay.queued_id, Some(4));
        assert_eq!(replay.emitted_at, record.created_at);
        assert!(replay.previous.is_none());
    }

    #[test]
    fn test_payload_as() {
        #[derive(Deserialize)]
        struct Todo {
            id: String,
        }

        let envelope =
            EventEnvelope::live(Event::new("x.y").with_payload(json!({"id": "t1"})), None);
        let todo: Todo = envelope.payload_as().unwrap();
        assert_eq!(todo.id, "t1");
    }

    #[test]
    fn test_handler_outcome_from_veto() {
        let outcome: HandlerOutcome = Veto::new("no").into();
        assert!(outcome.is_veto());
        assert!(!HandlerOutcome::default().is_veto());
    }
}
