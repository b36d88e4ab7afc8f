//! Synchronous veto protocol across the bus facade.

mod common;

use courier_events::{
    BusError, EmitOptions, Event, EventBus, HandlerError, HandlerResult, SubscriberDescriptor,
    Veto, handler_fn,
};
use courier_test::{CallLog, FailingHandler, RecordingHandler, VetoHandler};
use serde_json::json;

fn explode(msg: &str) -> HandlerResult {
    panic!("{msg}")
}

#[tokio::test]
async fn test_reopening_completed_todo_is_vetoed() {
    let bus = EventBus::local();
    let notifier = RecordingHandler::new();

    bus.register(common::prevent_uncomplete()).unwrap();
    bus.register(SubscriberDescriptor::new(
        "notify-watchers",
        "example.todo.updated",
        notifier.handler(),
    ))
    .unwrap();

    let receipt = bus
        .emit_event(
            "example.todo.updated",
            json!({"isDone": false}),
            EmitOptions::new().with_previous(json!({"isDone": true})),
        )
        .await
        .unwrap();

    let veto = receipt.outcome.veto().unwrap();
    assert_eq!(veto.status, 422);
    assert!(!veto.ok());
    assert_eq!(
        serde_json::to_value(veto).unwrap(),
        json!({"ok": false, "message": "Completed todos cannot be reopened", "status": 422})
    );

    bus.wait_idle().await;
    assert_eq!(notifier.count(), 0);
}

#[tokio::test]
async fn test_allowed_update_reaches_async_subscribers() {
    let bus = EventBus::local();
    let notifier = RecordingHandler::new();

    bus.register(common::prevent_uncomplete()).unwrap();
    bus.on("example.todo.updated", notifier.handler()).unwrap();

    let receipt = bus
        .emit_event(
            "example.todo.updated",
            json!({"isDone": true}),
            EmitOptions::new().with_previous(json!({"isDone": false})),
        )
        .await
        .unwrap();

    assert!(!receipt.is_vetoed());
    assert_eq!(notifier.count(), 1);
    assert_eq!(notifier.envelopes()[0].previous, Some(json!({"isDone": false})));
}

#[tokio::test]
async fn test_first_veto_stops_lower_priorities() {
    let bus = EventBus::local();
    let log = CallLog::default();

    let first = VetoHandler::new(Veto::new("nope").with_status(409)).with_call_log(&log, "p10");
    let second = RecordingHandler::new().with_call_log(&log, "p20");
    let third = RecordingHandler::new().with_call_log(&log, "p30");

    // Registered out of order; priority decides.
    bus.register(
        SubscriberDescriptor::new("p30", "order.placing", third.handler())
            .synchronous()
            .with_priority(30),
    )
    .unwrap();
    bus.register(
        SubscriberDescriptor::new("p10", "order.placing", first.handler())
            .synchronous()
            .with_priority(10),
    )
    .unwrap();
    bus.register(
        SubscriberDescriptor::new("p20", "order.placing", second.handler())
            .synchronous()
            .with_priority(20),
    )
    .unwrap();

    let receipt = bus.emit(Event::new("order.placing")).await.unwrap();

    assert_eq!(receipt.outcome.veto().map(|v| v.status), Some(409));
    assert_eq!(*log.lock().unwrap(), vec!["p10"]);
    assert_eq!(second.count(), 0);
    assert_eq!(third.count(), 0);
}

#[tokio::test]
async fn test_sync_subscribers_run_in_priority_order() {
    let bus = EventBus::local();
    let log = CallLog::default();

    for (id, priority) in [("late", 90), ("early", 5), ("middle", 50)] {
        let handler = RecordingHandler::new().with_call_log(&log, id);
        bus.register(
            SubscriberDescriptor::new(id, "order.placing", handler.handler())
                .synchronous()
                .with_priority(priority),
        )
        .unwrap();
    }

    bus.emit(Event::new("order.placing")).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["early", "middle", "late"]);
}

#[tokio::test]
async fn test_reregistration_is_idempotent() {
    let bus = EventBus::local();
    let recorder = RecordingHandler::new();

    for _ in 0..2 {
        bus.register(SubscriberDescriptor::new("audit", "foo", recorder.handler()))
            .unwrap();
    }

    bus.emit(Event::new("foo")).await.unwrap();
    bus.emit(Event::new("foo")).await.unwrap();

    assert_eq!(bus.registry().lookup("foo").len(), 1);
    assert_eq!(recorder.count(), 2);
}

#[tokio::test]
async fn test_sync_failure_aborts_dispatch() {
    let bus = EventBus::local();
    let notifier = RecordingHandler::new();

    bus.register(
        SubscriberDescriptor::new(
            "inventory",
            "order.placing",
            FailingHandler::new("db down").handler(),
        )
        .synchronous(),
    )
    .unwrap();
    bus.on("order.placing", notifier.handler()).unwrap();

    let err = bus.emit(Event::new("order.placing")).await.unwrap_err();
    match err {
        BusError::Handler {
            subscriber, source, ..
        } => {
            assert_eq!(subscriber, "inventory");
            assert!(matches!(source, HandlerError::Failed(ref m) if m == "db down"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(notifier.count(), 0);
}

#[tokio::test]
async fn test_async_failures_are_isolated() {
    let bus = EventBus::local();
    let survivor = RecordingHandler::new();

    bus.on("user.signed_up", FailingHandler::new("smtp down").handler())
        .unwrap();
    bus.on(
        "user.signed_up",
        handler_fn(|_env| async move { explode("indexer crashed") }),
    )
    .unwrap();
    bus.on("user.signed_up", survivor.handler()).unwrap();

    let receipt = bus.emit(Event::new("user.signed_up")).await.unwrap();

    assert!(!receipt.is_vetoed());
    assert_eq!(survivor.count(), 1);
}

#[tokio::test]
async fn test_malformed_registration_is_rejected() {
    let bus = EventBus::local();
    let recorder = RecordingHandler::new();

    let err = bus
        .register(SubscriberDescriptor::new("bad", "", recorder.handler()))
        .unwrap_err();
    assert!(matches!(err, BusError::Registration(_)));

    let err = bus
        .register_module_subscribers(vec![
            SubscriberDescriptor::new("good", "a.b", recorder.handler()),
            SubscriberDescriptor::new("", "a.b", recorder.handler()),
        ])
        .unwrap_err();
    assert!(matches!(err, BusError::Registration(_)));
    assert!(bus.registry().is_empty());
}

#[tokio::test]
async fn test_unregister_module_removes_its_subscribers() {
    let bus = EventBus::local();
    let recorder = RecordingHandler::new();

    bus.register_module_subscribers(vec![
        SubscriberDescriptor::new("a", "billing.paid", recorder.handler()).from_module("billing"),
        SubscriberDescriptor::new("b", "billing.refunded", recorder.handler())
            .from_module("billing"),
        SubscriberDescriptor::new("c", "billing.paid", recorder.handler()).from_module("crm"),
    ])
    .unwrap();

    assert_eq!(bus.unregister_module("billing"), 2);

    bus.emit(Event::new("billing.paid")).await.unwrap();
    bus.emit(Event::new("billing.refunded")).await.unwrap();
    assert_eq!(recorder.count(), 1);
}
