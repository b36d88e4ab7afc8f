//! Both async policies, explicit and strategy-defaulted.

mod common;

use std::time::Duration;

use courier_events::{
    AsyncPolicy, DeliveryStrategy, Event, EventBus, LocalStrategy, StrategyKind,
    SubscriberDescriptor,
};
use courier_test::{RecordingHandler, SlowHandler};

#[tokio::test]
async fn test_defaults_follow_strategy() {
    let local = EventBus::local();
    assert_eq!(local.strategy_kind(), StrategyKind::Local);
    assert_eq!(local.async_policy(), AsyncPolicy::Await);

    let remote = common::remote_bus(&common::shared_store(), "default");
    assert_eq!(remote.strategy_kind(), StrategyKind::Remote);
    assert_eq!(remote.async_policy(), AsyncPolicy::Detach);
}

#[tokio::test(start_paused = true)]
async fn test_await_policy_waits_for_async_subscribers() {
    let bus = EventBus::local();
    let slow = SlowHandler::new(Duration::from_secs(2));
    bus.on("report.generated", slow.handler()).unwrap();

    bus.emit(Event::new("report.generated")).await.unwrap();
    assert_eq!(slow.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detach_policy_returns_before_async_subscribers() {
    let store = common::shared_store();
    let bus = common::remote_bus(&store, "default");
    let slow = SlowHandler::new(Duration::from_secs(2));
    bus.on("report.generated", slow.handler()).unwrap();

    bus.emit(Event::new("report.generated")).await.unwrap();
    assert_eq!(slow.completed(), 0);

    bus.wait_idle().await;
    assert_eq!(slow.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_policy_override_on_local_bus() {
    let bus = EventBus::builder(DeliveryStrategy::Local(LocalStrategy::new()))
        .async_policy(AsyncPolicy::Detach)
        .build();
    let slow = SlowHandler::new(Duration::from_secs(2));
    bus.on("report.generated", slow.handler()).unwrap();

    bus.emit(Event::new("report.generated")).await.unwrap();
    assert_eq!(slow.completed(), 0);
    bus.wait_idle().await;
    assert_eq!(slow.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_subscribers_block_under_detach() {
    let bus = common::remote_bus(&common::shared_store(), "default");
    let slow = SlowHandler::new(Duration::from_secs(2));
    bus.register(
        SubscriberDescriptor::new("slow-guard", "a.b", slow.handler()).synchronous(),
    )
    .unwrap();

    bus.emit(Event::new("a.b")).await.unwrap();
    assert_eq!(slow.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout_isolates_stuck_async_subscriber() {
    let bus = EventBus::builder(DeliveryStrategy::Local(LocalStrategy::new()))
        .handler_timeout(Duration::from_secs(1))
        .build();
    let stuck = SlowHandler::new(Duration::from_secs(3600));
    let healthy = RecordingHandler::new();
    bus.on("a.b", stuck.handler()).unwrap();
    bus.on("a.b", healthy.handler()).unwrap();

    let receipt = bus.emit(Event::new("a.b")).await.unwrap();
    assert!(!receipt.is_vetoed());
    assert_eq!(stuck.completed(), 0);
    assert_eq!(healthy.count(), 1);
}

#[tokio::test]
async fn test_buses_do_not_share_registries() {
    let first = EventBus::local();
    let second = EventBus::local();
    let recorder = RecordingHandler::new();
    first.on("a.b", recorder.handler()).unwrap();

    second.emit(Event::new("a.b")).await.unwrap();
    assert_eq!(recorder.count(), 0);
    assert!(second.registry().is_empty());

    let clone = first.clone();
    clone.emit(Event::new("a.b")).await.unwrap();
    assert_eq!(recorder.count(), 1);
}
