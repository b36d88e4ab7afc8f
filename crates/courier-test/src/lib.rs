//! Courier Test - shared test utilities for the courier crates.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! courier-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use courier_events::{EventBus, SubscriberDescriptor};
//! use courier_test::RecordingHandler;
//!
//! #[tokio::test]
//! async fn records_events() {
//!     let bus = EventBus::local();
//!     let recorder = RecordingHandler::new();
//!     bus.register(SubscriberDescriptor::new("rec", "a.b", recorder.handler()))
//!         .unwrap();
//!
//!     bus.emit(courier_events::Event::new("a.b")).await.unwrap();
//!     assert_eq!(recorder.count(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod harness;
pub mod mocks;

pub use harness::{
    setup_test_logging, setup_test_logging_default, test_config_file, test_dir,
};
pub use mocks::{
    CallLog, FailingHandler, FlakyQueueStore, RecordingHandler, SlowHandler, VetoHandler,
};
