//! Custom assertion macros and utilities
//!
//! Provides enhanced assertion macros for better test output and
//! more descriptive error messages.

use mealsync::shared::{EventType, UpdateEvent};
use tokio::sync::broadcast;

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error matching a pattern
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        assert!($result.is_err(), "Expected Err, got Ok");
    };
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Every event currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Types of every event currently buffered on a receiver
pub fn drain_event_types(rx: &mut broadcast::Receiver<UpdateEvent>) -> Vec<EventType> {
    drain_events(rx).iter().map(UpdateEvent::event_type).collect()
}

/// Assert the exact sequence of buffered event types
pub fn assert_events(rx: &mut broadcast::Receiver<UpdateEvent>, expected: &[EventType]) {
    let actual = drain_event_types(rx);
    assert_eq!(actual, expected, "unexpected event sequence");
}
