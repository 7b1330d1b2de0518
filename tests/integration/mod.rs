//! Integration tests
//!
//! End-to-end flows through the data client, the concrete stores and the
//! backend selector.

mod backend_selection_test;
mod local_backend_test;
mod optimistic_flow_test;
