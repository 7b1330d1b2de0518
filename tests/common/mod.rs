//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - Backend and client fixtures
//! - Mock remote store helpers
//! - Custom assertion macros

pub mod assertions;
pub mod fixtures;
pub mod mock_remote;

// Re-export commonly used utilities
pub use assertions::*;
pub use fixtures::*;
pub use mock_remote::*;
