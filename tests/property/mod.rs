//! Property-based tests

mod backoff_proptest;
mod normalize_proptest;
mod status_proptest;
