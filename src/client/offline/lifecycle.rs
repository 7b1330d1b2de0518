//! # Request Lifecycle Controller
//!
//! Wraps a backend call with a cancellation token, a hard timeout and
//! optional deduplication by operation key.
//!
//! Cancellation is cooperative: the token is checked before a result is
//! handed back, so a cancelled caller never observes a late result. When
//! the last caller waiting on a call goes away the underlying future is
//! dropped, which aborts the transport request where the transport allows.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mealsync::client::offline::{LifecycleConfig, RequestLifecycle};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let lifecycle: RequestLifecycle<u32> = RequestLifecycle::new(LifecycleConfig::default());
//! let token = CancellationToken::new();
//! let value = lifecycle.run("recipes:count", &token, async { Ok(3) }).await;
//! # }
//! ```

use crate::shared::config::{AppConfig, DedupPolicy, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::shared::error::{DataError, Result};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type SharedCall<T> = Shared<BoxFuture<'static, Result<T>>>;
type InFlight<T> = Arc<Mutex<HashMap<String, (u64, SharedCall<T>)>>>;

/// Timeout and deduplication settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Hard budget for a single call
    pub timeout: Duration,
    pub dedup: DedupPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            dedup: DedupPolicy::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            dedup: config.dedup,
        }
    }
}

/// Cancellation, timeout and deduplication for calls producing `T`
pub struct RequestLifecycle<T: Clone> {
    config: LifecycleConfig,
    in_flight: InFlight<T>,
    next_call: AtomicU64,
}

impl<T: Clone> std::fmt::Debug for RequestLifecycle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLifecycle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock<T>(in_flight: &Mutex<T>) -> MutexGuard<'_, T> {
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T> RequestLifecycle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_call: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Whether a call registered under `key` is still running
    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Fail fast when `key` would be rejected as a duplicate
    pub fn check_duplicate(&self, key: &str) -> Result<()> {
        if self.config.dedup == DedupPolicy::Reject && self.is_in_flight(key) {
            return Err(DataError::DuplicateRequest(key.to_string()));
        }
        Ok(())
    }

    /// Register a call without awaiting it
    ///
    /// Deduplication is decided here, synchronously: under `Join` a call
    /// already in flight for `key` is shared, under `Reject` it is an error.
    pub fn start<F>(&self, key: &str, future: F) -> Result<PreparedCall<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let timeout = self.config.timeout;
        if self.config.dedup == DedupPolicy::Off {
            return Ok(PreparedCall {
                key: key.to_string(),
                call: future.boxed().shared(),
                timeout,
                guard: None,
            });
        }

        let mut in_flight = lock(&self.in_flight);
        if let Some((_, existing)) = in_flight.get(key) {
            if self.config.dedup == DedupPolicy::Reject {
                tracing::debug!("[Lifecycle] Rejecting duplicate call {}", key);
                return Err(DataError::DuplicateRequest(key.to_string()));
            }
            tracing::debug!("[Lifecycle] Joining in-flight call {}", key);
            return Ok(PreparedCall {
                key: key.to_string(),
                call: existing.clone(),
                timeout,
                guard: None,
            });
        }

        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let call = future.boxed().shared();
        in_flight.insert(key.to_string(), (call_id, call.clone()));
        Ok(PreparedCall {
            key: key.to_string(),
            call,
            timeout,
            guard: Some(InFlightGuard {
                in_flight: Arc::clone(&self.in_flight),
                key: key.to_string(),
                call_id,
            }),
        })
    }

    /// Run a call to completion under `token`
    pub async fn run<F>(&self, key: &str, token: &CancellationToken, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if token.is_cancelled() {
            return Err(DataError::Cancelled);
        }
        self.start(key, future)?.wait(token).await
    }
}

/// A registered call waiting to be awaited
pub struct PreparedCall<T: Clone> {
    key: String,
    call: SharedCall<T>,
    timeout: Duration,
    guard: Option<InFlightGuard<T>>,
}

impl<T: Clone> std::fmt::Debug for PreparedCall<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall")
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .field("owner", &self.guard.is_some())
            .finish()
    }
}

impl<T> PreparedCall<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this caller started the call rather than joining it
    pub fn is_owner(&self) -> bool {
        self.guard.is_some()
    }

    /// Await the result, giving up on cancellation or timeout
    pub async fn wait(self, token: &CancellationToken) -> Result<T> {
        let PreparedCall {
            key,
            call,
            timeout,
            guard,
        } = self;

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("[Lifecycle] Call {} cancelled", key);
                Err(DataError::Cancelled)
            }
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("[Lifecycle] Call {} timed out after {:?}", key, timeout);
                    Err(DataError::Timeout(timeout))
                }
            },
        };

        drop(guard);
        // A result that raced with cancellation is discarded.
        if token.is_cancelled() {
            return Err(DataError::Cancelled);
        }
        outcome
    }
}

/// Removes the owner's registration when the owner finishes
struct InFlightGuard<T: Clone> {
    in_flight: InFlight<T>,
    key: String,
    call_id: u64,
}

impl<T: Clone> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(&self.key)
            .is_some_and(|(call_id, _)| *call_id == self.call_id)
        {
            in_flight.remove(&self.key);
        }
    }
}
