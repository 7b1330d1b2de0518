//! # Optimistic Updates
//!
//! Immediate feedback for mutations with reconciliation once the real
//! backend call settles.
//!
//! ## Architecture
//!
//! - **Optimistic Manager**: tracks each pending update through
//!   `pending -> retrying -> success | failed | rolled_back`
//! - **Request Lifecycle**: cancellation, per-call timeout and duplicate
//!   detection for backend calls
//! - **Retry Policy**: exponential backoff between attempts
//! - **Data Client**: composes the pieces behind one mutation API
//!
//! ## Key Components
//!
//! - `optimistic.rs`: update state machine, rollback timers, events
//! - `lifecycle.rs`: cancellable, deduplicated calls
//! - `retry.rs`: backoff policy
//! - `history.rs`: bounded log of settled updates
//! - `dispatch.rs`: the data client
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mealsync::client::auth::AuthSession;
//! use mealsync::client::config::Config;
//! use mealsync::client::offline::{DataClient, Mutation};
//! use mealsync::shared::EntityFamily;
//! use serde_json::json;
//!
//! # async fn example() -> mealsync::shared::error::Result<()> {
//! let client = DataClient::open(&Config::new(), AuthSession::new()).await?;
//! let mut events = client.subscribe();
//!
//! let dispatch = client
//!     .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(json!({"name": "Soup"})))
//!     .await?;
//! // Render `dispatch.entity` now; `events` reports reconciliation later.
//! # let _ = events.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod history;
pub mod lifecycle;
pub mod optimistic;
pub mod retry;

// Re-export main types
pub use dispatch::{DataClient, Dispatch, DispatchHandle, DispatchOutcome, Mutation};
pub use history::UpdateHistory;
pub use lifecycle::{LifecycleConfig, PreparedCall, RequestLifecycle};
pub use optimistic::{
    Listener, ManagerConfig, ManagerStats, OptimisticManager, RetryOutcome, RollbackTimer,
    Subscription,
};
pub use retry::RetryPolicy;
