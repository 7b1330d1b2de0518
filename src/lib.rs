//! MealSync - Optimistic Data Layer
//!
//! MealSync keeps a meal-planning application's recipes, weekly plans, meal
//! history and shopping list consistent across an embedded SQLite store and
//! a per-user remote REST store, while giving the interface immediate
//! feedback for every mutation.
//!
//! # Module Structure
//!
//! - **`shared`** - Platform-agnostic types
//!   - Entity containers and identifiers
//!   - Pending update records and lifecycle events
//!   - Error taxonomy and configuration
//!
//! - **`client`** - The data layer itself
//!   - Entity normalizer
//!   - Local and remote backends behind one contract
//!   - Backend selection from configuration and auth state
//!   - Optimistic update manager and request lifecycle
//!
//! # Usage
//!
//! ```rust,no_run
//! use mealsync::client::{AuthSession, Config, DataClient, Mutation};
//! use mealsync::shared::{EntityFamily, EntityId};
//! use serde_json::json;
//!
//! # async fn example() -> mealsync::shared::error::Result<()> {
//! mealsync::shared::logging::init_tracing(mealsync::shared::logging::DEFAULT_FILTER);
//! let client = DataClient::open(&Config::new(), AuthSession::new()).await?;
//!
//! let recipes = client.get_all(EntityFamily::Recipes).await?;
//! let dispatch = client
//!     .dispatch_optimistic(
//!         EntityFamily::Recipes,
//!         Mutation::Update { id: EntityId::from_local(7), changes: json!({"favorite": true}) },
//!     )
//!     .await?;
//! let outcome = dispatch.handle.settled().await;
//! # let _ = (recipes, outcome);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! - Pending updates live behind a `tokio::sync::RwLock`; events fan out over
//!   `broadcast::Sender`
//! - Listeners run after locks are released, so a listener may call back
//!   into the manager
//!
//! # Error Handling
//!
//! Fallible operations return [`shared::error::Result`]. Validation,
//! authentication and duplicate-request errors surface synchronously; failures
//! after an optimistic value is shown surface as lifecycle events.

pub mod client;
pub mod shared;
