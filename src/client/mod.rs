//! Client Data Layer
//!
//! Everything an application needs to read and mutate meal-planner data
//! with optimistic feedback, whichever store currently backs it.
//!
//! # Architecture
//!
//! The client module is organized into focused submodules:
//!
//! - **`config`** - Environment-aware configuration (remote URL, API key, DB path)
//! - **`auth`** - Session state and authentication API calls
//! - **`normalize`** - Canonical entity shapes and validation
//! - **`backend`** - Backend contract, remote store and selector
//! - **`local_db`** - Embedded SQLite store
//! - **`offline`** - Optimistic updates, request lifecycle and the data client
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs        - Module exports and documentation
//! ├── config.rs     - Configuration with environment overrides
//! ├── auth.rs       - Auth session and API functions
//! ├── normalize.rs  - Entity normalizer
//! ├── backend/      - Backend trait, memory/remote stores, selector
//! ├── local_db/     - SQLite store, schema and migrations
//! └── offline/      - Optimistic manager, lifecycle, retry, data client
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod local_db;
pub mod normalize;
pub mod offline;

// Re-export commonly used types
pub use auth::{get_me, login, AuthSession, AuthState, UserIdentity};
pub use backend::{Backend, BackendKind, BackendSelector, MemoryBackend, RemoteBackend, ResolvedBackend};
pub use config::Config;
pub use local_db::LocalDatabase;
pub use normalize::{normalize, normalize_lenient, normalize_patch, validate, ValidationReport};
pub use offline::{DataClient, Dispatch, DispatchHandle, DispatchOutcome, Mutation, OptimisticManager};
