//! Backend and client fixtures
//!
//! Builders for data clients over in-memory stores, signed-in sessions and
//! representative payloads for each entity family.

use mealsync::client::auth::{AuthSession, UserIdentity};
use mealsync::client::backend::{Backend, BackendKind, BackendSelector, MemoryBackend};
use mealsync::client::offline::{
    DataClient, LifecycleConfig, ManagerConfig, OptimisticManager, RetryPolicy,
};
use mealsync::shared::{DedupPolicy, EntityFamily, Record};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_USER_ID: &str = "user-123";
pub const TEST_TOKEN: &str = "test-access-token";

/// Session holding a test identity
pub fn signed_in_session() -> AuthSession {
    AuthSession::signed_in(UserIdentity {
        user_id: TEST_USER_ID.to_string(),
        email: Some("cook@example.com".to_string()),
        access_token: TEST_TOKEN.to_string(),
    })
}

/// Manager settings that settle quickly and retry twice
pub fn fast_manager_config() -> ManagerConfig {
    ManagerConfig {
        rollback_timeout: Duration::from_secs(30),
        success_grace: Duration::ZERO,
        history_limit: 50,
        retry: RetryPolicy::new(2, Duration::from_millis(100), Duration::from_millis(400)),
    }
}

/// Lifecycle settings with the given dedup policy
pub fn lifecycle_config(dedup: DedupPolicy) -> LifecycleConfig {
    LifecycleConfig {
        timeout: Duration::from_secs(15),
        dedup,
    }
}

/// A client over one in-memory local store
pub fn memory_client(manager: ManagerConfig, dedup: DedupPolicy) -> (DataClient, Arc<MemoryBackend>) {
    let local = Arc::new(MemoryBackend::new());
    let client = DataClient::new(
        BackendSelector::local_only(local.clone()),
        OptimisticManager::new(manager),
        lifecycle_config(dedup),
    );
    (client, local)
}

/// A client over in-memory local and remote stores sharing `session`
pub fn dual_client(session: AuthSession) -> (DataClient, Arc<MemoryBackend>, Arc<MemoryBackend>) {
    let local = Arc::new(MemoryBackend::new());
    let remote = Arc::new(MemoryBackend::with_kind(BackendKind::Remote));
    let client = DataClient::new(
        BackendSelector::new(local.clone(), Some(remote.clone()), session),
        OptimisticManager::new(fast_manager_config()),
        lifecycle_config(DedupPolicy::Join),
    );
    (client, local, remote)
}

pub fn recipe(name: &str) -> Value {
    json!({
        "name": name,
        "tags": ["dinner"],
        "prepTime": 10,
        "favorite": false,
    })
}

pub fn shopping_item(name: &str) -> Value {
    json!({ "name": name, "quantity": "1", "category": "dairy" })
}

/// Insert a raw record straight into a backend
pub async fn seed(backend: &dyn Backend, family: EntityFamily, value: Value) -> Record {
    let Value::Object(record) = value else {
        panic!("seed value must be an object");
    };
    backend.add(family, record).await.expect("seed insert failed")
}
