//! Mock remote store helpers
//!
//! Wraps a `wiremock` server that speaks the remote store's REST shape.

use super::fixtures::{signed_in_session, TEST_TOKEN, TEST_USER_ID};
use mealsync::client::auth::AuthSession;
use mealsync::client::backend::RemoteBackend;
use std::time::Duration;
use wiremock::matchers::{header, query_param};
use wiremock::{MockBuilder, MockServer};

pub const TEST_API_KEY: &str = "anon-key";

/// A mock server and a backend pointed at it
pub struct MockRemote {
    pub server: MockServer,
    pub session: AuthSession,
    pub backend: RemoteBackend,
}

impl MockRemote {
    pub async fn start() -> Self {
        Self::start_with_timeout(Duration::from_secs(5)).await
    }

    pub async fn start_with_timeout(timeout: Duration) -> Self {
        let server = MockServer::start().await;
        let session = signed_in_session();
        let backend = RemoteBackend::new(
            server.uri(),
            Some(TEST_API_KEY.to_string()),
            session.clone(),
            timeout,
        )
        .expect("failed to build remote backend");
        Self {
            server,
            session,
            backend,
        }
    }
}

/// Require the credentials and user scoping every call carries
pub fn authorized(builder: MockBuilder) -> MockBuilder {
    builder
        .and(header("Authorization", format!("Bearer {}", TEST_TOKEN).as_str()))
        .and(header("apikey", TEST_API_KEY))
}

/// Require the `user_id` query parameter
pub fn scoped(builder: MockBuilder) -> MockBuilder {
    authorized(builder).and(query_param("user_id", TEST_USER_ID))
}
