/**
 * Authentication Module
 *
 * Holds the signed-in identity consulted by the backend selector on every
 * call, plus HTTP helpers for signing in against the remote store.
 */

use crate::client::config::Config;
use crate::shared::config::ConfigError;
use crate::shared::error::DataError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Identity attached to every remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
}

/// Authentication state
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub authenticated: bool,
    pub user: Option<UserIdentity>,
    pub error: Option<String>,
    pub loading: bool,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn set_error(&mut self, error: String) {
        self.error = Some(error);
    }
}

/// Shared, cheaply clonable handle to the current [`AuthState`]
///
/// Reads are synchronous so backend selection never awaits.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    state: Arc<RwLock<AuthState>>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session that starts signed in
    pub fn signed_in(user: UserIdentity) -> Self {
        let session = Self::new();
        session.sign_in(user);
        session
    }

    pub fn sign_in(&self, user: UserIdentity) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!("[Auth] Signed in as {}", user.user_id);
        state.authenticated = true;
        state.user = Some(user);
        state.error = None;
        state.loading = false;
    }

    pub fn sign_out(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.authenticated {
            tracing::info!("[Auth] Signed out");
        }
        *state = AuthState::default();
    }

    pub fn set_error(&self, error: String) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.loading = false;
        state.set_error(error);
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.authenticated && state.user.is_some()
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.authenticated {
            state.user.clone()
        } else {
            None
        }
    }

    /// Snapshot of the whole state
    pub fn state(&self) -> AuthState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: serde_json::Value,
    email: Option<String>,
}

impl UserResponse {
    fn user_id(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn auth_url(config: &Config, path: &str) -> Result<String, DataError> {
    config
        .api_url(path)
        .ok_or(DataError::Config(ConfigError::MissingValue("remote_url")))
}

fn with_api_key(request: reqwest::RequestBuilder, config: &Config) -> reqwest::RequestBuilder {
    match config.api_key() {
        Some(key) => request.header("apikey", key),
        None => request,
    }
}

async fn status_error(response: reqwest::Response, action: &str) -> DataError {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return DataError::NotAuthenticated;
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| status.to_string());
    DataError::backend(status.as_u16(), format!("{} failed: {}", action, error_text))
}

/// Sign in with email and password, returning the identity to store in an
/// [`AuthSession`]
pub async fn login(config: &Config, email: &str, password: &str) -> Result<UserIdentity, DataError> {
    let url = auth_url(config, "/api/auth/login")?;
    let request = with_api_key(Client::new().post(&url), config).json(&LoginRequest { email, password });

    let response = request
        .send()
        .await
        .map_err(|e| DataError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(status_error(response, "Login").await);
    }

    let auth: AuthResponse = response.json().await?;
    Ok(UserIdentity {
        user_id: auth.user.user_id(),
        email: auth.user.email,
        access_token: auth.access_token,
    })
}

/// Fetch the identity behind an access token
pub async fn get_me(config: &Config, token: &str) -> Result<UserIdentity, DataError> {
    let url = auth_url(config, "/api/auth/me")?;
    let response = with_api_key(Client::new().get(&url), config)
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .map_err(|e| DataError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(status_error(response, "Get user").await);
    }

    let user: UserResponse = response.json().await?;
    Ok(UserIdentity {
        user_id: user.user_id(),
        email: user.email,
        access_token: token.to_string(),
    })
}
