//! Remote REST backend
//!
//! Per-user store reached over HTTP. Every call carries the signed-in user's
//! bearer token and is scoped with a `user_id` query parameter; written rows
//! get the same `user_id` injected and read rows have it stripped.
//!
//! ## Endpoints
//!
//! ```text
//! GET    {base}/api/{collection}?user_id=..            get_all
//! GET    {base}/api/{collection}?user_id=..&f=v        find_by
//! GET    {base}/api/{collection}/{id}?user_id=..       get_by_id
//! POST   {base}/api/{collection}                       add / bulk_add
//! PATCH  {base}/api/{collection}/{id}?user_id=..       update
//! DELETE {base}/api/{collection}/{id}?user_id=..       delete
//! DELETE {base}/api/{collection}?user_id=..            clear
//! ```

use super::{Backend, BackendKind};
use crate::client::auth::{AuthSession, UserIdentity};
use crate::shared::entity::{EntityFamily, EntityId, Record};
use crate::shared::error::{DataError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

/// Row-level scoping key injected into writes and stripped from reads
const USER_KEY: &str = "user_id";

/// REST implementation of the backend contract
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    session: AuthSession,
    timeout: Duration,
}

impl RemoteBackend {
    /// Create a backend for `base_url` using the identity held by `session`
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        session: AuthSession,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Network(format!("failed to build HTTP client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!("[Remote] Backend configured for {}", base_url);
        Ok(Self {
            client,
            base_url,
            api_key,
            session,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn identity(&self) -> Result<UserIdentity> {
        self.session.current_user().ok_or(DataError::NotAuthenticated)
    }

    fn collection_url(&self, family: EntityFamily) -> String {
        format!("{}/api/{}", self.base_url, family.collection())
    }

    /// Entity URL with the id pushed as one percent-encoded path segment
    fn entity_url(&self, family: EntityFamily, id: &EntityId) -> Result<Url> {
        let mut url = Url::parse(&self.collection_url(family))
            .map_err(|e| DataError::backend(0, format!("invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| DataError::backend(0, format!("base URL cannot hold a path: {}", self.base_url)))?
            .push(id.as_str());
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder, user: &UserIdentity) -> RequestBuilder {
        let request = request.header("Authorization", format!("Bearer {}", user.access_token));
        match &self.api_key {
            Some(key) => request.header("apikey", key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> DataError {
        if err.is_timeout() {
            tracing::warn!("[Remote] Request timed out after {:?}", self.timeout);
            DataError::Timeout(self.timeout)
        } else {
            tracing::warn!("[Remote] Transport error: {}", err);
            DataError::Network(err.to_string())
        }
    }

    /// Map a non-success status to a typed error
    async fn check(
        &self,
        response: Response,
        family: EntityFamily,
        id: Option<&EntityId>,
    ) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::warn!("[Remote] {} rejected credentials ({})", family, status);
                Err(DataError::NotAuthenticated)
            }
            StatusCode::NOT_FOUND => Err(DataError::NotFound {
                family,
                id: id.cloned().unwrap_or_else(|| EntityId::new("")),
            }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                let message = error_message(&body).unwrap_or_else(|| status.to_string());
                tracing::warn!("[Remote] {} request failed ({}): {}", family, status, message);
                Err(DataError::backend(status.as_u16(), message))
            }
        }
    }

    async fn read_json(&self, response: Response) -> Result<Value> {
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Extract a human-readable message from an error body
fn error_message(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => ["message", "error", "details"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| Some(body.to_string())),
        _ => Some(body.trim().to_string()),
    }
}

fn strip_user(mut record: Record) -> Record {
    record.remove(USER_KEY);
    record
}

fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(strip_user(map)),
        // Some deployments wrap single rows in an array.
        Value::Array(mut items) if items.len() == 1 => into_record(items.remove(0)),
        other => Err(DataError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

fn into_records(value: Value) -> Result<Vec<Record>> {
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(strip_user(map)),
                _ => None,
            })
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(DataError::Serialization(format!(
            "expected an array, got {}",
            other
        ))),
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn ensure_ready(&self) -> Result<()> {
        self.identity().map(|_| ())
    }

    async fn get_all(&self, family: EntityFamily) -> Result<Vec<Record>> {
        let user = self.identity()?;
        let request = self
            .client
            .get(self.collection_url(family))
            .query(&[(USER_KEY, user.user_id.as_str())]);
        let response = self.send(self.authorize(request, &user)).await?;
        let response = self.check(response, family, None).await?;
        into_records(self.read_json(response).await?)
    }

    async fn get_by_id(&self, family: EntityFamily, id: &EntityId) -> Result<Option<Record>> {
        let user = self.identity()?;
        let request = self
            .client
            .get(self.entity_url(family, id)?)
            .query(&[(USER_KEY, user.user_id.as_str())]);
        let response = self.send(self.authorize(request, &user)).await?;
        match self.check(response, family, Some(id)).await {
            Ok(response) => match self.read_json(response).await? {
                Value::Null => Ok(None),
                Value::Array(items) if items.is_empty() => Ok(None),
                value => into_record(value).map(Some),
            },
            Err(DataError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn find_by(&self, family: EntityFamily, field: &str, value: &Value) -> Result<Vec<Record>> {
        let user = self.identity()?;
        let value = query_value(value);
        let request = self
            .client
            .get(self.collection_url(family))
            .query(&[(USER_KEY, user.user_id.as_str()), (field, value.as_str())]);
        let response = self.send(self.authorize(request, &user)).await?;
        let response = self.check(response, family, None).await?;
        into_records(self.read_json(response).await?)
    }

    async fn add(&self, family: EntityFamily, mut record: Record) -> Result<Record> {
        let user = self.identity()?;
        record.remove("id");
        record.insert(USER_KEY.to_string(), Value::String(user.user_id.clone()));
        let request = self.client.post(self.collection_url(family)).json(&record);
        let response = self.send(self.authorize(request, &user)).await?;
        let response = self.check(response, family, None).await?;
        into_record(self.read_json(response).await?)
    }

    async fn update(&self, family: EntityFamily, id: &EntityId, mut changes: Record) -> Result<Record> {
        let user = self.identity()?;
        changes.remove("id");
        changes.remove(USER_KEY);
        let request = self
            .client
            .patch(self.entity_url(family, id)?)
            .query(&[(USER_KEY, user.user_id.as_str())])
            .json(&changes);
        let response = self.send(self.authorize(request, &user)).await?;
        let response = self.check(response, family, Some(id)).await?;
        into_record(self.read_json(response).await?)
    }

    async fn delete(&self, family: EntityFamily, id: &EntityId) -> Result<()> {
        let user = self.identity()?;
        let request = self
            .client
            .delete(self.entity_url(family, id)?)
            .query(&[(USER_KEY, user.user_id.as_str())]);
        let response = self.send(self.authorize(request, &user)).await?;
        self.check(response, family, Some(id)).await?;
        Ok(())
    }

    async fn bulk_add(&self, family: EntityFamily, records: Vec<Record>) -> Result<Vec<Record>> {
        let user = self.identity()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Record> = records
            .into_iter()
            .map(|mut record| {
                record.remove("id");
                record.insert(USER_KEY.to_string(), Value::String(user.user_id.clone()));
                record
            })
            .collect();
        tracing::debug!("[Remote] Bulk inserting {} {}", rows.len(), family);
        let request = self.client.post(self.collection_url(family)).json(&rows);
        let response = self.send(self.authorize(request, &user)).await?;
        let response = self.check(response, family, None).await?;
        into_records(self.read_json(response).await?)
    }

    async fn bulk_delete(&self, family: EntityFamily, ids: &[EntityId]) -> Result<usize> {
        let mut deleted = 0;
        for id in ids {
            match self.delete(family, id).await {
                Ok(()) => deleted += 1,
                Err(DataError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }

    async fn clear(&self, family: EntityFamily) -> Result<usize> {
        let user = self.identity()?;
        let request = self
            .client
            .delete(self.collection_url(family))
            .query(&[(USER_KEY, user.user_id.as_str())]);
        let response = self.send(self.authorize(request, &user)).await?;
        let response = self.check(response, family, None).await?;
        let removed = match self.read_json(response).await? {
            Value::Array(items) => items.len(),
            Value::Object(map) => map
                .get("deleted")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize,
            _ => 0,
        };
        tracing::info!("[Remote] Cleared {} {}", removed, family);
        Ok(removed)
    }
}
