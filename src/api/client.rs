//! HTTP client for the remote notification service.
//!
//! The service owns notification persistence; this client only fetches
//! snapshots and forwards read/delete mutations.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::lifecycle::Identity;
use crate::notifications::NotificationRecord;

/// Error type for notification service calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{method} {path} failed: {source}")]
    Request {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {path} returned status {status}")]
    Status {
        method: Method,
        path: String,
        status: u16,
    },

    #[error("Failed to parse response of {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

/// REST operations the notification core consumes.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// `GET /notifications?limit=N`
    async fn list_notifications(&self, limit: usize) -> Result<Vec<NotificationRecord>, ApiError>;

    /// `PATCH /notifications/{id}/read`
    async fn mark_read(&self, id: &str) -> Result<(), ApiError>;

    /// `PATCH /notifications/read-all`
    async fn mark_all_read(&self) -> Result<(), ApiError>;

    /// `DELETE /notifications/{id}`
    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    /// `DELETE /notifications/all`
    async fn delete_all(&self) -> Result<(), ApiError>;

    /// Called by the lifecycle binder whenever the authenticated identity
    /// changes, so the client can swap credentials.
    fn set_identity(&self, _identity: Option<&Identity>) {}
}

/// Snapshot responses are either a bare array or a page object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Plain(Vec<NotificationRecord>),
    Page { content: Vec<NotificationRecord> },
    Wrapped { notifications: Vec<NotificationRecord> },
}

impl From<ListResponse> for Vec<NotificationRecord> {
    fn from(response: ListResponse) -> Self {
        match response {
            ListResponse::Plain(records) => records,
            ListResponse::Page { content } => content,
            ListResponse::Wrapped { notifications } => notifications,
        }
    }
}

/// reqwest-backed [`NotificationApi`].
pub struct HttpNotificationApi {
    client: Client,
    base_url: String,
    bearer_token: RwLock<Option<String>>,
}

impl HttpNotificationApi {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "http://localhost:8080/api")
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;

        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            bearer_token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token(&self) -> Option<String> {
        match self.bearer_token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, method: Method, path: &str) -> Result<reqwest::Response, ApiError> {
        debug!("{} {}", method, path);
        let response = self
            .request(method.clone(), path)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                method: method.clone(),
                path: path.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ApiError::Status {
                method,
                path: path.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn list_notifications(&self, limit: usize) -> Result<Vec<NotificationRecord>, ApiError> {
        let path = format!("/notifications?limit={}", limit);
        let response = self.send(Method::GET, &path).await?;
        let body: ListResponse = response
            .json()
            .await
            .map_err(|source| ApiError::Decode { path, source })?;
        Ok(body.into())
    }

    async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/notifications/{}/read", urlencoding::encode(id));
        self.send(Method::PATCH, &path).await.map(|_| ())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.send(Method::PATCH, "/notifications/read-all")
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/notifications/{}", urlencoding::encode(id));
        self.send(Method::DELETE, &path).await.map(|_| ())
    }

    async fn delete_all(&self) -> Result<(), ApiError> {
        self.send(Method::DELETE, "/notifications/all")
            .await
            .map(|_| ())
    }

    fn set_identity(&self, identity: Option<&Identity>) {
        let token = identity.map(|identity| identity.token.clone());
        match self.bearer_token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}
