//! Session lookup against the credential engine.

use async_trait::async_trait;
use axum::http::{
    HeaderMap,
    header::{AUTHORIZATION, COOKIE},
};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::APP_USER_AGENT;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session lookup failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("session endpoint returned {0}")]
    Status(u16),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SessionUser {
    pub id: String,
}

// `null` when there is no session.
#[derive(Deserialize)]
struct SessionEnvelope {
    user: Option<SessionUser>,
}

#[async_trait]
pub trait SessionLookup: Send + Sync {
    /// The signed-in user for the credentials carried by `headers`, if any.
    ///
    /// # Errors
    /// Returns an error when the session source cannot be queried.
    async fn lookup(&self, headers: &HeaderMap) -> Result<Option<SessionUser>, SessionError>;
}

/// Queries the credential engine's session endpoint with the caller's cookies.
#[derive(Debug)]
pub struct RemoteSessionLookup {
    client: Client,
    url: Url,
}

impl RemoteSessionLookup {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SessionLookup for RemoteSessionLookup {
    #[instrument(skip_all)]
    async fn lookup(&self, headers: &HeaderMap) -> Result<Option<SessionUser>, SessionError> {
        let cookie = headers.get(COOKIE);
        let authorization = headers.get(AUTHORIZATION);
        if cookie.is_none() && authorization.is_none() {
            return Ok(None);
        }

        let mut request = self.client.get(self.url.clone());
        if let Some(value) = cookie {
            request = request.header(COOKIE, value.clone());
        }
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value.clone());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SessionError::Status(response.status().as_u16()));
        }

        let envelope: Option<SessionEnvelope> = response.json().await?;
        let user = envelope
            .and_then(|envelope| envelope.user)
            .filter(|user| !user.id.trim().is_empty());
        debug!("session lookup resolved user: {}", user.is_some());
        Ok(user)
    }
}
