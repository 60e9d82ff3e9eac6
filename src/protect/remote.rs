//! Client for a hosted decision service.
//!
//! The service receives `{ "rules": RuleSet, "context": ProtectContext }` on
//! `POST {base}/v1/decide` and answers with a [`Decision`] document. Counters
//! live in the service, so every gateway instance shares them.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{Decision, ProtectContext, ProtectError, Protector, RuleSet};
use crate::APP_USER_AGENT;

#[derive(Serialize)]
struct DecideRequest<'a> {
    rules: &'a RuleSet,
    context: &'a ProtectContext,
}

#[derive(Debug)]
pub struct RemoteProtector {
    client: Client,
    decide_url: Url,
    key: Option<SecretString>,
}

impl RemoteProtector {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ProtectError> {
        let base = Url::parse(base_url)
            .map_err(|err| ProtectError::Config(format!("invalid protector URL: {err}")))?;
        let decide_url = base
            .join("v1/decide")
            .map_err(|err| ProtectError::Config(format!("invalid protector URL: {err}")))?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            decide_url,
            key,
        })
    }

    #[must_use]
    pub fn decide_url(&self) -> &Url {
        &self.decide_url
    }
}

#[async_trait]
impl Protector for RemoteProtector {
    #[instrument(skip_all, fields(bucket = %rules.bucket))]
    async fn protect(
        &self,
        rules: &RuleSet,
        context: &ProtectContext,
    ) -> Result<Decision, ProtectError> {
        let mut request = self
            .client
            .post(self.decide_url.clone())
            .json(&DecideRequest { rules, context });
        if let Some(key) = &self.key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProtectError::Status { status, message });
        }

        let decision: Decision = response.json().await?;
        debug!("remote decision {}: {:?}", decision.id, decision.conclusion);
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn decide_url_is_joined_to_base() -> Result<()> {
        let protector =
            RemoteProtector::new("https://decide.example.com/", None, Duration::from_secs(2))?;
        assert_eq!(
            protector.decide_url().as_str(),
            "https://decide.example.com/v1/decide"
        );
        Ok(())
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = RemoteProtector::new("not a url", None, Duration::from_secs(2));
        assert!(matches!(result, Err(ProtectError::Config(_))));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() -> Result<()> {
        // Port 9 (discard) on loopback is closed in test environments.
        let protector =
            RemoteProtector::new("http://127.0.0.1:9/", None, Duration::from_millis(500))?;
        let rules = RuleSet {
            bucket: "relaxed".to_string(),
            shield: crate::protect::ShieldRule::default(),
            bot: crate::protect::BotRule::default(),
            rate_limit: crate::protect::SlidingWindowRule::new(
                crate::protect::Mode::Live,
                60,
                Duration::from_secs(60),
            ),
            email: None,
        };
        let result = protector.protect(&rules, &ProtectContext::default()).await;
        assert!(matches!(result, Err(ProtectError::Transport(_))));
        Ok(())
    }
}
