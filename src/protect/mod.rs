//! Decision engines behind the admission pipeline.
//!
//! A [`Protector`] receives the rules selected for a request together with a
//! [`ProtectContext`] and returns a [`Decision`]. Counters and scores belong to
//! the protector; the pipeline itself holds no mutable state.

pub mod bot;
pub mod email;
pub mod local;
pub mod rate_limit;
pub mod remote;
pub mod shield;

mod decision;
mod rules;

pub use decision::{Conclusion, Decision, Reason, RuleKind, RuleResult};
pub use local::LocalProtector;
pub use remote::RemoteProtector;
pub use rules::{BotRule, EmailRule, EmailType, Mode, RuleSet, ShieldRule, SlidingWindowRule};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProtectError {
    #[error("decision service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decision service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("email domain lookup failed: {0}")]
    Dns(String),
    #[error("invalid protector configuration: {0}")]
    Config(String),
}

/// Request facts a protector may evaluate.
///
/// `key` is the identity token value rate limits and bot scores are tracked on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectContext {
    pub key: String,
    pub email: Option<String>,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait Protector: Send + Sync {
    /// Evaluate `rules` for one request.
    ///
    /// # Errors
    /// Returns an error when the engine cannot reach a decision.
    async fn protect(
        &self,
        rules: &RuleSet,
        context: &ProtectContext,
    ) -> Result<Decision, ProtectError>;
}
