//! Decision model returned by every protector.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::rules::{EmailType, Mode};

static OTHER_REASON: Reason = Reason::Other;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conclusion {
    Allow,
    Deny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Shield,
    Bot,
    RateLimit,
    Email,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    RateLimit {
        max: u32,
        remaining: u32,
        reset_seconds: u64,
    },
    Email {
        email_types: Vec<EmailType>,
    },
    Bot {
        denied: Vec<String>,
    },
    Shield {
        shield_triggered: bool,
    },
    Other,
}

impl Reason {
    #[must_use]
    pub const fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit { .. })
    }

    #[must_use]
    pub const fn is_email(&self) -> bool {
        matches!(self, Self::Email { .. })
    }

    #[must_use]
    pub const fn is_bot(&self) -> bool {
        matches!(self, Self::Bot { .. })
    }

    #[must_use]
    pub fn email_types(&self) -> &[EmailType] {
        match self {
            Self::Email { email_types } => email_types,
            _ => &[],
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "rate_limit",
            Self::Email { .. } => "email",
            Self::Bot { .. } => "bot",
            Self::Shield { .. } => "shield",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: RuleKind,
    pub mode: Mode,
    pub conclusion: Conclusion,
    pub reason: Reason,
}

impl RuleResult {
    /// A result only counts against the request when its rule is live.
    #[must_use]
    pub fn is_enforced_denial(&self) -> bool {
        self.conclusion == Conclusion::Deny && self.mode == Mode::Live
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub conclusion: Conclusion,
    pub results: Vec<RuleResult>,
}

impl Decision {
    /// Fold per-rule results into a decision. Dry-run denials are kept in
    /// `results` but never flip the conclusion.
    #[must_use]
    pub fn from_results(results: Vec<RuleResult>) -> Self {
        let conclusion = if results.iter().any(RuleResult::is_enforced_denial) {
            Conclusion::Deny
        } else {
            Conclusion::Allow
        };
        Self {
            id: format!("dec_{}", Ulid::new()),
            conclusion,
            results,
        }
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.conclusion == Conclusion::Deny
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.conclusion == Conclusion::Allow
    }

    /// The reason reported to the client: rate limit first, then email, then
    /// bot, then whatever else denied (shield or unknown).
    #[must_use]
    pub fn reason(&self) -> Option<&Reason> {
        if !self.is_denied() {
            return None;
        }
        let denials = || {
            self.results
                .iter()
                .filter(|result| result.is_enforced_denial())
                .map(|result| &result.reason)
        };
        denials()
            .find(|reason| reason.is_rate_limit())
            .or_else(|| denials().find(|reason| reason.is_email()))
            .or_else(|| denials().find(|reason| reason.is_bot()))
            .or_else(|| denials().next())
            .or(Some(&OTHER_REASON))
    }
}
