//! Rule definitions evaluated by a [`super::Protector`].

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Whether a rule may deny (`Live`) or only report (`DryRun`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[default]
    Live,
    DryRun,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "dry-run" | "dry_run" | "dryrun" => Ok(Self::DryRun),
            other => Err(format!("invalid mode: {other} (expected live or dry-run)")),
        }
    }
}

/// Email categories an [`EmailRule`] can block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailType {
    Disposable,
    Invalid,
    NoMxRecords,
    Free,
}

impl EmailType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disposable => "DISPOSABLE",
            Self::Invalid => "INVALID",
            Self::NoMxRecords => "NO_MX_RECORDS",
            Self::Free => "FREE",
        }
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().replace('-', "_").as_str() {
            "DISPOSABLE" => Ok(Self::Disposable),
            "INVALID" => Ok(Self::Invalid),
            "NO_MX_RECORDS" => Ok(Self::NoMxRecords),
            "FREE" => Ok(Self::Free),
            other => Err(format!("invalid email type: {other}")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldRule {
    pub mode: Mode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotRule {
    pub mode: Mode,
    /// Bot names (`CURL`) or categories (`CATEGORY:SEARCH_ENGINE`) that are let through.
    pub allow: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowRule {
    pub mode: Mode,
    pub max: u32,
    pub interval_seconds: u64,
}

impl SlidingWindowRule {
    #[must_use]
    pub fn new(mode: Mode, max: u32, interval: Duration) -> Self {
        Self {
            mode,
            max,
            interval_seconds: interval.as_secs(),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRule {
    pub mode: Mode,
    pub block: Vec<EmailType>,
}

impl EmailRule {
    #[must_use]
    pub fn blocks(&self, kind: EmailType) -> bool {
        self.block.contains(&kind)
    }
}

/// Everything one evaluation runs.
///
/// `bucket` scopes rate-limit counters so the strict and relaxed windows never
/// share state for the same identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub bucket: String,
    pub shield: ShieldRule,
    pub bot: BotRule,
    pub rate_limit: SlidingWindowRule,
    pub email: Option<EmailRule>,
}
