//! Policy bundles built once at start and shared read-only.

use std::time::Duration;

use super::RouteClass;
use crate::protect::{BotRule, EmailRule, EmailType, Mode, RuleSet, ShieldRule, SlidingWindowRule};

pub const STRICT: &str = "strict";
pub const RELAXED: &str = "relaxed";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    pub mode: Mode,
    pub strict_max: u32,
    pub strict_interval: Duration,
    pub relaxed_max: u32,
    pub relaxed_interval: Duration,
    pub bot_allow: Vec<String>,
    pub email_block: Vec<EmailType>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Live,
            strict_max: 10,
            strict_interval: Duration::from_secs(10 * 60),
            relaxed_max: 60,
            relaxed_interval: Duration::from_secs(60),
            bot_allow: Vec::new(),
            email_block: vec![
                EmailType::Disposable,
                EmailType::Invalid,
                EmailType::NoMxRecords,
            ],
        }
    }
}

/// A named bot + rate-limit bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub bot: BotRule,
    pub rate_limit: SlidingWindowRule,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policies {
    pub strict: Policy,
    pub relaxed: Policy,
    pub email: EmailRule,
    pub shield: ShieldRule,
}

impl Policies {
    #[must_use]
    pub fn from_config(config: &PolicyConfig) -> Self {
        let bot = BotRule {
            mode: config.mode,
            allow: config.bot_allow.clone(),
        };
        Self {
            strict: Policy {
                name: STRICT.to_string(),
                bot: bot.clone(),
                rate_limit: SlidingWindowRule::new(
                    config.mode,
                    config.strict_max,
                    config.strict_interval,
                ),
            },
            relaxed: Policy {
                name: RELAXED.to_string(),
                bot,
                rate_limit: SlidingWindowRule::new(
                    config.mode,
                    config.relaxed_max,
                    config.relaxed_interval,
                ),
            },
            email: EmailRule {
                mode: config.mode,
                block: config.email_block.clone(),
            },
            shield: ShieldRule { mode: config.mode },
        }
    }

    #[must_use]
    pub const fn for_route(&self, route: RouteClass) -> &Policy {
        match route {
            RouteClass::SignUp => &self.strict,
            RouteClass::Other => &self.relaxed,
        }
    }

    /// Rules for one request. The email rule only joins sign-up evaluations
    /// that carry an email.
    #[must_use]
    pub fn rule_set(&self, route: RouteClass, email_present: bool) -> RuleSet {
        let policy = self.for_route(route);
        RuleSet {
            bucket: policy.name.clone(),
            shield: self.shield.clone(),
            bot: policy.bot.clone(),
            rate_limit: policy.rate_limit.clone(),
            email: (route == RouteClass::SignUp && email_present).then(|| self.email.clone()),
        }
    }
}

/// Parse `30s`, `10m`, `2h`, `1d` or bare seconds.
///
/// # Errors
/// Returns an error for empty, zero, or malformed values.
pub fn parse_interval(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((index, _)) => value.split_at(index),
        None => (value, "s"),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval: {value}"))?;
    let seconds = match unit {
        "s" => Some(amount),
        "m" => amount.checked_mul(60),
        "h" => amount.checked_mul(60 * 60),
        "d" => amount.checked_mul(24 * 60 * 60),
        _ => None,
    }
    .ok_or_else(|| format!("invalid interval: {value} (use s, m, h or d)"))?;
    if seconds == 0 {
        return Err(format!("interval must be positive: {value}"));
    }
    Ok(Duration::from_secs(seconds))
}

/// Parse a comma separated list of email types, e.g. `DISPOSABLE,INVALID`.
///
/// # Errors
/// Returns an error naming the first unknown type.
pub fn parse_email_block(value: &str) -> Result<Vec<EmailType>, String> {
    let mut block = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let kind: EmailType = item.parse()?;
        if !block.contains(&kind) {
            block.push(kind);
        }
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_windows() {
        let policies = Policies::from_config(&PolicyConfig::default());
        assert_eq!(policies.strict.rate_limit.max, 10);
        assert_eq!(policies.strict.rate_limit.interval(), Duration::from_secs(600));
        assert_eq!(policies.relaxed.rate_limit.max, 60);
        assert_eq!(policies.relaxed.rate_limit.interval(), Duration::from_secs(60));
        assert!(policies.strict.bot.allow.is_empty());
        assert!(policies.email.blocks(EmailType::NoMxRecords));
        assert!(!policies.email.blocks(EmailType::Free));
    }

    #[test]
    fn sign_up_with_email_gets_the_email_rule() {
        let policies = Policies::from_config(&PolicyConfig::default());
        let rules = policies.rule_set(RouteClass::SignUp, true);
        assert_eq!(rules.bucket, STRICT);
        assert!(rules.email.is_some());
    }

    #[test]
    fn sign_up_without_email_keeps_bot_and_rate_limit() {
        let policies = Policies::from_config(&PolicyConfig::default());
        let rules = policies.rule_set(RouteClass::SignUp, false);
        assert_eq!(rules.bucket, STRICT);
        assert_eq!(rules.rate_limit.max, 10);
        assert!(rules.email.is_none());
    }

    #[test]
    fn other_routes_never_validate_email() {
        let policies = Policies::from_config(&PolicyConfig::default());
        let rules = policies.rule_set(RouteClass::Other, true);
        assert_eq!(rules.bucket, RELAXED);
        assert_eq!(rules.rate_limit.max, 60);
        assert!(rules.email.is_none());
    }

    #[test]
    fn dry_run_mode_applies_to_every_rule() {
        let config = PolicyConfig {
            mode: Mode::DryRun,
            ..PolicyConfig::default()
        };
        let policies = Policies::from_config(&config);
        assert_eq!(policies.shield.mode, Mode::DryRun);
        assert_eq!(policies.email.mode, Mode::DryRun);
        assert_eq!(policies.relaxed.bot.mode, Mode::DryRun);
        assert_eq!(policies.strict.rate_limit.mode, Mode::DryRun);
    }

    #[test]
    fn intervals_parse() {
        assert_eq!(parse_interval("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_interval("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_interval("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_interval("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_interval("1d"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse_interval("45"), Ok(Duration::from_secs(45)));
        assert!(parse_interval("").is_err());
        assert!(parse_interval("0m").is_err());
        assert!(parse_interval("10w").is_err());
        assert!(parse_interval("m").is_err());
    }

    #[test]
    fn email_block_lists_parse() {
        assert_eq!(
            parse_email_block("DISPOSABLE, invalid,NO_MX_RECORDS,INVALID"),
            Ok(vec![
                EmailType::Disposable,
                EmailType::Invalid,
                EmailType::NoMxRecords
            ])
        );
        assert_eq!(parse_email_block(""), Ok(Vec::new()));
        assert!(parse_email_block("DISPOSABLE,SPAM").is_err());
    }
}
