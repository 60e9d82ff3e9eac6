use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, builder::BoolishValueParser};
use std::time::Duration;

use crate::{
    api::admission::{
        AdmissionSettings, DEFAULT_BODY_LIMIT, DEFAULT_SIGN_UP_ROUTE, FailMode,
        policy::{PolicyConfig, parse_email_block, parse_interval},
    },
    protect::{EmailType, Mode},
};

pub const ARG_MODE: &str = "mode";
pub const ARG_STRICT_MAX: &str = "strict-max";
pub const ARG_STRICT_INTERVAL: &str = "strict-interval";
pub const ARG_RELAXED_MAX: &str = "relaxed-max";
pub const ARG_RELAXED_INTERVAL: &str = "relaxed-interval";
pub const ARG_BOT_ALLOW: &str = "bot-allow";
pub const ARG_EMAIL_BLOCK: &str = "email-block";
pub const ARG_SIGN_UP_ROUTE: &str = "sign-up-route";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";
pub const ARG_BODY_LIMIT_BYTES: &str = "body-limit-bytes";

#[derive(Debug, Clone)]
pub struct Options {
    pub policy: PolicyConfig,
    pub sign_up_route: String,
    pub trust_proxy_headers: bool,
    pub body_limit: usize,
}

impl Options {
    /// Parse policy arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the sign-up route is empty.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let defaults = PolicyConfig::default();

        let sign_up_route = matches
            .get_one::<String>(ARG_SIGN_UP_ROUTE)
            .map_or(DEFAULT_SIGN_UP_ROUTE, String::as_str)
            .trim()
            .to_string();
        if sign_up_route.is_empty() {
            anyhow::bail!("--{ARG_SIGN_UP_ROUTE} must not be empty");
        }

        let policy = PolicyConfig {
            mode: matches.get_one::<Mode>(ARG_MODE).copied().unwrap_or_default(),
            strict_max: matches
                .get_one::<u32>(ARG_STRICT_MAX)
                .copied()
                .unwrap_or(defaults.strict_max),
            strict_interval: matches
                .get_one::<Duration>(ARG_STRICT_INTERVAL)
                .copied()
                .unwrap_or(defaults.strict_interval),
            relaxed_max: matches
                .get_one::<u32>(ARG_RELAXED_MAX)
                .copied()
                .unwrap_or(defaults.relaxed_max),
            relaxed_interval: matches
                .get_one::<Duration>(ARG_RELAXED_INTERVAL)
                .copied()
                .unwrap_or(defaults.relaxed_interval),
            bot_allow: matches
                .get_many::<String>(ARG_BOT_ALLOW)
                .map(|values| {
                    values
                        .map(|value| value.trim().to_uppercase())
                        .filter(|value| !value.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            email_block: matches
                .get_one::<Vec<EmailType>>(ARG_EMAIL_BLOCK)
                .cloned()
                .unwrap_or(defaults.email_block),
        };

        Ok(Self {
            policy,
            sign_up_route,
            trust_proxy_headers: matches
                .get_one::<bool>(ARG_TRUST_PROXY_HEADERS)
                .copied()
                .unwrap_or(false),
            body_limit: matches
                .get_one::<usize>(ARG_BODY_LIMIT_BYTES)
                .copied()
                .unwrap_or(DEFAULT_BODY_LIMIT),
        })
    }

    #[must_use]
    pub fn settings(&self, fail_mode: FailMode) -> AdmissionSettings {
        AdmissionSettings {
            sign_up_route: self.sign_up_route.clone(),
            fail_mode,
            trust_proxy_headers: self.trust_proxy_headers,
            body_limit: self.body_limit,
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MODE)
                .long(ARG_MODE)
                .help("Rule mode: live (enforce) or dry-run (log only)")
                .default_value("live")
                .env("AUTHGATE_MODE")
                .value_parser(|value: &str| value.parse::<Mode>()),
        )
        .arg(
            Arg::new(ARG_STRICT_MAX)
                .long(ARG_STRICT_MAX)
                .help("Requests allowed per window on sign-up")
                .default_value("10")
                .env("AUTHGATE_STRICT_MAX")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_STRICT_INTERVAL)
                .long(ARG_STRICT_INTERVAL)
                .help("Sign-up window, e.g. 10m, 30s, 1h")
                .default_value("10m")
                .env("AUTHGATE_STRICT_INTERVAL")
                .value_parser(parse_interval),
        )
        .arg(
            Arg::new(ARG_RELAXED_MAX)
                .long(ARG_RELAXED_MAX)
                .help("Requests allowed per window on other authentication routes")
                .default_value("60")
                .env("AUTHGATE_RELAXED_MAX")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RELAXED_INTERVAL)
                .long(ARG_RELAXED_INTERVAL)
                .help("Window for other authentication routes")
                .default_value("1m")
                .env("AUTHGATE_RELAXED_INTERVAL")
                .value_parser(parse_interval),
        )
        .arg(
            Arg::new(ARG_BOT_ALLOW)
                .long(ARG_BOT_ALLOW)
                .help("Bots let through, by name (CURL) or category (CATEGORY:SEARCH_ENGINE)")
                .env("AUTHGATE_BOT_ALLOW")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_EMAIL_BLOCK)
                .long(ARG_EMAIL_BLOCK)
                .help("Email types rejected on sign-up: DISPOSABLE, INVALID, NO_MX_RECORDS, FREE")
                .default_value("DISPOSABLE,INVALID,NO_MX_RECORDS")
                .env("AUTHGATE_EMAIL_BLOCK")
                .value_parser(parse_email_block),
        )
        .arg(
            Arg::new(ARG_SIGN_UP_ROUTE)
                .long(ARG_SIGN_UP_ROUTE)
                .help("Path suffix identifying sign-up requests")
                .default_value(DEFAULT_SIGN_UP_ROUTE)
                .env("AUTHGATE_SIGN_UP_ROUTE"),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Read the client address from proxy headers (x-forwarded-for, ...); enable only behind a proxy that sets them")
                .default_value("false")
                .env("AUTHGATE_TRUST_PROXY_HEADERS")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_BODY_LIMIT_BYTES)
                .long(ARG_BODY_LIMIT_BYTES)
                .help("Largest request body inspected before forwarding")
                .default_value("65536")
                .env("AUTHGATE_BODY_LIMIT_BYTES")
                .value_parser(clap::value_parser!(usize)),
        )
}
