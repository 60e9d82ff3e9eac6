use anyhow::{Result, bail};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::{str::FromStr, time::Duration};

use crate::api::admission::FailMode;

pub const ARG_PROTECTOR: &str = "protector";
pub const ARG_PROTECTOR_URL: &str = "protector-url";
pub const ARG_PROTECTOR_KEY: &str = "protector-key";
pub const ARG_PROTECTOR_TIMEOUT_SECONDS: &str = "protector-timeout-seconds";
pub const ARG_FAIL_MODE: &str = "fail-mode";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProtectorKind {
    #[default]
    Local,
    Remote,
}

impl FromStr for ProtectorKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("invalid protector: {other} (expected local or remote)")),
        }
    }
}

#[derive(Debug)]
pub struct Options {
    pub kind: ProtectorKind,
    pub url: Option<String>,
    pub key: Option<SecretString>,
    pub timeout: Duration,
    pub fail_mode: FailMode,
}

impl Options {
    /// Parse protector arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the remote protector is selected without a URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let kind = matches
            .get_one::<ProtectorKind>(ARG_PROTECTOR)
            .copied()
            .unwrap_or_default();
        let url = get_non_empty(ARG_PROTECTOR_URL);
        if kind == ProtectorKind::Remote && url.is_none() {
            bail!("missing required argument: --{ARG_PROTECTOR_URL} (required for the remote protector)");
        }

        Ok(Self {
            kind,
            url,
            key: get_non_empty(ARG_PROTECTOR_KEY).map(SecretString::from),
            timeout: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_PROTECTOR_TIMEOUT_SECONDS)
                    .copied()
                    .unwrap_or(5),
            ),
            fail_mode: matches
                .get_one::<FailMode>(ARG_FAIL_MODE)
                .copied()
                .unwrap_or_default(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PROTECTOR)
                .long(ARG_PROTECTOR)
                .help("Decision engine: local (in-process) or remote (hosted service)")
                .default_value("local")
                .env("AUTHGATE_PROTECTOR")
                .value_parser(|value: &str| value.parse::<ProtectorKind>()),
        )
        .arg(
            Arg::new(ARG_PROTECTOR_URL)
                .long(ARG_PROTECTOR_URL)
                .help("Base URL of the remote decision service")
                .env("AUTHGATE_PROTECTOR_URL"),
        )
        .arg(
            Arg::new(ARG_PROTECTOR_KEY)
                .long(ARG_PROTECTOR_KEY)
                .help("Bearer key for the remote decision service")
                .env("AUTHGATE_PROTECTOR_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_PROTECTOR_TIMEOUT_SECONDS)
                .long(ARG_PROTECTOR_TIMEOUT_SECONDS)
                .help("Timeout for remote decisions")
                .default_value("5")
                .env("AUTHGATE_PROTECTOR_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_FAIL_MODE)
                .long(ARG_FAIL_MODE)
                .help("When the decision engine fails: closed (reject with 503) or open (forward)")
                .default_value("closed")
                .env("AUTHGATE_FAIL_MODE")
                .value_parser(|value: &str| value.parse::<FailMode>()),
        )
}
