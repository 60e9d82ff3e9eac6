use anyhow::{Context, Result, bail};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;
use url::Url;

pub const ARG_UPSTREAM_URL: &str = "upstream-url";
pub const ARG_SESSION_PATH: &str = "session-path";
pub const ARG_UPSTREAM_TIMEOUT_SECONDS: &str = "upstream-timeout-seconds";

pub const DEFAULT_SESSION_PATH: &str = "/api/auth/get-session";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Url,
    pub session_url: Url,
    pub timeout: Duration,
}

impl Options {
    /// Parse credential engine arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the upstream URL is missing or invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let raw = match matches.get_one::<String>(ARG_UPSTREAM_URL) {
            Some(value) if !value.trim().is_empty() => value.trim(),
            _ => bail!("missing required argument: --{ARG_UPSTREAM_URL}"),
        };
        let url = Url::parse(raw).with_context(|| format!("invalid upstream URL: {raw}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("upstream URL must use http or https: {raw}");
        }

        let session_path = matches
            .get_one::<String>(ARG_SESSION_PATH)
            .map_or(DEFAULT_SESSION_PATH, String::as_str);
        let session_url = session_url(&url, session_path);

        let timeout = Duration::from_secs(
            matches
                .get_one::<u64>(ARG_UPSTREAM_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
        );

        Ok(Self {
            url,
            session_url,
            timeout,
        })
    }
}

/// Session endpoint under the upstream base path.
fn session_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    ));
    url.set_query(None);
    url
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_UPSTREAM_URL)
                .long(ARG_UPSTREAM_URL)
                .help("Base URL of the credential engine, e.g. http://127.0.0.1:3000")
                .env("AUTHGATE_UPSTREAM_URL"),
        )
        .arg(
            Arg::new(ARG_SESSION_PATH)
                .long(ARG_SESSION_PATH)
                .help("Session lookup path on the credential engine")
                .default_value(DEFAULT_SESSION_PATH)
                .env("AUTHGATE_SESSION_PATH"),
        )
        .arg(
            Arg::new(ARG_UPSTREAM_TIMEOUT_SECONDS)
                .long(ARG_UPSTREAM_TIMEOUT_SECONDS)
                .help("Timeout for requests to the credential engine")
                .default_value("10")
                .env("AUTHGATE_UPSTREAM_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
