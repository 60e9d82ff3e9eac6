//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary runs, carrying the full
//! gateway configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{policy, protector, upstream};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let upstream_opts = upstream::Options::parse(matches)?;
    let protector_opts = protector::Options::parse(matches)?;
    let policy_opts = policy::Options::parse(matches)?;
    let settings = policy_opts.settings(protector_opts.fail_mode);

    Ok(Action::Server(Args {
        port,
        upstream_url: upstream_opts.url,
        session_url: upstream_opts.session_url,
        upstream_timeout: upstream_opts.timeout,
        protector: protector_opts.kind,
        protector_url: protector_opts.url,
        protector_key: protector_opts.key,
        protector_timeout: protector_opts.timeout,
        policy: policy_opts.policy,
        settings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::admission::FailMode;

    #[test]
    fn upstream_url_required() {
        temp_env::with_vars([("AUTHGATE_UPSTREAM_URL", None::<&str>)], || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["authgate"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(
                    err.to_string()
                        .contains("missing required argument: --upstream-url")
                );
            }
        });
    }

    #[test]
    fn server_action_carries_configuration() {
        temp_env::with_vars(
            [
                ("AUTHGATE_UPSTREAM_URL", Some("http://engine:3000")),
                ("AUTHGATE_PORT", Some("8443")),
                ("AUTHGATE_FAIL_MODE", Some("open")),
                ("AUTHGATE_PROTECTOR", None),
                ("AUTHGATE_STRICT_MAX", Some("5")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["authgate"]);
                let action = handler(&matches);
                assert!(action.is_ok());
                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 8443);
                    assert_eq!(
                        args.session_url.as_str(),
                        "http://engine:3000/api/auth/get-session"
                    );
                    assert_eq!(args.settings.fail_mode, FailMode::Open);
                    assert_eq!(args.policy.strict_max, 5);
                }
            },
        );
    }
}
