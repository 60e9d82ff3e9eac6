use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_LEVEL: &str = "log-level";

/// Accepts a level name or a number, mapped to the `-v` count it stands for.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err(format!("invalid log level: {level}")),
        }
    })
}

/// The louder of `-v` repetitions and `--log-level`.
#[must_use]
pub fn verbosity(matches: &ArgMatches) -> u8 {
    let count = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
    let level = matches.get_one::<u8>(ARG_LOG_LEVEL).copied().unwrap_or(0);
    count.max(level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Increase verbosity, repeat for more (-v WARN ... -vvvv TRACE)")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .long(ARG_LOG_LEVEL)
                .help("Log level: ERROR, WARN, INFO, DEBUG, TRACE or 0-5 (default: ERROR)")
                .env("AUTHGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Set)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn matches(args: &[&str]) -> Result<ArgMatches> {
        let mut argv = vec!["authgate"];
        argv.extend_from_slice(args);
        Ok(with_args(Command::new("authgate")).try_get_matches_from(argv)?)
    }

    #[test]
    fn level_names_and_numbers_parse() {
        for (value, expected) in [("warn", 1), ("DEBUG", 3), ("4", 4)] {
            temp_env::with_var("AUTHGATE_LOG_LEVEL", Some(value), || {
                let parsed = matches(&[]);
                assert!(parsed.is_ok());
                if let Ok(parsed) = parsed {
                    assert_eq!(parsed.get_one::<u8>(ARG_LOG_LEVEL).copied(), Some(expected));
                    assert_eq!(verbosity(&parsed), expected);
                }
            });
        }
    }

    #[test]
    fn louder_of_flag_and_level_wins() {
        temp_env::with_var("AUTHGATE_LOG_LEVEL", Some("warn"), || {
            let parsed = matches(&["-vvv"]);
            assert!(parsed.is_ok());
            if let Ok(parsed) = parsed {
                assert_eq!(verbosity(&parsed), 3);
            }
        });
        temp_env::with_var("AUTHGATE_LOG_LEVEL", None::<&str>, || {
            let parsed = matches(&["-v", "--log-level", "trace"]);
            assert!(parsed.is_ok());
            if let Ok(parsed) = parsed {
                assert_eq!(verbosity(&parsed), 4);
            }
            let parsed = matches(&[]);
            assert!(parsed.is_ok());
            if let Ok(parsed) = parsed {
                assert_eq!(verbosity(&parsed), 0);
            }
        });
    }

    #[test]
    fn unknown_level_is_rejected() {
        temp_env::with_var("AUTHGATE_LOG_LEVEL", Some("loud"), || {
            assert!(matches(&[]).is_err());
        });
        temp_env::with_var("AUTHGATE_LOG_LEVEL", None::<&str>, || {
            assert!(matches(&["--log-level", "9"]).is_err());
        });
    }
}
