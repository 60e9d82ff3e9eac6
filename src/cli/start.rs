use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;

/// Map verbosity count to tracing level
const fn get_verbosity_level(verbosity: u8) -> Option<tracing::Level> {
    match verbosity {
        0 => None,
        1 => Some(tracing::Level::WARN),
        2 => Some(tracing::Level::INFO),
        3 => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

/// Parse arguments, install logging and build the action to run.
///
/// # Errors
///
/// Returns an error if telemetry cannot be initialized or the arguments are inconsistent.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity_level = get_verbosity_level(commands::logging::verbosity(&matches));

    telemetry::init(verbosity_level)?;

    dispatch::handler(&matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(get_verbosity_level(0), None);
        assert_eq!(get_verbosity_level(1), Some(tracing::Level::WARN));
        assert_eq!(get_verbosity_level(2), Some(tracing::Level::INFO));
        assert_eq!(get_verbosity_level(3), Some(tracing::Level::DEBUG));
        assert_eq!(get_verbosity_level(9), Some(tracing::Level::TRACE));
    }
}
