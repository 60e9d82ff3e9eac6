//! # Authgate (Request Admission Gateway)
//!
//! `authgate` fronts an external credential engine and decides, per inbound
//! authentication request, whether the request may reach it.
//!
//! ## Admission Pipeline
//!
//! Every `POST` under `/api/auth/*` is snapshotted, keyed on an identity token
//! (session user id, else client address, else a loopback placeholder) and
//! evaluated against one of two policy bundles:
//!
//! - **strict**: sign-up requests. Adds email validation when the body carries
//!   a string `email` field.
//! - **relaxed**: every other authentication route.
//!
//! Denials are answered with `{ "error": <message> }` and a fixed status
//! (`429` rate limit, `400` email, `403` bot/shield). Allowed requests are
//! forwarded byte-for-byte to the credential engine.
//!
//! ## Protectors
//!
//! Decisions come from a [`protect::Protector`]: either the in-process engine
//! (shield signatures, user-agent bot detection, sliding-window rate limits,
//! email checks with MX lookups) or a hosted decision service.

pub mod api;
pub mod cli;
pub mod protect;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
