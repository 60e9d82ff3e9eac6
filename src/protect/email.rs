//! Email validation: syntax, disposable and free providers, MX records.

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{
    ProtectError,
    decision::{Conclusion, Reason, RuleKind, RuleResult},
    rules::{EmailRule, EmailType},
};

const EMAIL_SYNTAX: &str = r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$";

const MAX_EMAIL_LENGTH: usize = 254;
const MAX_LOCAL_PART_LENGTH: usize = 64;

const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "33mail.com",
    "dispostable.com",
    "emailondeck.com",
    "fakeinbox.com",
    "getnada.com",
    "guerrillamail.com",
    "guerrillamail.net",
    "mailinator.com",
    "maildrop.cc",
    "mintemail.com",
    "mohmal.com",
    "sharklasers.com",
    "spamgourmet.com",
    "temp-mail.org",
    "tempmail.com",
    "tempmailo.com",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
];

const FREE_DOMAINS: &[&str] = &[
    "aol.com",
    "gmail.com",
    "gmx.com",
    "hotmail.com",
    "icloud.com",
    "mail.com",
    "outlook.com",
    "proton.me",
    "protonmail.com",
    "yahoo.com",
    "yandex.com",
    "zoho.com",
];

/// Resolves whether a domain can receive mail.
#[async_trait]
pub trait MxLookup: Send + Sync {
    async fn has_mx(&self, domain: &str) -> Result<bool, ProtectError>;
}

/// MX lookups through the system resolver configuration.
pub struct DnsMxLookup {
    resolver: TokioResolver,
}

impl DnsMxLookup {
    /// Build a resolver from `/etc/resolv.conf` (or the platform equivalent).
    ///
    /// # Errors
    /// Returns an error if the system resolver configuration cannot be read.
    pub fn from_system() -> Result<Self, ProtectError> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|err| ProtectError::Dns(format!("system resolver config: {err}")))?
            .build();
        Ok(Self { resolver })
    }
}

impl std::fmt::Debug for DnsMxLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsMxLookup").finish_non_exhaustive()
    }
}

#[async_trait]
impl MxLookup for DnsMxLookup {
    #[instrument(skip(self))]
    async fn has_mx(&self, domain: &str) -> Result<bool, ProtectError> {
        // Fully qualified, so search domains are never appended.
        let fqdn = format!("{}.", domain.trim_end_matches('.'));
        match self.resolver.mx_lookup(fqdn).await {
            Ok(lookup) => Ok(lookup.iter().next().is_some()),
            Err(err) if err.is_no_records_found() => Ok(false),
            Err(err) => Err(ProtectError::Dns(err.to_string())),
        }
    }
}

fn domain_of(email: &str) -> Option<String> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('.').to_lowercase())
}

fn listed(domain: &str, list: &[&str]) -> bool {
    list.iter()
        .any(|entry| domain == *entry || domain.ends_with(&format!(".{entry}")))
}

fn compile_syntax(pattern: &str) -> Result<Regex, ProtectError> {
    Regex::new(pattern).map_err(|err| ProtectError::Config(format!("email pattern: {err}")))
}

pub struct EmailValidator {
    mx: Arc<dyn MxLookup>,
    syntax: Regex,
}

impl EmailValidator {
    /// # Errors
    /// Returns an error if the address pattern fails to compile.
    pub fn new(mx: Arc<dyn MxLookup>) -> Result<Self, ProtectError> {
        Ok(Self {
            mx,
            syntax: compile_syntax(EMAIL_SYNTAX)?,
        })
    }

    /// Syntax check on a trimmed address.
    #[must_use]
    pub fn valid_syntax(&self, email: &str) -> bool {
        if email.len() > MAX_EMAIL_LENGTH {
            return false;
        }
        let Some((local, _)) = email.rsplit_once('@') else {
            return false;
        };
        local.len() <= MAX_LOCAL_PART_LENGTH && self.syntax.is_match(email)
    }

    /// Every category the address falls into, limited to what `rule` blocks
    /// when a check is costly (MX lookups run only if `NO_MX_RECORDS` is blocked).
    ///
    /// A failed MX lookup is logged and the domain is not classified as
    /// `NO_MX_RECORDS`.
    pub async fn classify(&self, rule: &EmailRule, email: &str) -> Vec<EmailType> {
        let email = email.trim();
        if !self.valid_syntax(email) {
            return vec![EmailType::Invalid];
        }
        let Some(domain) = domain_of(email) else {
            return vec![EmailType::Invalid];
        };

        let mut types = Vec::new();
        if listed(&domain, DISPOSABLE_DOMAINS) {
            types.push(EmailType::Disposable);
        }
        if listed(&domain, FREE_DOMAINS) {
            types.push(EmailType::Free);
        }
        if rule.blocks(EmailType::NoMxRecords) {
            match self.mx.has_mx(&domain).await {
                Ok(true) => {}
                Ok(false) => types.push(EmailType::NoMxRecords),
                Err(err) => warn!("MX lookup for {domain} failed, skipping the MX check: {err}"),
            }
        }
        debug!("email domain {domain} classified as {types:?}");
        types
    }

    /// Evaluate an email rule.
    pub async fn evaluate(&self, rule: &EmailRule, email: &str) -> RuleResult {
        let email_types: Vec<EmailType> = self
            .classify(rule, email)
            .await
            .into_iter()
            .filter(|kind| rule.blocks(*kind))
            .collect();
        RuleResult {
            rule: RuleKind::Email,
            mode: rule.mode,
            conclusion: if email_types.is_empty() {
                Conclusion::Allow
            } else {
                Conclusion::Deny
            },
            reason: Reason::Email { email_types },
        }
    }
}
