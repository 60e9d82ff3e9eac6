//! Signature-based shield for common injection attacks.
//!
//! Inspects the decoded query string, the raw path, and the body. JSON bodies
//! are walked value by value and members whose key mentions `password` are
//! skipped, since credentials may legitimately contain any character.

use regex::RegexSet;
use serde_json::Value;
use url::form_urlencoded;

use super::{
    ProtectContext,
    decision::{Conclusion, Reason, RuleKind, RuleResult},
    rules::ShieldRule,
};

const SIGNATURES: &[(&str, &str)] = &[
    (r"(?i)\bunion\b[\s\S]{0,40}\bselect\b", "sql_injection"),
    (r"(?i)'\s*or\s+'?\d+'?\s*=\s*'?\d+", "sql_injection"),
    (r"(?i)\b(or|and)\s+1\s*=\s*1\b", "sql_injection"),
    (r"(?i);\s*(drop|truncate|alter)\s+(table|database)\b", "sql_injection"),
    (r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(\s*\d+", "sql_injection"),
    (r"(?i)<\s*script\b", "xss"),
    (r"(?i)%3c\s*script", "xss"),
    (r"(?i)javascript\s*:", "xss"),
    (r"(?i)\bon(error|load|click|mouseover|focus)\s*=", "xss"),
    (r"(?i)<\s*(iframe|svg|object|embed)\b", "xss"),
    (r"\.\./|\.\.\\", "path_traversal"),
    (r"(?i)%2e%2e(%2f|%5c|/)", "path_traversal"),
    (r"(?i)/etc/(passwd|shadow)", "path_traversal"),
    (r"(?i)(;|&&|\|\|)\s*(cat|ls|id|whoami|uname|wget|curl|nc|bash|sh)\b", "command_injection"),
    (r"\$\([^)]*\)", "command_injection"),
];

#[derive(Debug)]
pub struct Shield {
    signatures: RegexSet,
}

impl Shield {
    /// Compile the signature set.
    ///
    /// # Errors
    /// Returns an error if a signature fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        let signatures = RegexSet::new(SIGNATURES.iter().map(|(pattern, _)| *pattern))?;
        Ok(Self { signatures })
    }

    /// Attack classes matched by `input`, deduplicated, in signature order.
    #[must_use]
    pub fn scan(&self, input: &str) -> Vec<&'static str> {
        let mut found: Vec<&'static str> = Vec::new();
        for index in self.signatures.matches(input).iter() {
            if let Some(&(_, class)) = SIGNATURES.get(index) {
                if !found.contains(&class) {
                    found.push(class);
                }
            }
        }
        found
    }

    /// Attack classes found anywhere in the request.
    #[must_use]
    pub fn inspect(&self, context: &ProtectContext) -> Vec<&'static str> {
        let mut found = self.scan(&context.path);
        if let Some(query) = context.query.as_deref() {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                merge(&mut found, self.scan(&key));
                merge(&mut found, self.scan(&value));
            }
        }
        match serde_json::from_str::<Value>(&context.body) {
            Ok(value) => self.inspect_json(&value, &mut found),
            Err(_) => merge(&mut found, self.scan(&context.body)),
        }
        found
    }

    fn inspect_json(&self, value: &Value, found: &mut Vec<&'static str>) {
        match value {
            Value::String(text) => merge(found, self.scan(text)),
            Value::Array(items) => {
                for item in items {
                    self.inspect_json(item, found);
                }
            }
            Value::Object(members) => {
                for (key, member) in members {
                    if key.to_lowercase().contains("password") {
                        continue;
                    }
                    merge(found, self.scan(key));
                    self.inspect_json(member, found);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    #[must_use]
    pub fn evaluate(&self, rule: &ShieldRule, context: &ProtectContext) -> RuleResult {
        let found = self.inspect(context);
        let triggered = !found.is_empty();
        if triggered {
            tracing::debug!("shield matched: {}", found.join(","));
        }
        RuleResult {
            rule: RuleKind::Shield,
            mode: rule.mode,
            conclusion: if triggered {
                Conclusion::Deny
            } else {
                Conclusion::Allow
            },
            reason: Reason::Shield {
                shield_triggered: triggered,
            },
        }
    }
}

fn merge(found: &mut Vec<&'static str>, more: Vec<&'static str>) {
    for class in more {
        if !found.contains(&class) {
            found.push(class);
        }
    }
}
