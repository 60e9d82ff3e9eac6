//! User-agent based bot detection.

use super::{
    decision::{Conclusion, Reason, RuleKind, RuleResult},
    rules::BotRule,
};

/// Name reported for requests that carry no user agent at all.
pub const MISSING_USER_AGENT: &str = "MISSING_USER_AGENT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BotMatch {
    pub name: &'static str,
    pub category: &'static str,
}

// (lowercase needle, name, category); first match wins, generic patterns last.
const SIGNATURES: &[(&str, &str, &str)] = &[
    ("curl/", "CURL", "TOOL"),
    ("wget/", "WGET", "TOOL"),
    ("httpie/", "HTTPIE", "TOOL"),
    ("postmanruntime", "POSTMAN", "TOOL"),
    ("insomnia", "INSOMNIA", "TOOL"),
    ("python-requests", "PYTHON_REQUESTS", "HTTP_LIBRARY"),
    ("python-urllib", "PYTHON_URLLIB", "HTTP_LIBRARY"),
    ("python-httpx", "PYTHON_HTTPX", "HTTP_LIBRARY"),
    ("aiohttp", "PYTHON_AIOHTTP", "HTTP_LIBRARY"),
    ("go-http-client", "GO_HTTP", "HTTP_LIBRARY"),
    ("okhttp", "OKHTTP", "HTTP_LIBRARY"),
    ("axios/", "AXIOS", "HTTP_LIBRARY"),
    ("node-fetch", "NODE_FETCH", "HTTP_LIBRARY"),
    ("undici", "NODE_UNDICI", "HTTP_LIBRARY"),
    ("java/", "JAVA_HTTP", "HTTP_LIBRARY"),
    ("libwww-perl", "PERL_LWP", "HTTP_LIBRARY"),
    ("headlesschrome", "HEADLESS_CHROME", "HEADLESS_BROWSER"),
    ("phantomjs", "PHANTOMJS", "HEADLESS_BROWSER"),
    ("puppeteer", "PUPPETEER", "HEADLESS_BROWSER"),
    ("playwright", "PLAYWRIGHT", "HEADLESS_BROWSER"),
    ("selenium", "SELENIUM", "HEADLESS_BROWSER"),
    ("googlebot", "GOOGLE_CRAWLER", "SEARCH_ENGINE"),
    ("bingbot", "BING_CRAWLER", "SEARCH_ENGINE"),
    ("duckduckbot", "DUCKDUCKGO_CRAWLER", "SEARCH_ENGINE"),
    ("yandexbot", "YANDEX_CRAWLER", "SEARCH_ENGINE"),
    ("baiduspider", "BAIDU_CRAWLER", "SEARCH_ENGINE"),
    ("applebot", "APPLE_CRAWLER", "SEARCH_ENGINE"),
    ("facebookexternalhit", "FACEBOOK_PREVIEW", "PREVIEW"),
    ("slackbot", "SLACK_PREVIEW", "PREVIEW"),
    ("discordbot", "DISCORD_PREVIEW", "PREVIEW"),
    ("twitterbot", "TWITTER_PREVIEW", "PREVIEW"),
    ("gptbot", "OPENAI_CRAWLER", "AI"),
    ("ccbot", "COMMON_CRAWL", "AI"),
    ("bytespider", "BYTEDANCE_CRAWLER", "AI"),
    ("scrapy", "SCRAPY", "SCRAPER"),
    ("crawler", "UNKNOWN_CRAWLER", "UNKNOWN"),
    ("spider", "UNKNOWN_SPIDER", "UNKNOWN"),
    ("bot", "UNKNOWN_BOT", "UNKNOWN"),
];

/// Classify a user agent. `None` means the client looks like a browser.
#[must_use]
pub fn detect(user_agent: Option<&str>) -> Option<BotMatch> {
    let agent = user_agent.map(str::trim).filter(|agent| !agent.is_empty());
    let Some(agent) = agent else {
        return Some(BotMatch {
            name: MISSING_USER_AGENT,
            category: "UNKNOWN",
        });
    };
    let agent = agent.to_lowercase();
    SIGNATURES
        .iter()
        .find(|(needle, _, _)| agent.contains(needle))
        .map(|&(_, name, category)| BotMatch { name, category })
}

fn is_allowed(rule: &BotRule, found: BotMatch) -> bool {
    rule.allow.iter().any(|entry| {
        let entry = entry.trim();
        entry.eq_ignore_ascii_case(found.name)
            || entry
                .strip_prefix("CATEGORY:")
                .is_some_and(|category| category.eq_ignore_ascii_case(found.category))
    })
}

/// Evaluate a bot rule against the request's user agent.
#[must_use]
pub fn evaluate(rule: &BotRule, user_agent: Option<&str>) -> RuleResult {
    let denied: Vec<String> = detect(user_agent)
        .filter(|found| !is_allowed(rule, *found))
        .map(|found| vec![found.name.to_string()])
        .unwrap_or_default();
    RuleResult {
        rule: RuleKind::Bot,
        mode: rule.mode,
        conclusion: if denied.is_empty() {
            Conclusion::Allow
        } else {
            Conclusion::Deny
        },
        reason: Reason::Bot { denied },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protect::rules::Mode;

    const FIREFOX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0";

    fn rule(allow: &[&str]) -> BotRule {
        BotRule {
            mode: Mode::Live,
            allow: allow.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn browsers_are_not_bots() {
        assert_eq!(detect(Some(FIREFOX)), None);
    }

    #[test]
    fn missing_user_agent_is_a_bot() {
        assert_eq!(detect(None).map(|m| m.name), Some(MISSING_USER_AGENT));
        assert_eq!(detect(Some("   ")).map(|m| m.name), Some(MISSING_USER_AGENT));
    }

    #[test]
    fn tools_and_crawlers_are_classified() {
        assert_eq!(detect(Some("curl/8.5.0")).map(|m| m.name), Some("CURL"));
        assert_eq!(
            detect(Some("Mozilla/5.0 (compatible; Googlebot/2.1)")).map(|m| m.category),
            Some("SEARCH_ENGINE")
        );
        assert_eq!(
            detect(Some("Mozilla/5.0 HeadlessChrome/120.0")).map(|m| m.name),
            Some("HEADLESS_CHROME")
        );
        assert_eq!(detect(Some("SomethingBot/1.0")).map(|m| m.name), Some("UNKNOWN_BOT"));
    }

    #[test]
    fn empty_allowlist_denies_every_bot() {
        let result = evaluate(&rule(&[]), Some("curl/8.5.0"));
        assert_eq!(result.conclusion, Conclusion::Deny);
        assert_eq!(result.reason, Reason::Bot { denied: vec!["CURL".to_string()] });
    }

    #[test]
    fn allowlist_matches_names_and_categories() {
        let result = evaluate(&rule(&["curl"]), Some("curl/8.5.0"));
        assert_eq!(result.conclusion, Conclusion::Allow);

        let result = evaluate(
            &rule(&["CATEGORY:SEARCH_ENGINE"]),
            Some("Mozilla/5.0 (compatible; bingbot/2.0)"),
        );
        assert_eq!(result.conclusion, Conclusion::Allow);
    }

    #[test]
    fn browser_is_allowed() {
        let result = evaluate(&rule(&[]), Some(FIREFOX));
        assert_eq!(result.conclusion, Conclusion::Allow);
    }
}
