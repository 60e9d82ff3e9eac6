//! In-memory sliding-window rate limiting.
//!
//! Each (bucket, key) pair keeps the timestamps of its admitted requests inside
//! the window. Check-and-record runs under one lock, so concurrent requests
//! for the same key are counted in arrival order and only the count decides.
//! Denied requests are not recorded.

use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::time::interval;
use tracing::debug;

use super::{
    decision::{Conclusion, Reason, RuleKind, RuleResult},
    rules::SlidingWindowRule,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub reset: Duration,
}

#[derive(Debug)]
struct WindowEntry {
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl WindowEntry {
    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn reset_after(&self, now: Instant) -> Duration {
        self.timestamps.front().map_or(Duration::ZERO, |oldest| {
            self.window
                .saturating_sub(now.saturating_duration_since(*oldest))
        })
    }
}

/// Whole seconds, rounded up so a client waiting that long finds a free slot.
fn ceil_seconds(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_add(u64::from(duration.subsec_nanos() > 0))
}

#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a sliding-window rule for `key` and record the request if it fits.
    #[must_use]
    pub fn evaluate(&self, bucket: &str, key: &str, rule: &SlidingWindowRule) -> RuleResult {
        let outcome = self.check_at(bucket, key, rule.max, rule.interval(), Instant::now());
        RuleResult {
            rule: RuleKind::RateLimit,
            mode: rule.mode,
            conclusion: if outcome.allowed {
                Conclusion::Allow
            } else {
                Conclusion::Deny
            },
            reason: Reason::RateLimit {
                max: rule.max,
                remaining: outcome.remaining,
                reset_seconds: ceil_seconds(outcome.reset),
            },
        }
    }

    pub(crate) fn check_at(
        &self,
        bucket: &str,
        key: &str,
        max: u32,
        window: Duration,
        now: Instant,
    ) -> WindowOutcome {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(format!("{bucket}:{key}"))
            .or_insert_with(|| WindowEntry {
                window,
                timestamps: VecDeque::new(),
            });
        entry.window = window;
        entry.expire(now);

        let limit = usize::try_from(max).unwrap_or(usize::MAX);
        if entry.timestamps.len() >= limit {
            return WindowOutcome {
                allowed: false,
                remaining: 0,
                reset: entry.reset_after(now),
            };
        }

        entry.timestamps.push_back(now);
        let used = u32::try_from(entry.timestamps.len()).unwrap_or(u32::MAX);
        WindowOutcome {
            allowed: true,
            remaining: max.saturating_sub(used),
            reset: entry.reset_after(now),
        }
    }

    /// Drop keys whose window holds no timestamps anymore.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.expire(now);
            !entry.timestamps.is_empty()
        });
        debug!("rate limit sweep removed {} keys", before - entries.len());
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().len()
    }

    /// Sweep idle keys on a fixed period for the lifetime of the runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn denies_only_after_max_is_reached() {
        let limiter = SlidingWindowLimiter::new();
        let now = Instant::now();
        for expected_remaining in (0..3).rev() {
            let outcome = limiter.check_at("relaxed", "10.0.0.1", 3, WINDOW, now);
            assert!(outcome.allowed);
            assert_eq!(outcome.remaining, expected_remaining);
        }
        let outcome = limiter.check_at("relaxed", "10.0.0.1", 3, WINDOW, now);
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining, 0);
    }

    #[test]
    fn window_slides() {
        let limiter = SlidingWindowLimiter::new();
        let start = Instant::now();
        assert!(limiter.check_at("b", "k", 2, WINDOW, start).allowed);
        let later = start + Duration::from_secs(30);
        assert!(limiter.check_at("b", "k", 2, WINDOW, later).allowed);
        assert!(!limiter.check_at("b", "k", 2, WINDOW, later).allowed);

        // The first request leaves the window; one slot frees up.
        let after_first = start + WINDOW;
        let outcome = limiter.check_at("b", "k", 2, WINDOW, after_first);
        assert!(outcome.allowed);
        assert_eq!(outcome.reset, Duration::from_secs(30));
        assert!(!limiter.check_at("b", "k", 2, WINDOW, after_first).allowed);
    }

    #[test]
    fn denied_requests_do_not_extend_the_window() {
        let limiter = SlidingWindowLimiter::new();
        let start = Instant::now();
        assert!(limiter.check_at("b", "k", 1, WINDOW, start).allowed);
        for second in 1..10 {
            let at = start + Duration::from_secs(second);
            assert!(!limiter.check_at("b", "k", 1, WINDOW, at).allowed);
        }
        assert!(limiter.check_at("b", "k", 1, WINDOW, start + WINDOW).allowed);
    }

    #[test]
    fn buckets_and_keys_are_isolated() {
        let limiter = SlidingWindowLimiter::new();
        let now = Instant::now();
        assert!(limiter.check_at("strict", "k", 1, WINDOW, now).allowed);
        assert!(limiter.check_at("relaxed", "k", 1, WINDOW, now).allowed);
        assert!(limiter.check_at("strict", "other", 1, WINDOW, now).allowed);
        assert!(!limiter.check_at("strict", "k", 1, WINDOW, now).allowed);
    }

    #[test]
    fn sweep_drops_idle_keys() {
        let limiter = SlidingWindowLimiter::new();
        let start = Instant::now();
        let _ = limiter.check_at("b", "idle", 5, WINDOW, start);
        let _ = limiter.check_at("b", "busy", 5, WINDOW, start + WINDOW);
        limiter.sweep_at(start + WINDOW);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn evaluate_reports_rate_limit_reason() {
        let limiter = SlidingWindowLimiter::new();
        let rule = SlidingWindowRule::new(super::super::rules::Mode::Live, 1, WINDOW);
        let first = limiter.evaluate("b", "k", &rule);
        assert_eq!(first.conclusion, Conclusion::Allow);
        let second = limiter.evaluate("b", "k", &rule);
        assert_eq!(second.conclusion, Conclusion::Deny);
        assert!(second.reason.is_rate_limit());
        // Less than the full window is left, yet the wait rounds up to it.
        assert_eq!(
            second.reason,
            Reason::RateLimit {
                max: 1,
                remaining: 0,
                reset_seconds: 60,
            }
        );
    }

    #[test]
    fn reset_rounds_up_to_whole_seconds() {
        assert_eq!(ceil_seconds(Duration::ZERO), 0);
        assert_eq!(ceil_seconds(Duration::from_millis(400)), 1);
        assert_eq!(ceil_seconds(Duration::from_secs(2)), 2);
        assert_eq!(ceil_seconds(Duration::from_millis(2001)), 3);
        assert_eq!(ceil_seconds(Duration::from_nanos(1)), 1);
    }

    #[test]
    fn concurrent_requests_are_counted_exactly() {
        let limiter = Arc::new(SlidingWindowLimiter::new());
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check_at("b", "shared", 25, WINDOW, now).allowed)
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(0))
            .sum();
        assert_eq!(allowed, 25);
    }
}
