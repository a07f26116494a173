//! In-memory fixed-window rate limiting.
//!
//! Each (tier, client) pair owns a counter that resets when its window
//! ends. Counters live in one mutex-guarded map; a background task calls
//! [`RateLimiter::purge`] so idle clients do not accumulate.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Named limits applied to groups of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    General,
    Login,
    Register,
    Otp,
    Admin,
    Upload,
    Search,
}

impl RateLimitTier {
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitTier::General => "general",
            RateLimitTier::Login => "login",
            RateLimitTier::Register => "register",
            RateLimitTier::Otp => "otp",
            RateLimitTier::Admin => "admin",
            RateLimitTier::Upload => "upload",
            RateLimitTier::Search => "search",
        }
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> u32 {
        match self {
            RateLimitTier::General => 100,
            RateLimitTier::Login => 5,
            RateLimitTier::Register => 3,
            RateLimitTier::Otp => 3,
            RateLimitTier::Admin => 50,
            RateLimitTier::Upload => 10,
            RateLimitTier::Search => 200,
        }
    }

    pub fn window(&self) -> Duration {
        const MINUTE: u64 = 60;
        match self {
            RateLimitTier::General
            | RateLimitTier::Login
            | RateLimitTier::Admin
            | RateLimitTier::Search => Duration::from_secs(15 * MINUTE),
            RateLimitTier::Register | RateLimitTier::Upload => Duration::from_secs(60 * MINUTE),
            RateLimitTier::Otp => Duration::from_secs(10 * MINUTE),
        }
    }

    /// Whether a successful response gives the request back.
    pub fn refunds_success(&self) -> bool {
        matches!(self, RateLimitTier::Login)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u32, remaining: u32 },
    Limited { limit: u32, retry_after: Duration },
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(RateLimitTier, String), Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request from `key` against `tier`.
    pub fn check(&self, tier: RateLimitTier, key: &str, now: Instant) -> RateDecision {
        let limit = tier.limit();
        let window_len = tier.window();

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let window = windows
            .entry((tier, key.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(window.started) >= window_len {
            window.started = now;
            window.count = 0;
        }

        if window.count >= limit {
            let elapsed = now.duration_since(window.started);
            let retry_after = window_len.saturating_sub(elapsed);
            return RateDecision::Limited { limit, retry_after };
        }

        window.count += 1;
        RateDecision::Allowed {
            limit,
            remaining: limit - window.count,
        }
    }

    /// Give back one request, used when a login succeeds.
    pub fn refund(&self, tier: RateLimitTier, key: &str) {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(window) = windows.get_mut(&(tier, key.to_string())) {
            window.count = window.count.saturating_sub(1);
        }
    }

    /// Drop windows that have ended. Returns how many were removed.
    pub fn purge(&self, now: Instant) -> usize {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = windows.len();
        windows.retain(|(tier, _), window| now.duration_since(window.started) < tier.window());
        before - windows.len()
    }

    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .map(|windows| windows.len())
            .unwrap_or(0)
    }
}

/// Seconds to report in `Retry-After`, never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs_f64().ceil().max(1.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for expected_remaining in (0..5).rev() {
            assert_eq!(
                limiter.check(RateLimitTier::Login, "10.0.0.1", now),
                RateDecision::Allowed {
                    limit: 5,
                    remaining: expected_remaining
                }
            );
        }

        match limiter.check(RateLimitTier::Login, "10.0.0.1", now + Duration::from_secs(60)) {
            RateDecision::Limited { limit, retry_after } => {
                assert_eq!(limit, 5);
                assert_eq!(retry_after, Duration::from_secs(14 * 60));
            }
            other => panic!("expected limit, got {other:?}"),
        }
    }

    #[test]
    fn window_resets_after_it_ends() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.check(RateLimitTier::Otp, "ip", start);
        }
        assert!(matches!(
            limiter.check(RateLimitTier::Otp, "ip", start),
            RateDecision::Limited { .. }
        ));

        let later = start + RateLimitTier::Otp.window();
        assert!(matches!(
            limiter.check(RateLimitTier::Otp, "ip", later),
            RateDecision::Allowed { remaining: 2, .. }
        ));
    }

    #[test]
    fn tiers_and_clients_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..3 {
            limiter.check(RateLimitTier::Register, "a", now);
        }
        assert!(matches!(
            limiter.check(RateLimitTier::Register, "a", now),
            RateDecision::Limited { .. }
        ));
        assert!(matches!(
            limiter.check(RateLimitTier::Register, "b", now),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check(RateLimitTier::General, "a", now),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn refund_restores_one_request() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..5 {
            limiter.check(RateLimitTier::Login, "ip", now);
        }
        limiter.refund(RateLimitTier::Login, "ip");
        assert!(matches!(
            limiter.check(RateLimitTier::Login, "ip", now),
            RateDecision::Allowed { remaining: 0, .. }
        ));
    }

    #[test]
    fn purge_removes_only_finished_windows() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        limiter.check(RateLimitTier::Otp, "old", start);
        limiter.check(RateLimitTier::Upload, "long", start);
        assert_eq!(limiter.tracked(), 2);

        let removed = limiter.purge(start + Duration::from_secs(11 * 60));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
