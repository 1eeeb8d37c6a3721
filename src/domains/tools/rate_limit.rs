//! Fixed-window rate limiting per tool.
//!
//! Each tool owns one window: the first call after the window elapses opens
//! a new one, and calls are admitted while the window's count is below the
//! limit. Bursts of up to twice the nominal rate are possible across a
//! window boundary.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::core::config::parse_duration;

/// Maximum invocations per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window }
    }

    pub fn per_minute(max_calls: u32) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    pub fn per_hour(max_calls: u32) -> Self {
        Self::new(max_calls, Duration::from_secs(3600))
    }
}

impl std::fmt::Display for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}s", self.max_calls, self.window.as_secs_f64())
    }
}

/// Parses `<count>/<duration>`, e.g. `60/1h`, `120/m`, `10/500ms`.
impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, window) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected <count>/<window>, got '{s}'"))?;
        let max_calls: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid call count '{count}'"))?;
        if max_calls == 0 {
            return Err("call count must be at least 1".to_string());
        }

        let window = window.trim();
        // A bare unit means one of it: "60/h" is "60/1h".
        let window = if window.chars().all(|c| c.is_ascii_alphabetic()) {
            parse_duration(&format!("1{window}"))?
        } else {
            parse_duration(window)?
        };
        if window.is_zero() {
            return Err("window must be longer than zero".to_string());
        }

        Ok(Self::new(max_calls, window))
    }
}

/// Rejection returned when a tool's window is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit exceeded; retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

/// Counting state for one tool.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub window_start: Instant,
    pub count: u32,
}

impl RateLimitWindow {
    /// End of the window; `None` when it lies beyond the clock's range and
    /// so never elapses.
    pub fn window_end(&self, limit: &RateLimit) -> Option<Instant> {
        self.window_start.checked_add(limit.window)
    }

    fn admit(&mut self, limit: &RateLimit, now: Instant) -> Result<(), RateLimitExceeded> {
        let end = self.window_end(limit);
        if end.is_some_and(|end| now >= end) {
            self.window_start = now;
            self.count = 0;
        }

        if self.count < limit.max_calls {
            self.count += 1;
            return Ok(());
        }

        let retry_after = match self.window_end(limit) {
            Some(end) => end.saturating_duration_since(now),
            None => limit.window,
        };
        Err(RateLimitExceeded { retry_after })
    }
}

/// Per-tool fixed-window counters.
///
/// Each tool's window is mutated under the map's per-key write guard, which
/// is held only for the counter update itself.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, RateLimitWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or reject one call to `tool` at the current time.
    pub fn admit(&self, tool: &str, limit: &RateLimit) -> Result<(), RateLimitExceeded> {
        self.admit_at(tool, limit, Instant::now())
    }

    /// Admit or reject one call to `tool` at `now`.
    pub fn admit_at(
        &self,
        tool: &str,
        limit: &RateLimit,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        if let Some(mut window) = self.windows.get_mut(tool) {
            return window.admit(limit, now);
        }

        self.windows
            .entry(tool.to_string())
            .or_insert(RateLimitWindow {
                window_start: now,
                count: 0,
            })
            .admit(limit, now)
    }

    /// Current window for `tool`, if it has been called.
    pub fn window(&self, tool: &str) -> Option<RateLimitWindow> {
        self.windows.get(tool).map(|w| *w)
    }

    /// Forget the window for `tool`.
    pub fn reset(&self, tool: &str) {
        self.windows.remove(tool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_parse_rate_limit() {
        assert_eq!("60/1h".parse::<RateLimit>().unwrap(), RateLimit::per_hour(60));
        assert_eq!("120/m".parse::<RateLimit>().unwrap(), RateLimit::per_minute(120));
        assert_eq!(
            "10/500ms".parse::<RateLimit>().unwrap(),
            RateLimit::new(10, Duration::from_millis(500))
        );
        assert_eq!("5/30".parse::<RateLimit>().unwrap(), RateLimit::new(5, Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_rate_limit_rejects_garbage() {
        assert!("60".parse::<RateLimit>().is_err());
        assert!("0/1h".parse::<RateLimit>().is_err());
        assert!("ten/1h".parse::<RateLimit>().is_err());
        assert!("10/0s".parse::<RateLimit>().is_err());
    }

    #[test]
    fn test_exactly_limit_calls_admitted() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::per_minute(3);
        let t0 = Instant::now();

        for i in 0..3 {
            let now = t0 + Duration::from_secs(i);
            assert_ok!(limiter.admit_at("search", &limit, now));
        }

        let rejected = limiter
            .admit_at("search", &limit, t0 + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_secs(50));
        assert_eq!(limiter.window("search").unwrap().count, 3);
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::per_minute(1);
        let t0 = Instant::now();

        assert_ok!(limiter.admit_at("search", &limit, t0));
        assert_err!(limiter.admit_at("search", &limit, t0 + Duration::from_secs(59)));

        let later = t0 + Duration::from_secs(60);
        assert_ok!(limiter.admit_at("search", &limit, later));

        let window = limiter.window("search").unwrap();
        assert_eq!(window.window_start, later);
        assert_eq!(window.count, 1);
    }

    #[test]
    fn test_window_beyond_clock_range_never_elapses() {
        let limit: RateLimit = assert_ok!("1/999999999999999d".parse());
        let limiter = RateLimiter::new();
        let t0 = Instant::now();

        assert_ok!(limiter.admit_at("slow", &limit, t0));
        let rejected = limiter
            .admit_at("slow", &limit, t0 + Duration::from_secs(86_400))
            .unwrap_err();
        assert!(rejected.retry_after > Duration::from_secs(86_400));
        assert_eq!(limiter.window("slow").unwrap().count, 1);
    }

    #[test]
    fn test_rejections_do_not_increment() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::per_minute(1);
        let t0 = Instant::now();

        limiter.admit_at("a", &limit, t0).unwrap();
        for _ in 0..5 {
            assert_err!(limiter.admit_at("a", &limit, t0));
        }
        assert_eq!(limiter.window("a").unwrap().count, 1);
    }

    #[test]
    fn test_tools_counted_independently() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::per_minute(1);
        let t0 = Instant::now();

        assert_ok!(limiter.admit_at("a", &limit, t0));
        assert_ok!(limiter.admit_at("b", &limit, t0));
        assert_err!(limiter.admit_at("a", &limit, t0));

        limiter.reset("a");
        assert_ok!(limiter.admit_at("a", &limit, t0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_are_not_lost() {
        let limiter = Arc::new(RateLimiter::new());
        let limit = RateLimit::per_hour(1_000);
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                tokio::spawn(async move {
                    if limiter.admit("shared", &limit).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 200);
        assert_eq!(limiter.window("shared").unwrap().count, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_bounded_by_limit() {
        let limiter = Arc::new(RateLimiter::new());
        let limit = RateLimit::per_hour(25);

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.admit("shared", &limit).is_ok() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 25);
        assert_eq!(limiter.window("shared").unwrap().count, 25);
    }
}
