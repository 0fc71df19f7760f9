//! Per-socket per-event rate limiting.
//!
//! Each limited event keeps a sliding window of invocation timestamps per
//! socket. A request past the quota is rejected before its handler runs;
//! a handler that reports "did not consume" pops its own timestamp back
//! off so unconsumed attempts do not count against the quota.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::connection::SocketId;

/// Quota declaration attached to an event handler: at most `times`
/// invocations per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub period: Duration,
    pub times: usize,
}

impl Limit {
    #[must_use]
    pub const fn new(period: Duration, times: usize) -> Self {
        Self { period, times }
    }

    /// Shorthand: once per the given number of milliseconds.
    #[must_use]
    pub const fn once_per_ms(period_ms: u64) -> Self {
        Self {
            period: Duration::from_millis(period_ms),
            times: 1,
        }
    }
}

/// Sliding-window limiter over all sockets and events.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<(SocketId, String), VecDeque<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an attempt. Returns `true` when the call is within quota.
    pub fn check(&self, socket: SocketId, event: &str, limit: Limit) -> bool {
        self.check_at(socket, event, limit, Instant::now())
    }

    /// [`RateLimiter::check`] against an explicit clock.
    pub fn check_at(&self, socket: SocketId, event: &str, limit: Limit, now: Instant) -> bool {
        let mut window = self
            .windows
            .entry((socket, event.to_string()))
            .or_default();
        while window
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= limit.period)
        {
            window.pop_front();
        }
        if window.len() >= limit.times {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Removes the most recent timestamp for `(socket, event)`. Called
    /// when the handler did not consume the request.
    pub fn pop_last(&self, socket: SocketId, event: &str) {
        if let Some(mut window) = self.windows.get_mut(&(socket, event.to_string())) {
            window.pop_back();
        }
    }

    /// Drops all windows of a socket on close.
    pub fn forget_socket(&self, socket: SocketId) {
        self.windows.retain(|(s, _), _| *s != socket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SocketId = SocketId(1);

    #[test]
    fn quota_of_one_per_second() {
        let limiter = RateLimiter::new();
        let limit = Limit::once_per_ms(1000);
        let t0 = Instant::now();

        assert!(limiter.check_at(S, "sign_up_account", limit, t0));
        // 999 ms later: still inside the window.
        assert!(!limiter.check_at(S, "sign_up_account", limit, t0 + Duration::from_millis(999)));
        // 1001 ms later: the first timestamp has expired.
        assert!(limiter.check_at(S, "sign_up_account", limit, t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn quota_counts_only_within_window() {
        let limiter = RateLimiter::new();
        let limit = Limit::new(Duration::from_millis(100), 2);
        let t0 = Instant::now();

        assert!(limiter.check_at(S, "move", limit, t0));
        assert!(limiter.check_at(S, "move", limit, t0 + Duration::from_millis(10)));
        assert!(!limiter.check_at(S, "move", limit, t0 + Duration::from_millis(20)));
        // First attempt expired; one slot free again.
        assert!(limiter.check_at(S, "move", limit, t0 + Duration::from_millis(105)));
    }

    #[test]
    fn windows_are_per_socket_and_per_event() {
        let limiter = RateLimiter::new();
        let limit = Limit::once_per_ms(1000);
        let t0 = Instant::now();

        assert!(limiter.check_at(S, "move", limit, t0));
        assert!(limiter.check_at(SocketId(2), "move", limit, t0));
        assert!(limiter.check_at(S, "send_message", limit, t0));
        assert!(!limiter.check_at(S, "move", limit, t0));
    }

    #[test]
    fn pop_last_refunds_the_attempt() {
        let limiter = RateLimiter::new();
        let limit = Limit::once_per_ms(1000);
        let t0 = Instant::now();

        assert!(limiter.check_at(S, "move", limit, t0));
        limiter.pop_last(S, "move");
        assert!(limiter.check_at(S, "move", limit, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn forget_socket_clears_its_windows() {
        let limiter = RateLimiter::new();
        let limit = Limit::once_per_ms(1000);
        let t0 = Instant::now();

        assert!(limiter.check_at(S, "move", limit, t0));
        limiter.forget_socket(S);
        assert!(limiter.check_at(S, "move", limit, t0));
    }
}
