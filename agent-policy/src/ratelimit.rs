//! Sliding-window rate limiting keyed by identity.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use agent_primitives::Identity;
use tracing::debug;

use crate::{PolicyError, PolicyResult};

const DEFAULT_MAX_REQUESTS: NonZeroUsize = match NonZeroUsize::new(5) {
    Some(value) => value,
    None => unreachable!(),
};
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Limits applied by a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    max_requests: NonZeroUsize,
    window: Duration,
}

impl RateLimitConfig {
    /// Creates a configuration after validating the window length.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidConfig`] when the window is zero.
    pub fn new(max_requests: NonZeroUsize, window: Duration) -> PolicyResult<Self> {
        if window.is_zero() {
            return Err(PolicyError::InvalidConfig(
                "rate limit window must be greater than zero",
            ));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    /// Maximum requests admitted per window.
    #[must_use]
    pub const fn max_requests(&self) -> NonZeroUsize {
        self.max_requests
    }

    /// Length of the sliding window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Per-identity sliding-window limiter.
///
/// A request at `now` is admitted when fewer than `max_requests` admitted
/// requests fall within `(now - window, now]`. Rejected requests are not
/// recorded. Identities without recent requests are dropped at most once per
/// window length.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

#[derive(Debug, Default)]
struct Windows {
    by_identity: HashMap<Identity, VecDeque<Instant>>,
    swept_at: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter with the supplied configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admits or rejects a request made now.
    #[must_use]
    pub fn allow(&self, identity: &Identity) -> bool {
        self.allow_at(identity, Instant::now())
    }

    /// Admits or rejects a request made at `now`, recording it when admitted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn allow_at(&self, identity: &Identity, now: Instant) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter poisoned");
        self.sweep_idle(&mut windows, now);
        let window = windows.by_identity.entry(identity.clone()).or_default();
        self.prune(window, now);

        if window.len() >= self.config.max_requests.get() {
            debug!(%identity, admitted = window.len(), "request rate limited");
            return false;
        }
        window.push_back(now);
        true
    }

    fn sweep_idle(&self, windows: &mut Windows, now: Instant) {
        if windows
            .swept_at
            .is_some_and(|swept| self.in_window(swept, now))
        {
            return;
        }
        let before = windows.by_identity.len();
        windows.by_identity.retain(|_, window| {
            self.prune(window, now);
            !window.is_empty()
        });
        windows.swept_at = Some(now);
        let dropped = before - windows.by_identity.len();
        if dropped > 0 {
            debug!(dropped, "idle rate limit windows dropped");
        }
    }

    fn prune(&self, window: &mut VecDeque<Instant>, now: Instant) {
        window.retain(|seen| self.in_window(*seen, now));
    }

    fn in_window(&self, seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(seen) < self.config.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig::new(
                NonZeroUsize::new(max).unwrap(),
                Duration::from_secs(window_secs),
            )
            .unwrap(),
        )
    }

    #[test]
    fn sliding_window_admits_after_expiry() {
        let limiter = limiter(2, 60);
        let alice = Identity::new("alice").unwrap();
        let start = Instant::now();
        let at = |secs| start + Duration::from_secs(secs);

        assert!(limiter.allow_at(&alice, at(0)));
        assert!(limiter.allow_at(&alice, at(10)));
        assert!(!limiter.allow_at(&alice, at(20)));
        assert!(limiter.allow_at(&alice, at(61)));
        assert!(!limiter.allow_at(&alice, at(62)));
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let limiter = limiter(1, 60);
        let alice = Identity::new("alice").unwrap();
        let start = Instant::now();

        assert!(limiter.allow_at(&alice, start));
        for offset in 1..30 {
            assert!(!limiter.allow_at(&alice, start + Duration::from_secs(offset)));
        }
        assert!(limiter.allow_at(&alice, start + Duration::from_secs(60)));
    }

    #[test]
    fn identities_are_independent() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        assert!(limiter.allow_at(&Identity::new("alice").unwrap(), now));
        assert!(limiter.allow_at(&Identity::new("bob").unwrap(), now));
    }

    #[test]
    fn idle_identities_are_dropped_once_their_window_passes() {
        let limiter = limiter(1, 10);
        let alice = Identity::new("alice").unwrap();
        let bob = Identity::new("bob").unwrap();
        let start = Instant::now();
        let at = |secs| start + Duration::from_secs(secs);
        let tracked = |limiter: &RateLimiter| limiter.windows.lock().unwrap().by_identity.len();

        assert!(limiter.allow_at(&alice, at(0)));
        assert!(limiter.allow_at(&bob, at(5)));
        assert_eq!(tracked(&limiter), 2);

        // Next sweep is due ten seconds after the first one.
        assert!(limiter.allow_at(&bob, at(16)));
        assert_eq!(tracked(&limiter), 1);
        assert!(limiter.allow_at(&alice, at(17)));
        assert_eq!(tracked(&limiter), 2);
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = RateLimitConfig::new(NonZeroUsize::MIN, Duration::ZERO).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidConfig(_)));
    }
}
