use std::num::NonZeroU32;

use governor::{
    Quota, RateLimiter as GovernorLimiter,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};

use crate::config::RateLimitConfig;

type DirectLimiter<C> = GovernorLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// GCRA limiter guarding one connection's chat submissions.
///
/// A full bucket of `burst` cells refills at `per_minute`. Owned by the
/// connection's read loop.
pub struct RateLimiter<C: Clock = DefaultClock> {
    limiter: Option<DirectLimiter<C>>,
}

impl RateLimiter {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Zero `per_minute` disables limiting.
    pub fn with_clock(config: &RateLimitConfig, clock: C) -> Self {
        let Some(per_minute) = NonZeroU32::new(config.per_minute) else {
            return Self::unlimited();
        };
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            limiter: Some(GovernorLimiter::direct_with_clock(quota, clock)),
        }
    }

    /// A limiter that admits everything.
    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Take one cell if the quota allows it.
    pub fn try_acquire(&self) -> bool {
        self.limiter.as_ref().is_none_or(|limiter| limiter.check().is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::time::Duration;

    fn limiter(per_minute: u32, burst: u32) -> (RateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(&RateLimitConfig { per_minute, burst }, clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_twenty_one_in_one_second() {
        let (limiter, clock) = limiter(20, 20);

        let mut accepted = 0;
        let mut rejected = 0;
        for _ in 0..21 {
            if limiter.try_acquire() {
                accepted += 1;
            } else {
                rejected += 1;
            }
            clock.advance(Duration::from_millis(40));
        }

        assert_eq!(accepted, 20);
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_refills_at_one_cell_per_three_seconds() {
        let (limiter, clock) = limiter(20, 20);
        for _ in 0..20 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_millis(2900));
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_millis(200));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_refill_never_exceeds_burst() {
        let (limiter, clock) = limiter(20, 5);
        clock.advance(Duration::from_secs(3600));

        let accepted = (0..10).filter(|_| limiter.try_acquire()).count();
        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_zero_rate_disables_limiting() {
        let limiter = RateLimiter::from_config(&RateLimitConfig { per_minute: 0, burst: 0 });
        assert!((0..1000).all(|_| limiter.try_acquire()));
    }

    #[test]
    fn test_limiters_are_independent() {
        let (a, _clock_a) = limiter(1, 1);
        let (b, _clock_b) = limiter(1, 1);
        assert!(a.try_acquire());
        assert!(!a.try_acquire());
        assert!(b.try_acquire());
    }
}
