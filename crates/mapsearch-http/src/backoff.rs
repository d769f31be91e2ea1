//! Retry backoff policy with jittered exponential delays.
//!
//! A [`BackoffPolicy`] is an immutable value built once when a client is
//! constructed and shared by every request that client issues. Computing a
//! delay is a pure function of the retry index plus one uniform draw, so a
//! single policy can serve any number of concurrent callers.
//!
//! # Strategies
//!
//! | Strategy | Delay for retry `n` | Range |
//! |----------|---------------------|-------|
//! | [`JitterStrategy::Full`] | `random(0, t)` | `[0, t]` |
//! | [`JitterStrategy::Equal`] | `t/2 + random(0, t/2)` | `[t/2, t]` |
//!
//! where `t = min(cap, base * 2^n)` and `n` starts at 0 for the first retry.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

use crate::error::PolicyError;

/// Default number of retries after the first try.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default base delay.
pub const DEFAULT_BASE: Duration = Duration::from_millis(100);

/// Default upper bound for any single delay.
pub const DEFAULT_CAP: Duration = Duration::from_millis(200);

/// How randomness is applied to the exponential ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterStrategy {
    /// Uniform over `[0, t]`. Spreads concurrent retriers the most.
    #[default]
    Full,
    /// Half fixed, half random: uniform over `[t/2, t]`.
    Equal,
}

impl fmt::Display for JitterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Equal => f.write_str("equal"),
        }
    }
}

impl FromStr for JitterStrategy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "equal" => Ok(Self::Equal),
            other => Err(PolicyError::UnknownStrategy(other.to_owned())),
        }
    }
}

/// Immutable retry configuration for one HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    strategy: JitterStrategy,
    retryable_status_codes: BTreeSet<u16>,
    retry_on_read_timeout: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base: DEFAULT_BASE,
            cap: DEFAULT_CAP,
            strategy: JitterStrategy::Full,
            retryable_status_codes: BTreeSet::new(),
            retry_on_read_timeout: false,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy allowing `max_attempts` retries after the first try.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ZeroBase`] if `base` is zero and
    /// [`PolicyError::CapBelowBase`] if `cap < base`.
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Result<Self, PolicyError> {
        if base.is_zero() {
            return Err(PolicyError::ZeroBase);
        }
        if cap < base {
            return Err(PolicyError::CapBelowBase { base, cap });
        }
        Ok(Self {
            max_attempts,
            base,
            cap,
            ..Self::default()
        })
    }

    /// Set the jitter strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: JitterStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replace the set of response statuses treated as transient failures.
    #[must_use]
    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Allow read timeouts to be retried.
    #[must_use]
    pub const fn with_retry_on_read_timeout(mut self, enabled: bool) -> Self {
        self.retry_on_read_timeout = enabled;
        self
    }

    /// Number of retries allowed after the first try.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay.
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Upper bound for any single delay.
    pub const fn cap(&self) -> Duration {
        self.cap
    }

    /// Configured jitter strategy.
    pub const fn strategy(&self) -> JitterStrategy {
        self.strategy
    }

    /// Whether read timeouts are retried.
    pub const fn retry_on_read_timeout(&self) -> bool {
        self.retry_on_read_timeout
    }

    /// Statuses treated as transient failures.
    pub const fn retryable_status_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_status_codes
    }

    /// Whether a response with `status` should be retried.
    pub fn retries_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Exponential ceiling `t = min(cap, base * 2^attempt)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        2_u32
            .checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |raw| raw.min(self.cap))
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    ///
    /// Draws from the calling thread's generator, which is never shared
    /// across threads.
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::rng().random();
        self.delay_with_unit(attempt, unit)
    }

    /// Delay for `attempt` given a uniform sample `unit` in `[0, 1)`.
    ///
    /// Samples outside that range are clamped; non-finite samples count as 0.
    pub fn delay_with_unit(&self, attempt: u32, unit: f64) -> Duration {
        let unit = if unit.is_finite() { unit.clamp(0.0, 1.0) } else { 0.0 };
        let t = self.ceiling(attempt);
        let delay = match self.strategy {
            JitterStrategy::Full => t.mul_f64(unit),
            JitterStrategy::Equal => {
                let half = t / 2;
                half.saturating_add(half.mul_f64(unit))
            }
        };
        delay.min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: Duration = Duration::from_micros(1);

    fn policy(strategy: JitterStrategy) -> BackoffPolicy {
        BackoffPolicy::new(5, Duration::from_millis(100), Duration::from_millis(800))
            .map(|p| p.with_strategy(strategy))
            .unwrap_or_default()
    }

    #[test]
    fn rejects_zero_base() {
        let result = BackoffPolicy::new(1, Duration::ZERO, Duration::from_millis(10));
        assert!(matches!(result, Err(PolicyError::ZeroBase)));
    }

    #[test]
    fn rejects_cap_below_base() {
        let result = BackoffPolicy::new(1, Duration::from_millis(50), Duration::from_millis(10));
        assert!(matches!(result, Err(PolicyError::CapBelowBase { .. })));
    }

    #[test]
    fn ceiling_doubles_until_cap() {
        let p = policy(JitterStrategy::Full);
        assert_eq!(p.ceiling(0), Duration::from_millis(100));
        assert_eq!(p.ceiling(1), Duration::from_millis(200));
        assert_eq!(p.ceiling(2), Duration::from_millis(400));
        assert_eq!(p.ceiling(3), Duration::from_millis(800));
        assert_eq!(p.ceiling(4), Duration::from_millis(800));
        assert_eq!(p.ceiling(u32::MAX), Duration::from_millis(800));
    }

    #[test]
    fn full_jitter_stays_within_zero_and_cap() {
        let p = policy(JitterStrategy::Full);
        for attempt in 0..64 {
            for _ in 0..50 {
                let d = p.delay(attempt);
                assert!(d <= p.cap(), "attempt {attempt}: {d:?} exceeds cap");
                assert!(d <= p.ceiling(attempt) + EPSILON);
            }
        }
    }

    #[test]
    fn equal_jitter_stays_within_half_ceiling_and_ceiling() {
        let p = policy(JitterStrategy::Equal);
        for attempt in 0..64 {
            let t = p.ceiling(attempt);
            for _ in 0..50 {
                let d = p.delay(attempt);
                assert!(d + EPSILON >= t / 2, "attempt {attempt}: {d:?} below {t:?}/2");
                assert!(d <= t + EPSILON, "attempt {attempt}: {d:?} above {t:?}");
            }
        }
    }

    fn close(a: Duration, b: Duration) -> bool {
        a.abs_diff(b) <= EPSILON
    }

    #[test]
    fn unit_sample_endpoints() {
        let full = policy(JitterStrategy::Full);
        assert_eq!(full.delay_with_unit(0, 0.0), Duration::ZERO);
        assert!(close(full.delay_with_unit(0, 1.0), Duration::from_millis(100)));

        let equal = policy(JitterStrategy::Equal);
        assert_eq!(equal.delay_with_unit(1, 0.0), Duration::from_millis(100));
        assert!(close(equal.delay_with_unit(1, 1.0), Duration::from_millis(200)));
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let p = policy(JitterStrategy::Full);
        assert_eq!(p.delay_with_unit(0, -3.0), Duration::ZERO);
        assert_eq!(p.delay_with_unit(0, f64::NAN), Duration::ZERO);
        assert!(p.delay_with_unit(10, 7.0) <= p.cap());
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!("full".parse::<JitterStrategy>().ok(), Some(JitterStrategy::Full));
        assert_eq!(" Equal ".parse::<JitterStrategy>().ok(), Some(JitterStrategy::Equal));
        assert!("linear".parse::<JitterStrategy>().is_err());
    }

    #[test]
    fn retryable_statuses() {
        let p = BackoffPolicy::default().with_retryable_status_codes([502, 503]);
        assert!(p.retries_status(503));
        assert!(!p.retries_status(500));
        assert_eq!(p.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert!(!p.retry_on_read_timeout());
    }
}
