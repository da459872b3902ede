//! Retry policies.
//!
//! The client consults a [`RetryPolicy`] whenever an attempt fails:
//!
//! 1. if the failed attempt's number has reached
//!    [`max_retry_count`](RetryPolicy::max_retry_count), the request fails
//!    without asking anything else;
//! 2. otherwise [`should_retry`](RetryPolicy::should_retry) decides, and a
//!    retry waits [`retry_delay`](RetryPolicy::retry_delay) before the next
//!    attempt starts.
//!
//! [`NoRetry`] is the default. [`StandardRetryPolicy`] combines a budget, a
//! [`Backoff`] schedule, a [`RetryPredicate`] and rate limit awareness.

use http::StatusCode;
use rand::Rng;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::Error;

/// Decides whether and when a failed attempt is repeated.
///
/// Every method has a neutral default, so a policy only overrides what it
/// cares about.
///
/// # Examples
///
/// ```
/// use courier::{Error, RetryPolicy};
///
/// /// Three attempts for timeouts, nothing else.
/// struct TimeoutsOnly;
///
/// impl RetryPolicy for TimeoutsOnly {
///     fn max_retry_count(&self) -> usize {
///         3
///     }
///
///     fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
///         error.is_timeout()
///     }
/// }
/// ```
pub trait RetryPolicy: Send + Sync {
    /// Total number of attempts permitted, including the first.
    fn max_retry_count(&self) -> usize {
        1
    }

    /// Whether the failure of attempt `attempt` (1-based) should be retried.
    fn should_retry(&self, _error: &Error, _attempt: usize) -> bool {
        false
    }

    /// Whether a received status makes the attempt a failure.
    fn is_failure_status(&self, _status: StatusCode) -> bool {
        false
    }

    /// How long to wait before the attempt following `attempt`.
    fn retry_delay(&self, _error: &Error, _attempt: usize) -> Duration {
        Duration::ZERO
    }
}

/// A single attempt, no status treated as failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {}

/// Delay schedule between attempts.
///
/// ```
/// use courier::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::Exponential {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(1),
///     jitter: false,
/// };
/// assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
/// assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(400));
/// assert_eq!(backoff.delay_for_attempt(9), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,

    /// `initial_delay * 2^(attempt - 1)`, capped at `max_delay`.
    Exponential {
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Upper bound on any delay.
        max_delay: Duration,
        /// Scale each delay by a random factor in `[0.5, 1.0]`.
        jitter: bool,
    },

    /// The same delay after every failure.
    Linear {
        /// The delay.
        delay: Duration,
    },

    /// Delay computed from the failed attempt's number.
    Custom {
        /// Maps the failed attempt (1-based) to a delay.
        delay_fn: fn(attempt: usize) -> Duration,
    },
}

impl Backoff {
    /// The delay after attempt `attempt` (1-based) failed.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Exponential {
                initial_delay,
                max_delay,
                jitter,
            } => {
                let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
                let delay = initial_delay.saturating_mul(factor).min(*max_delay);
                if *jitter {
                    delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
                } else {
                    delay
                }
            }
            Backoff::Linear { delay } => *delay,
            Backoff::Custom { delay_fn } => delay_fn(attempt),
        }
    }
}

/// Decides whether a particular failure is worth another attempt.
///
/// ```
/// use courier::{Error, RetryPredicate};
///
/// struct OnlyFirstTwo;
///
/// impl RetryPredicate for OnlyFirstTwo {
///     fn should_retry(&self, _error: &Error, attempt: usize) -> bool {
///         attempt <= 2
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// `true` to retry after `error` ended attempt `attempt`.
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

/// Retries whatever [`Error::is_retryable`] accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retries `5xx` statuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnServerError;

impl RetryPredicate for RetryOnServerError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.status().is_some_and(|status| status.is_server_error())
    }
}

/// Retries transport timeouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_timeout()
    }
}

/// Retries failures to connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error
            .transport_error()
            .is_some_and(|err| err.kind() == crate::TransportErrorKind::Connect)
    }
}

/// Retries if any inner predicate does.
///
/// ```
/// use courier::retry::{AnyOf, RetryOnServerError, RetryOnTimeout};
///
/// let predicate = AnyOf::new(vec![Box::new(RetryOnServerError), Box::new(RetryOnTimeout)]);
/// ```
pub struct AnyOf {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AnyOf {
    /// Combines `predicates`.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AnyOf {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(error, attempt))
    }
}

/// Retries only if every inner predicate does.
pub struct AllOf {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AllOf {
    /// Combines `predicates`.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AllOf {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .all(|p| p.should_retry(error, attempt))
    }
}

/// A configurable [`RetryPolicy`].
///
/// Defaults: 3 attempts, no delay, [`RetryOnRetryable`], `429` and every
/// `5xx` treated as failures, rate limit headers honoured.
///
/// # Examples
///
/// ```
/// use courier::retry::{RetryOnTimeout, StandardRetryPolicy};
/// use courier::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = StandardRetryPolicy::builder()
///     .max_retry_count(5)
///     .backoff(Backoff::Linear { delay: Duration::from_millis(250) })
///     .predicate(RetryOnTimeout)
///     .failure_statuses([503])
///     .build();
///
/// assert_eq!(policy.max_retry_count(), 5);
/// assert!(policy.is_failure_status(http::StatusCode::SERVICE_UNAVAILABLE));
/// assert!(!policy.is_failure_status(http::StatusCode::INTERNAL_SERVER_ERROR));
/// ```
pub struct StandardRetryPolicy {
    max_retry_count: usize,
    backoff: Backoff,
    predicate: Box<dyn RetryPredicate>,
    failure_statuses: BTreeSet<u16>,
    rate_limit: RateLimitConfig,
}

impl StandardRetryPolicy {
    /// Starts a builder from the defaults.
    pub fn builder() -> StandardRetryPolicyBuilder {
        StandardRetryPolicyBuilder::new()
    }
}

impl Default for StandardRetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for StandardRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardRetryPolicy")
            .field("max_retry_count", &self.max_retry_count)
            .field("backoff", &self.backoff)
            .field("failure_statuses", &self.failure_statuses)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy for StandardRetryPolicy {
    fn max_retry_count(&self) -> usize {
        self.max_retry_count
    }

    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicate.should_retry(error, attempt)
    }

    fn is_failure_status(&self, status: StatusCode) -> bool {
        self.failure_statuses.contains(&status.as_u16())
    }

    fn retry_delay(&self, error: &Error, attempt: usize) -> Duration {
        if self.rate_limit.enabled {
            if let Some(delay) = error.rate_limit_delay(self.rate_limit.max_wait) {
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = attempt,
                    max_wait_secs = self.rate_limit.max_wait.as_secs(),
                    "Rate limited - waiting before retry"
                );
                return delay;
            }
        }
        self.backoff.delay_for_attempt(attempt)
    }
}

/// Builder for [`StandardRetryPolicy`].
pub struct StandardRetryPolicyBuilder {
    max_retry_count: usize,
    backoff: Backoff,
    predicate: Box<dyn RetryPredicate>,
    failure_statuses: BTreeSet<u16>,
    rate_limit: RateLimitConfig,
}

impl StandardRetryPolicyBuilder {
    fn new() -> Self {
        Self {
            max_retry_count: 3,
            backoff: Backoff::None,
            predicate: Box::new(RetryOnRetryable),
            failure_statuses: std::iter::once(429).chain(500..=599).collect(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    /// Total attempts permitted. Values below 1 are raised to 1.
    pub fn max_retry_count(mut self, count: usize) -> Self {
        self.max_retry_count = count.max(1);
        self
    }

    /// Delay schedule between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Which failures are retried.
    pub fn predicate(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.predicate = Box::new(predicate);
        self
    }

    /// Replaces the set of statuses treated as failures.
    pub fn failure_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.failure_statuses = statuses.into_iter().collect();
        self
    }

    /// Rate limit handling for retry delays.
    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Finishes the policy.
    pub fn build(self) -> StandardRetryPolicy {
        StandardRetryPolicy {
            max_retry_count: self.max_retry_count,
            backoff: self.backoff,
            predicate: self.predicate,
            failure_statuses: self.failure_statuses,
            rate_limit: self.rate_limit,
        }
    }
}
