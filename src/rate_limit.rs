//! Rate limit header parsing.
//!
//! When a response the retry policy treats as a failure carries rate limit
//! headers, the wait they request takes precedence over the backoff schedule
//! (see [`StandardRetryPolicy`](crate::retry::StandardRetryPolicy)).

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const RESET_HEADERS: [&str; 2] = ["x-ratelimit-reset", "ratelimit-reset"];

/// Rate limit data read from response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Wait requested by `Retry-After` (delay-seconds or HTTP date).
    pub retry_after: Option<Duration>,

    /// Window reset from `X-RateLimit-Reset` or `RateLimit-Reset` (Unix seconds).
    pub reset_at: Option<SystemTime>,

    /// Requests left in the window, from `X-RateLimit-Remaining`.
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Reads rate limit headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "120".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert_eq!(info.retry_after, Some(std::time::Duration::from_secs(120)));
    /// assert!(info.is_rate_limited());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_after: parse_retry_after(headers),
            reset_at: RESET_HEADERS
                .iter()
                .find_map(|name| header_u64(headers, name))
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            remaining: header_u64(headers, "x-ratelimit-remaining"),
        }
    }

    /// Like [`from_headers`](Self::from_headers) but `None` unless the headers
    /// describe an active limit.
    pub fn active(headers: &HeaderMap) -> Option<Self> {
        Some(Self::from_headers(headers)).filter(Self::is_rate_limited)
    }

    /// The wait before the next attempt, capped at `max_wait`.
    ///
    /// `Retry-After` wins over the reset timestamp. A reset time in the past
    /// yields `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        let wait = match (self.retry_after, self.reset_at) {
            (Some(retry_after), _) => retry_after,
            (None, Some(reset_at)) => reset_at.duration_since(SystemTime::now()).ok()?,
            (None, None) => return None,
        };
        Some(wait.min(max_wait))
    }

    /// `true` when `Retry-After` is present or no requests remain.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.remaining == Some(0)
    }
}

/// Controls whether rate limit headers influence retry delays.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Honour rate limit headers when scheduling retries.
    pub enabled: bool,

    /// Upper bound on any header-requested wait. Defaults to 5 minutes.
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait: Duration::from_secs(300),
        }
    }
}

impl RateLimitConfig {
    /// Starts a builder from the defaults.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder {
            config: Self::default(),
        }
    }

    /// A configuration that ignores rate limit headers.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Debug, Clone)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    /// Enables or disables header handling.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Caps header-requested waits.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = max_wait;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> RateLimitConfig {
        self.config
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(Duration::from_secs(secs));
    }
    let value = headers.get("retry-after")?.to_str().ok()?;
    let at = httpdate::parse_http_date(value).ok()?;
    at.duration_since(SystemTime::now()).ok()
}
