//! Error types for the request lifecycle.
//!
//! Every failure the pipeline can run into is represented as a value of
//! [`Error`]. Errors are data: the client attaches them to the terminal
//! [`Response`](crate::Response) instead of returning them early, so they are
//! `Clone` and comparable.

use http::StatusCode;
use std::fmt;
use std::time::Duration;

use crate::rate_limit::RateLimitInfo;

/// Broad classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The connection could not be established.
    Connect,
    /// The attempt did not finish in time.
    Timeout,
    /// The TLS handshake or certificate validation failed.
    Tls,
    /// The request could not be built or sent.
    Request,
    /// Reading the response body failed midway.
    Body,
    /// The transport broke the event protocol (for example, the stream ended
    /// without a terminal event).
    Protocol,
    /// Anything else.
    Other,
}

impl TransportErrorKind {
    /// Returns a short, stable name for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Tls => "tls",
            Self::Request => "request",
            Self::Body => "body",
            Self::Protocol => "protocol",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by a [`Transport`](crate::Transport).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    /// Creates a transport error of the given kind.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a [`TransportErrorKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    /// Shorthand for a [`TransportErrorKind::Connect`] error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    /// The kind of failure.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// The human readable description supplied by the transport.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A registered deserializer rejected the response body, or its output did
/// not match the request's target type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to deserialize `{content_type}` response: {message}")]
pub struct DeserializationError {
    content_type: String,
    message: String,
}

impl DeserializationError {
    /// Creates a deserialization error. The content type is filled in by the
    /// registry when the error passes through it.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            content_type: String::new(),
            message: message.into(),
        }
    }

    pub(crate) fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_owned();
        self
    }

    /// The content type whose deserializer failed.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The deserializer's error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The main error type.
///
/// # Examples
///
/// ```
/// use courier::{Error, TransportError};
///
/// let err = Error::from(TransportError::timeout("no response within 30s"));
/// assert!(err.is_retryable());
/// assert!(err.is_transport());
///
/// assert!(!Error::Cancelled.is_retryable());
/// ```
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The transport failed (connection refused, timeout, TLS failure, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with a status the retry policy treats as a failure.
    ///
    /// Only produced when [`RetryPolicy::is_failure_status`] says so; the
    /// response builder never turns a status into an error on its own.
    ///
    /// [`RetryPolicy::is_failure_status`]: crate::RetryPolicy::is_failure_status
    #[error("HTTP status {status} treated as failure")]
    HttpStatus {
        /// The status the server answered with.
        status: StatusCode,
        /// Rate limit information parsed from the failing response's headers.
        rate_limit: Option<RateLimitInfo>,
    },

    /// The body could not be turned into the requested type.
    #[error("{0}")]
    Deserialization(#[from] DeserializationError),

    /// All permitted attempts were used up.
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    NoRetryBudget {
        /// How many attempts were made.
        attempts: usize,
        /// The failure of the final attempt.
        last_error: Box<Error>,
    },

    /// The request was cancelled before it completed.
    #[error("Request was cancelled")]
    Cancelled,

    /// Invalid configuration (bad header name, unusable base URL, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A request body could not be serialized.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns `true` if repeating the request might succeed.
    ///
    /// Transport failures other than TLS and request-construction problems are
    /// retryable, as are `5xx` and `429` statuses. Deserialization failures
    /// never are: the same bytes will fail the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(err) => !matches!(
                err.kind(),
                TransportErrorKind::Tls | TransportErrorKind::Request
            ),
            Error::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::Deserialization(_)
            | Error::NoRetryBudget { .. }
            | Error::Cancelled
            | Error::Configuration(_)
            | Error::InvalidUrl(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Returns `true` for transport failures, including an exhausted retry
    /// budget whose last failure came from the transport.
    pub fn is_transport(&self) -> bool {
        self.transport_error().is_some()
    }

    /// Returns `true` if this is (or wraps) a transport timeout.
    pub fn is_timeout(&self) -> bool {
        self.transport_error()
            .is_some_and(|err| err.kind() == TransportErrorKind::Timeout)
    }

    /// The underlying transport error, looking through [`Error::NoRetryBudget`].
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Error::Transport(err) => Some(err),
            Error::NoRetryBudget { last_error, .. } => last_error.transport_error(),
            _ => None,
        }
    }

    /// The HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            Error::NoRetryBudget { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Rate limit information carried by an [`Error::HttpStatus`].
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        match self {
            Error::HttpStatus { rate_limit, .. } => rate_limit.as_ref(),
            _ => None,
        }
    }

    /// The server-requested wait before retrying, capped at `max_wait`.
    pub fn rate_limit_delay(&self, max_wait: Duration) -> Option<Duration> {
        self.rate_limit_info()?.delay(max_wait)
    }
}

/// A specialized `Result` type for fallible construction APIs.
pub type Result<T> = std::result::Result<T, Error>;
