//! Error surfacing hooks.
//!
//! Every terminal response is shown to the client's [`ErrorHandler`], which
//! decides whether it should be surfaced (shown to a user, paged, ...).
//! Statuses are not errors on the response, so this is where a `500` with a
//! decoded body becomes a user-facing failure. Presentation is up to the
//! application; the defaults surface nothing.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};

use crate::{Error, Method, Response};

/// A finished response, independent of its target type.
#[derive(Debug, Clone, Copy)]
pub struct Outcome<'a> {
    /// Method of the request.
    pub method: Method,
    /// Path of the request.
    pub path: &'a str,
    /// URL of the final attempt, if one reached the transport.
    pub url: Option<&'a Uri>,
    /// Status of the final attempt, if a head arrived.
    pub status: Option<StatusCode>,
    /// Response headers.
    pub headers: &'a HeaderMap,
    /// The body as received.
    pub raw_bytes: &'a Bytes,
    /// The body decoded as text.
    pub raw_string: &'a str,
    /// The error on the response, if any.
    pub error: Option<&'a Error>,
    /// Attempts made.
    pub attempts: usize,
}

impl<'a> Outcome<'a> {
    /// The type-erased view of `response`.
    pub fn from_response<T>(response: &'a Response<T>) -> Self {
        Self {
            method: response.request().method(),
            path: response.request().path(),
            url: response.url(),
            status: response.status(),
            headers: response.headers(),
            raw_bytes: response.raw_bytes(),
            raw_string: response.raw_string(),
            error: response.error(),
            attempts: response.attempts(),
        }
    }

    /// `true` if the response carries an error or a `4xx`/`5xx` status.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
            || self
                .status
                .is_some_and(|s| s.is_client_error() || s.is_server_error())
    }
}

/// Application hook for finished responses.
///
/// # Examples
///
/// ```
/// use courier::{ErrorHandler, Outcome};
///
/// struct SurfaceServerErrors;
///
/// impl ErrorHandler for SurfaceServerErrors {
///     fn should_surface_error(&self, outcome: &Outcome<'_>) -> bool {
///         outcome.status.is_some_and(|s| s.is_server_error())
///     }
///
///     fn error_title(&self, _outcome: &Outcome<'_>) -> Option<String> {
///         Some("Server unavailable".to_string())
///     }
/// }
/// ```
pub trait ErrorHandler: Send + Sync {
    /// Whether `outcome` should be surfaced at all.
    fn should_surface_error(&self, _outcome: &Outcome<'_>) -> bool {
        false
    }

    /// Title for a surfaced outcome.
    fn error_title(&self, _outcome: &Outcome<'_>) -> Option<String> {
        None
    }

    /// Message for a surfaced outcome: the error, else the body text, else
    /// the status reason.
    fn error_message(&self, outcome: &Outcome<'_>) -> String {
        if let Some(error) = outcome.error {
            return error.to_string();
        }
        if !outcome.raw_string.trim().is_empty() {
            return outcome.raw_string.to_owned();
        }
        outcome
            .status
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Request failed")
            .to_owned()
    }

    /// Surfaces `outcome`. The default logs it.
    fn surface_error(&self, outcome: &Outcome<'_>) {
        let title = self
            .error_title(outcome)
            .unwrap_or_else(|| "Request failed".to_string());
        tracing::warn!(
            title = %title,
            message = %self.error_message(outcome),
            method = %outcome.method,
            path = %outcome.path,
            status = ?outcome.status,
            attempts = outcome.attempts,
            "Surfacing request error"
        );
    }
}

/// Surfaces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopErrorHandler;

impl ErrorHandler for NoopErrorHandler {}
