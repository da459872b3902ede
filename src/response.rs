//! The terminal response envelope and the function that assembles it.
//!
//! A [`Response`] is produced exactly once per request, whatever the outcome,
//! and is the only value handed to the completion callback. It always carries
//! either an [`Output`] or an [`Error`], never both and never neither.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::content::{self, TextEncoding};
use crate::deserializer::DeserializerRegistry;
use crate::error::DeserializationError;
use crate::{Error, Request};

/// What a successful response produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Output<T> {
    /// The body, deserialized into the request's target type.
    Data(T),
    /// No deserializer matched the content type; the decoded body text.
    Text(String),
}

/// Raw material of a finished attempt, as collected by a connection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseParts {
    /// Status, if the response head arrived.
    pub status: Option<StatusCode>,
    /// Response headers (empty if no head arrived).
    pub headers: HeaderMap,
    /// Every body byte received by the attempt.
    pub body: Bytes,
    /// The URL the attempt was sent to, if it got that far.
    pub url: Option<Uri>,
    /// Why the attempt failed, if it did.
    pub error: Option<Error>,
}

/// Client-wide decoding defaults used by [`build_response`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    /// Content type assumed when a response has no `Content-Type` header.
    pub default_content_type: String,
    /// Encoding used when the response declares no recognized charset.
    pub default_encoding: TextEncoding,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            default_content_type: content::AUTOMATIC.to_owned(),
            default_encoding: TextEncoding::Utf8,
        }
    }
}

/// The outcome of a request.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use courier::{build_response, DecodeOptions, DeserializerRegistry, Request, ResponseParts};
/// use http::{HeaderMap, StatusCode};
/// use serde::Deserialize;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct Created {
///     id: u64,
/// }
///
/// let mut headers = HeaderMap::new();
/// headers.insert("content-type", "application/json".parse().unwrap());
///
/// let response = build_response(
///     ResponseParts {
///         status: Some(StatusCode::CREATED),
///         headers,
///         body: Bytes::from_static(br#"{"id":7}"#),
///         url: Some("https://api.example.com/things".parse().unwrap()),
///         error: None,
///     },
///     Arc::new(Request::<Created>::post("/things")),
///     1,
///     Duration::from_millis(12),
///     &DeserializerRegistry::with_defaults(),
///     &DecodeOptions::default(),
/// );
///
/// assert_eq!(response.data(), Some(&Created { id: 7 }));
/// assert_eq!(response.raw_string(), r#"{"id":7}"#);
/// assert!(response.error().is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    status: Option<StatusCode>,
    headers: HeaderMap,
    url: Option<Uri>,
    raw_bytes: Bytes,
    raw_string: String,
    output: Option<Output<T>>,
    request: Arc<Request<T>>,
    error: Option<Error>,
    attempts: usize,
    latency: Duration,
}

impl<T> Response<T> {
    /// The status, if a response head was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The absolute URL the final attempt was sent to.
    ///
    /// `None` when no attempt reached the transport, e.g. the URL could not
    /// be built or the request was cancelled between attempts.
    pub fn url(&self) -> Option<&Uri> {
        self.url.as_ref()
    }

    /// A header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The body exactly as received by the final attempt.
    pub fn raw_bytes(&self) -> &Bytes {
        &self.raw_bytes
    }

    /// The body decoded as text.
    pub fn raw_string(&self) -> &str {
        &self.raw_string
    }

    /// The output, present when there is no error.
    pub fn output(&self) -> Option<&Output<T>> {
        self.output.as_ref()
    }

    /// The deserialized value, if the body was deserialized.
    pub fn data(&self) -> Option<&T> {
        match &self.output {
            Some(Output::Data(data)) => Some(data),
            _ => None,
        }
    }

    /// The decoded text, if no deserializer applied.
    pub fn text(&self) -> Option<&str> {
        match &self.output {
            Some(Output::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// The request this response answers.
    pub fn request(&self) -> &Arc<Request<T>> {
        &self.request
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The attempt number at which the response was finalized (1-based).
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Time from the first attempt starting until finalization.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// `true` when no error is attached.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// `true` if more than one attempt was made.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Consumes the response, returning the output.
    pub fn into_output(self) -> Option<Output<T>> {
        self.output
    }

    /// Consumes the response into the target value.
    ///
    /// Text output is bound to `T` as a JSON string, so `Response<String>`
    /// works for any content type.
    pub fn into_result(self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        match (self.output, self.error) {
            (_, Some(error)) => Err(error),
            (Some(Output::Data(data)), None) => Ok(data),
            (Some(Output::Text(text)), None) => serde_json::from_value(Value::String(text))
                .map_err(|e| {
                    DeserializationError::new(e.to_string())
                        .with_content_type("text/plain")
                        .into()
                }),
            (None, None) => Err(DeserializationError::new("response carries no output").into()),
        }
    }
}

/// Assembles the terminal [`Response`] of a request.
///
/// Pure: the same inputs always give the same response.
///
/// 1. A failed attempt gives an error response without output, unless the
///    failure is a transport error that arrived after a `2xx` head, in which
///    case the body received so far is used.
/// 2. Otherwise the content type (declared, else
///    [`DecodeOptions::default_content_type`], with
///    [`AUTOMATIC`](content::AUTOMATIC) resolved by sniffing the body) selects
///    a deserializer. Its failure becomes [`Error::Deserialization`]; the raw
///    body is kept.
/// 3. Without a deserializer the output is the decoded text.
///
/// Statuses are never turned into errors here.
pub fn build_response<T>(
    parts: ResponseParts,
    request: Arc<Request<T>>,
    attempts: usize,
    latency: Duration,
    registry: &DeserializerRegistry,
    options: &DecodeOptions,
) -> Response<T>
where
    T: DeserializeOwned,
{
    let ResponseParts {
        status,
        headers,
        body,
        url,
        error,
    } = parts;

    let declared = content::declared(&headers);
    let encoding = declared
        .and_then(content::charset)
        .and_then(TextEncoding::from_label)
        .unwrap_or(options.default_encoding);
    let raw_string = encoding.decode(&body);

    let overridden = error.as_ref().is_some_and(|error| {
        error.is_transport() && status.is_some_and(|status| status.is_success())
    });

    let (output, error) = match error {
        Some(error) if !overridden => (None, Some(error)),
        _ => {
            let media_type =
                content::media_type(declared.unwrap_or(options.default_content_type.as_str()));
            let resolved = if media_type == content::AUTOMATIC {
                content::sniff(&body).map(str::to_owned)
            } else {
                Some(media_type)
            };
            match resolved.and_then(|content_type| registry.deserialize::<T>(&content_type, &body))
            {
                Some(Ok(data)) => (Some(Output::Data(data)), None),
                Some(Err(e)) => (None, Some(Error::Deserialization(e))),
                None => (Some(Output::Text(raw_string.clone())), None),
            }
        }
    };

    Response {
        status,
        headers,
        url,
        raw_bytes: body,
        raw_string,
        output,
        request,
        error,
        attempts,
        latency,
    }
}
