//! The transport seam.
//!
//! A [`Transport`] moves one wire request and reports what happens as a
//! stream of [`TransportEvent`]s. Sockets, TLS and redirects all live behind
//! it. Dropping the stream cancels whatever work is still in flight.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, StatusCode};

use crate::error::{TransportError, TransportErrorKind};
use crate::{Error, Result};

/// One step of a transport attempt.
///
/// A well-behaved transport yields at most one `Head`, any number of `Data`
/// chunks, and exactly one of `Completed` or `Failed` as its final item.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Status line and headers arrived.
    Head {
        /// The response status.
        status: StatusCode,
        /// The response headers.
        headers: HeaderMap,
    },
    /// A chunk of the body, in delivery order.
    Data(Bytes),
    /// The response finished.
    Completed,
    /// The attempt failed.
    Failed(TransportError),
}

/// The event stream for a single attempt.
pub type TransportStream = BoxStream<'static, TransportEvent>;

/// Sends wire requests.
///
/// # Examples
///
/// A transport that answers every request locally:
///
/// ```
/// use bytes::Bytes;
/// use courier::{Transport, TransportEvent, TransportStream};
/// use futures::stream::{self, StreamExt};
/// use http::{HeaderMap, StatusCode};
///
/// struct Canned;
///
/// impl Transport for Canned {
///     fn open(&self, _request: http::Request<Bytes>) -> TransportStream {
///         stream::iter([
///             TransportEvent::Head { status: StatusCode::OK, headers: HeaderMap::new() },
///             TransportEvent::Data(Bytes::from_static(b"pong")),
///             TransportEvent::Completed,
///         ])
///         .boxed()
///     }
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Starts transmitting `request`.
    fn open(&self, request: http::Request<Bytes>) -> TransportStream;
}

/// The default transport, backed by `reqwest`.
///
/// The body is streamed chunk by chunk as reqwest receives it.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    /// Wraps an existing, already configured `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

enum Progress {
    Pending(reqwest::Client, reqwest::Request),
    Receiving(reqwest::Response),
    Done,
}

impl Transport for ReqwestTransport {
    fn open(&self, request: http::Request<Bytes>) -> TransportStream {
        let request = match reqwest::Request::try_from(request) {
            Ok(request) => request,
            Err(e) => {
                let error = TransportError::new(TransportErrorKind::Request, e.to_string());
                return stream::iter([TransportEvent::Failed(error)]).boxed();
            }
        };

        stream::unfold(
            Progress::Pending(self.client.clone(), request),
            |progress| async move {
                match progress {
                    Progress::Pending(client, request) => match client.execute(request).await {
                        Ok(response) => {
                            let head = TransportEvent::Head {
                                status: response.status(),
                                headers: response.headers().clone(),
                            };
                            Some((head, Progress::Receiving(response)))
                        }
                        Err(e) => Some((TransportEvent::Failed(classify(&e)), Progress::Done)),
                    },
                    Progress::Receiving(mut response) => match response.chunk().await {
                        Ok(Some(chunk)) => {
                            Some((TransportEvent::Data(chunk), Progress::Receiving(response)))
                        }
                        Ok(None) => Some((TransportEvent::Completed, Progress::Done)),
                        Err(e) => Some((TransportEvent::Failed(classify(&e)), Progress::Done)),
                    },
                    Progress::Done => None,
                }
            },
        )
        .boxed()
    }
}

fn classify(error: &reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else if error.is_body() || error.is_decode() {
        TransportErrorKind::Body
    } else if error.is_request() || error.is_builder() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, error.to_string())
}
