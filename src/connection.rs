//! A single attempt at transmitting a request.
//!
//! ```text
//! Created ──begin──▶ Sending ──Completed──▶ Succeeded
//!                       │
//!                       └──Failed / cancel / timeout / failure status──▶ Failed
//! ```
//!
//! Terminal states are final: once a connection has succeeded or failed,
//! further transport events are ignored. Retries never reuse a connection.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, StatusCode, Uri};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{TransportError, TransportErrorKind};
use crate::rate_limit::RateLimitInfo;
use crate::response::ResponseParts;
use crate::retry::RetryPolicy;
use crate::transport::{Transport, TransportEvent};
use crate::{Error, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Created,
    Sending,
    Succeeded,
    Failed,
}

pub(crate) struct Connection<T> {
    request: Arc<Request<T>>,
    attempt: usize,
    state: ConnectionState,
    buffer: BytesMut,
    head: Option<(StatusCode, HeaderMap)>,
    url: Option<Uri>,
    error: Option<Error>,
}

/// Snapshot of a connection in a terminal state.
#[derive(Debug)]
pub(crate) struct Attempt {
    pub(crate) state: ConnectionState,
    pub(crate) number: usize,
    pub(crate) parts: ResponseParts,
}

impl Attempt {
    pub(crate) fn error(&self) -> Option<&Error> {
        self.parts.error.as_ref()
    }

    /// Wraps the failure in [`Error::NoRetryBudget`].
    pub(crate) fn exhausted(mut self) -> Self {
        if let Some(last_error) = self.parts.error.take() {
            self.parts.error = Some(Error::NoRetryBudget {
                attempts: self.number,
                last_error: Box::new(last_error),
            });
        }
        self
    }

    /// The outcome of a cancellation that arrived between attempts. `url`
    /// is where the previous attempt went.
    pub(crate) fn cancelled(number: usize, url: Option<Uri>) -> Self {
        Self {
            state: ConnectionState::Failed,
            number,
            parts: ResponseParts {
                url,
                error: Some(Error::Cancelled),
                ..ResponseParts::default()
            },
        }
    }
}

enum Step {
    Cancelled,
    TimedOut,
    Event(Option<TransportEvent>),
}

fn protocol_error(message: &str) -> Error {
    TransportError::new(TransportErrorKind::Protocol, message).into()
}

impl<T> Connection<T> {
    pub(crate) fn new(request: Arc<Request<T>>, attempt: usize) -> Self {
        Self {
            request,
            attempt,
            state: ConnectionState::Created,
            buffer: BytesMut::new(),
            head: None,
            url: None,
            error: None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Succeeded | ConnectionState::Failed
        )
    }

    pub(crate) fn begin(&mut self) {
        if self.state == ConnectionState::Created {
            self.state = ConnectionState::Sending;
        }
    }

    /// Applies one transport event. Only a sending connection reacts.
    pub(crate) fn receive(&mut self, event: TransportEvent, policy: &dyn RetryPolicy) {
        if self.state != ConnectionState::Sending {
            return;
        }
        match event {
            TransportEvent::Head { status, headers } => self.head = Some((status, headers)),
            TransportEvent::Data(chunk) => self.buffer.extend_from_slice(&chunk),
            TransportEvent::Completed => {
                let outcome = match &self.head {
                    Some((status, headers)) if policy.is_failure_status(*status) => {
                        Err(Error::HttpStatus {
                            status: *status,
                            rate_limit: RateLimitInfo::active(headers),
                        })
                    }
                    Some(_) => Ok(()),
                    None => Err(protocol_error("transport completed without a response head")),
                };
                match outcome {
                    Ok(()) => self.state = ConnectionState::Succeeded,
                    Err(error) => self.fail(error),
                }
            }
            TransportEvent::Failed(error) => self.fail(error.into()),
        }
    }

    pub(crate) fn fail(&mut self, error: Error) {
        if self.is_terminal() {
            return;
        }
        self.error = Some(error);
        self.state = ConnectionState::Failed;
    }

    /// Drives the attempt until it reaches a terminal state.
    pub(crate) async fn run(
        mut self,
        transport: &dyn Transport,
        wire: http::Request<Bytes>,
        policy: &dyn RetryPolicy,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Attempt {
        self.begin();
        tracing::debug!(
            method = %self.request.method(),
            url = %wire.uri(),
            attempt = self.attempt,
            "Executing HTTP request"
        );

        self.url = Some(wire.uri().clone());
        let mut events = transport.open(wire);
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        while !self.is_terminal() {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = &mut deadline => Step::TimedOut,
                event = events.next() => Step::Event(event),
            };
            match step {
                Step::Cancelled => self.fail(Error::Cancelled),
                Step::TimedOut => self.fail(
                    TransportError::timeout(format!(
                        "no response within {:?}",
                        timeout.unwrap_or_default()
                    ))
                    .into(),
                ),
                Step::Event(Some(event)) => self.receive(event, policy),
                Step::Event(None) => {
                    self.fail(protocol_error("transport stream ended before completion"))
                }
            }
        }
        drop(events);
        self.finish()
    }

    /// Fails the attempt before anything was sent.
    pub(crate) fn abort(mut self, error: Error) -> Attempt {
        self.begin();
        self.fail(error);
        self.finish()
    }

    pub(crate) fn finish(mut self) -> Attempt {
        if !self.is_terminal() {
            self.fail(protocol_error("connection released before completion"));
        }
        let (status, headers) = match self.head {
            Some((status, headers)) => (Some(status), headers),
            None => (None, HeaderMap::new()),
        };
        Attempt {
            state: self.state,
            number: self.attempt,
            parts: ResponseParts {
                status,
                headers,
                body: self.buffer.freeze(),
                url: self.url,
                error: self.error,
            },
        }
    }
}
