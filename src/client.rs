//! The client: runs requests through connections, retries and the response
//! builder.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::{
    connection::{Attempt, Connection, ConnectionState},
    content::{self, TextEncoding},
    deserializer::{Deserializer, DeserializerRegistry},
    handler::{ErrorHandler, NoopErrorHandler, Outcome},
    request::WireContext,
    response::{build_response, DecodeOptions},
    retry::{NoRetry, RetryPolicy},
    transport::{ReqwestTransport, Transport},
    Error, Request, Response, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// An HTTP client that drives requests through their whole lifecycle.
///
/// The client is designed to be reused across many requests; cloning it is
/// cheap and clones share the same transport, policy and registry.
///
/// # Examples
///
/// ```no_run
/// use courier::{Backoff, Client, Request, StandardRetryPolicy};
/// use serde::Deserialize;
/// use std::time::Duration;
///
/// #[derive(Debug, Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), courier::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .retry_policy(
///         StandardRetryPolicy::builder()
///             .max_retry_count(3)
///             .backoff(Backoff::Exponential {
///                 initial_delay: Duration::from_millis(100),
///                 max_delay: Duration::from_secs(10),
///                 jitter: true,
///             })
///             .build(),
///     )
///     .build()?;
///
/// // Await the response directly
/// let user = client.get::<User>("/users/123").await;
/// println!("User: {:?} after {} attempt(s)", user.data(), user.attempts());
///
/// // Or hand it to a callback
/// let handle = client.send(
///     Request::<User>::get("/users/456").on_complete(|response| {
///         println!("Finished with status {:?}", response.status());
///     }),
/// );
/// handle.await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: HeaderMap,
    request_content_type: String,
    decode: DecodeOptions,
    registry: Arc<DeserializerRegistry>,
    retry_policy: Arc<dyn RetryPolicy>,
    error_handler: Arc<dyn ErrorHandler>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use courier::Client;
    ///
    /// # fn example() -> Result<(), courier::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The URL request paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The registry responses are deserialized with.
    pub fn registry(&self) -> &DeserializerRegistry {
        &self.inner.registry
    }

    /// Starts `request` on the tokio runtime and returns at once.
    ///
    /// The request's completion callback runs exactly once, on the spawned
    /// task, when the lifecycle ends. Dropping the handle does not cancel the
    /// request.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn send<T>(&self, request: Request<T>) -> RequestHandle<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let client = self.clone();
        let task = tokio::spawn(async move { client.complete(request, &token).await });
        RequestHandle { task, cancel }
    }

    /// Runs `request` to completion in the current task.
    ///
    /// If the request has a completion callback it receives the response and
    /// `None` is returned; otherwise the response is returned.
    pub async fn execute<T>(&self, request: Request<T>) -> Option<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.complete(request, &CancellationToken::new()).await
    }

    /// Makes a GET request to the specified path.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use courier::Client;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct User { name: String }
    ///
    /// # async fn example() -> Result<(), courier::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let user = client.get::<User>("/users/123").await.into_result()?;
    /// println!("User: {}", user.name);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<T>(&self, path: impl Into<String>) -> Response<T>
    where
        T: DeserializeOwned,
    {
        self.drive(Arc::new(Request::get(path)), &CancellationToken::new())
            .await
    }

    /// Makes a POST request to the specified path with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `body` cannot be serialized.
    /// Failures of the request itself are carried on the response.
    pub async fn post<B, T>(&self, path: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Request::post(path).with_json(body)?;
        Ok(self.drive(Arc::new(request), &CancellationToken::new()).await)
    }

    /// Makes a PUT request to the specified path with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `body` cannot be serialized.
    pub async fn put<B, T>(&self, path: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Request::put(path).with_json(body)?;
        Ok(self.drive(Arc::new(request), &CancellationToken::new()).await)
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete<T>(&self, path: impl Into<String>) -> Response<T>
    where
        T: DeserializeOwned,
    {
        self.drive(Arc::new(Request::delete(path)), &CancellationToken::new())
            .await
    }

    /// Drives the request, then hands the response to its callback.
    async fn complete<T>(
        &self,
        mut request: Request<T>,
        cancel: &CancellationToken,
    ) -> Option<Response<T>>
    where
        T: DeserializeOwned,
    {
        let handler = request.take_handler();
        let response = self.drive(Arc::new(request), cancel).await;
        match handler {
            Some(handler) => {
                handler(response);
                None
            }
            None => Some(response),
        }
    }

    /// Runs attempts until one succeeds or the sequence ends, and builds the
    /// terminal response.
    async fn drive<T>(&self, request: Arc<Request<T>>, cancel: &CancellationToken) -> Response<T>
    where
        T: DeserializeOwned,
    {
        let inner = &*self.inner;
        let policy = inner.retry_policy.as_ref();
        let max_attempts = policy.max_retry_count().max(1);
        let ctx = WireContext {
            base_url: &inner.base_url,
            default_headers: &inner.default_headers,
            default_content_type: &inner.request_content_type,
        };
        let start_time = Instant::now();
        let mut number = 0;

        let terminal = loop {
            number += 1;
            let connection = Connection::new(Arc::clone(&request), number);
            let attempt = match request.to_wire(&ctx) {
                Ok(wire) => {
                    connection
                        .run(inner.transport.as_ref(), wire, policy, inner.timeout, cancel)
                        .await
                }
                Err(error) => connection.abort(error),
            };

            let error = match attempt.error() {
                Some(error) if attempt.state == ConnectionState::Failed => error,
                _ => break attempt,
            };
            tracing::warn!(
                error = %error,
                attempt = number,
                method = %request.method(),
                path = %request.path(),
                "Request failed"
            );

            if matches!(error, Error::Cancelled) {
                break attempt;
            }
            if number >= max_attempts {
                break if max_attempts > 1 {
                    attempt.exhausted()
                } else {
                    attempt
                };
            }
            if !policy.should_retry(error, number) {
                break attempt;
            }

            let delay = policy.retry_delay(error, number);
            if !delay.is_zero() {
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = number,
                    "Retrying request after delay"
                );
            }
            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                break Attempt::cancelled(number, attempt.parts.url);
            }
        };

        let latency = start_time.elapsed();
        let response = build_response(
            terminal.parts,
            request,
            terminal.number,
            latency,
            &inner.registry,
            &inner.decode,
        );

        match response.error() {
            Some(Error::Deserialization(e)) => tracing::error!(
                error = %e,
                raw_response = %response.raw_string(),
                "Failed to deserialize response"
            ),
            _ => tracing::info!(
                status = ?response.status(),
                latency_ms = latency.as_millis() as u64,
                attempts = response.attempts(),
                "Received HTTP response"
            ),
        }

        let outcome = Outcome::from_response(&response);
        if inner.error_handler.should_surface_error(&outcome) {
            inner.error_handler.surface_error(&outcome);
        }
        response
    }
}

/// A request started with [`Client::send`].
///
/// Awaiting the handle yields the response, or `None` if the request's
/// completion callback consumed it.
#[derive(Debug)]
pub struct RequestHandle<T> {
    task: JoinHandle<Option<Response<T>>>,
    cancel: CancellationToken,
}

impl<T> RequestHandle<T> {
    /// Cancels the request. The pending attempt fails with
    /// [`Error::Cancelled`] and no retry follows.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this request when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the lifecycle, including the callback, has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for RequestHandle<T> {
    type Output = Option<Response<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(response)) => Poll::Ready(response),
            Poll::Ready(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use courier::{content, ClientBuilder, StandardRetryPolicy, TextEncoding};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), courier::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .retry_policy(StandardRetryPolicy::default())
///     .request_content_type(content::FORM_URLENCODED)
///     .text_encoding(TextEncoding::Latin1)
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    retry_policy: Arc<dyn RetryPolicy>,
    error_handler: Arc<dyn ErrorHandler>,
    registry: DeserializerRegistry,
    request_content_type: String,
    decode: DecodeOptions,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    ///
    /// Defaults: no retries, JSON and form deserializers, `automatic`
    /// request and response content types, UTF-8 text, no timeout.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            transport: None,
            retry_policy: Arc::new(NoRetry),
            error_handler: Arc::new(NoopErrorHandler),
            registry: DeserializerRegistry::with_defaults(),
            request_content_type: content::AUTOMATIC.to_owned(),
            decode: DecodeOptions::default(),
        }
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the default [`ReqwestTransport`].
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the retry policy. Defaults to [`NoRetry`].
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    /// Sets the error handler. Defaults to [`NoopErrorHandler`].
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Registers a deserializer for `content_type`, replacing any previous
    /// one.
    pub fn register_deserializer(
        mut self,
        content_type: impl AsRef<str>,
        deserializer: impl Deserializer + 'static,
    ) -> Self {
        self.registry.register(content_type, deserializer);
        self
    }

    /// Replaces the whole registry.
    pub fn registry(mut self, registry: DeserializerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Content type used for request bodies that do not set their own.
    pub fn request_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.request_content_type = content_type.into();
        self
    }

    /// Content type assumed for responses without a `Content-Type` header.
    pub fn response_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.decode.default_content_type = content_type.into();
        self
    }

    /// Encoding used when a response declares no recognized charset.
    pub fn text_encoding(mut self, encoding: TextEncoding) -> Self {
        self.decode.default_encoding = encoding;
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or if the default
    /// transport cannot be created.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Configuration("Base URL is required".to_string()))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                default_headers: self.default_headers,
                request_content_type: self.request_content_type,
                decode: self.decode,
                registry: Arc::new(self.registry),
                retry_policy: self.retry_policy,
                error_handler: self.error_handler,
                timeout: self.timeout,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
