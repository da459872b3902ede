//! Request description.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use url::Url;

use crate::content;
use crate::{Error, Response, Result};

/// The HTTP methods a [`Request`] can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl Method {
    /// The method name as sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether params travel in the body rather than the query string.
    pub const fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Delete => http::Method::DELETE,
        }
    }
}

/// Completion callback invoked with the terminal [`Response`].
pub type ResponseHandler<T> = Box<dyn FnOnce(Response<T>) + Send + Sync + 'static>;

/// An HTTP call and the type its response should be deserialized into.
///
/// `T` is the target type: when a deserializer is registered for the
/// response's content type, the body is bound to `T`.
///
/// Once handed to [`Client::send`](crate::Client::send) a request is frozen
/// behind an `Arc` and shared, unchanged, by every attempt.
///
/// # Examples
///
/// ```
/// use courier::{Method, Request};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Page {
///     items: Vec<String>,
/// }
///
/// let request = Request::<Page>::get("/items")
///     .with_param("page", "2")
///     .with_header("Accept", "application/json")?
///     .on_complete(|response| {
///         if let Some(page) = response.data() {
///             println!("{} items", page.items.len());
///         }
///     });
///
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.headers()["accept"], "application/json");
/// # Ok::<(), courier::Error>(())
/// ```
pub struct Request<T> {
    method: Method,
    path: String,
    headers: HeaderMap,
    params: Vec<(String, String)>,
    body_bytes: Option<Bytes>,
    body_string: Option<String>,
    content_type: Option<String>,
    handler: Option<ResponseHandler<T>>,
    target: PhantomData<fn() -> T>,
}

/// Client-wide values the wire form is built against.
pub(crate) struct WireContext<'a> {
    pub(crate) base_url: &'a Url,
    pub(crate) default_headers: &'a HeaderMap,
    pub(crate) default_content_type: &'a str,
}

impl<T> Request<T> {
    /// Creates a request for `path`, relative to the client's base URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            params: Vec::new(),
            body_bytes: None,
            body_string: None,
            content_type: None,
            handler: None,
            target: PhantomData,
        }
    }

    /// A `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// A `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// A `PUT` request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// A `DELETE` request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Sets a header, replacing any earlier value under the same
    /// (case-insensitive) name.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Appends a parameter. For `GET`/`DELETE` it goes into the query string,
    /// for `POST`/`PUT` into the body unless a raw body is set.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Appends several parameters.
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the raw body bytes. They take precedence over a raw body string.
    pub fn with_body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body_bytes = Some(body.into());
        self
    }

    /// Sets the raw body string.
    pub fn with_body_string(mut self, body: impl Into<String>) -> Self {
        self.body_string = Some(body.into());
        self
    }

    /// Serializes `body` as JSON into the raw body and marks the request as
    /// JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `body` cannot be serialized.
    pub fn with_json<B>(mut self, body: &B) -> Result<Self>
    where
        B: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(body).map_err(|e| Error::Serialization(e.to_string()))?;
        self.body_bytes = Some(Bytes::from(bytes));
        self.content_type = Some(content::JSON.to_owned());
        Ok(self)
    }

    /// Overrides the body content type (see [`content`](crate::content)).
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the completion callback. It runs exactly once, with the terminal
    /// response.
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Response<T>) + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// The method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The path as given.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request-specific headers (client defaults not included).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The parameters, in insertion order.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// The raw body bytes, if set.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body_bytes.as_ref()
    }

    /// The raw body string, if set.
    pub fn body_string(&self) -> Option<&str> {
        self.body_string.as_deref()
    }

    /// The explicit body content type, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether a completion callback is attached.
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub(crate) fn take_handler(&mut self) -> Option<ResponseHandler<T>> {
        self.handler.take()
    }

    /// The raw body, bytes winning over the string.
    fn raw_body(&self) -> Option<Bytes> {
        self.body_bytes
            .clone()
            .or_else(|| self.body_string.clone().map(Bytes::from))
    }

    /// Builds the wire form of this request. Called once per attempt.
    pub(crate) fn to_wire(&self, ctx: &WireContext<'_>) -> Result<http::Request<Bytes>> {
        let mut url = resolve_url(ctx.base_url, &self.path)?;
        if !self.method.carries_body() && !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }

        let requested = content::media_type(
            self.content_type
                .as_deref()
                .unwrap_or(ctx.default_content_type),
        );
        let (body, content_type) = match self.raw_body() {
            Some(body) => {
                let content_type = if requested == content::AUTOMATIC {
                    content::sniff(&body).map(str::to_owned)
                } else {
                    self.content_type
                        .clone()
                        .or_else(|| Some(ctx.default_content_type.to_owned()))
                };
                (body, content_type)
            }
            None if self.method.carries_body() && !self.params.is_empty() => {
                encode_params(&self.params, &requested)?
            }
            None => (Bytes::new(), None),
        };

        let mut headers = ctx.default_headers.clone();
        for name in self.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        if let Some(content_type) = content_type {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::try_from(content_type).map_err(|e| {
                    Error::Configuration(format!("Invalid content type: {}", e))
                })?;
                headers.insert(CONTENT_TYPE, value);
            }
        }

        let mut wire = http::Request::builder()
            .method(http::Method::from(self.method))
            .uri(url.as_str())
            .body(body)
            .map_err(|e| Error::Configuration(format!("Failed to build request: {}", e)))?;
        *wire.headers_mut() = headers;
        Ok(wire)
    }
}

fn resolve_url(base: &Url, path: &str) -> Result<Url> {
    let lower = path.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(Url::parse(path)?);
    }

    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(query);
    Ok(url)
}

fn encode_params(params: &[(String, String)], media_type: &str) -> Result<(Bytes, Option<String>)> {
    if media_type == content::JSON {
        let object: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let bytes = serde_json::to_vec(&object).map_err(|e| Error::Serialization(e.to_string()))?;
        return Ok((Bytes::from(bytes), Some(content::JSON.to_owned())));
    }

    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let content_type = if media_type == content::AUTOMATIC {
        content::FORM_URLENCODED.to_owned()
    } else {
        media_type.to_owned()
    };
    Ok((Bytes::from(encoded), Some(content_type)))
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("body_bytes", &self.body_bytes)
            .field("body_string", &self.body_string)
            .field("content_type", &self.content_type)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Compares everything but the completion callback.
impl<T> PartialEq for Request<T> {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.path == other.path
            && self.headers == other.headers
            && self.params == other.params
            && self.body_bytes == other.body_bytes
            && self.body_string == other.body_string
            && self.content_type == other.content_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(request: &Request<()>, default_headers: &HeaderMap) -> http::Request<Bytes> {
        let base = Url::parse("https://api.example.com/v1/").unwrap();
        let ctx = WireContext {
            base_url: &base,
            default_headers,
            default_content_type: content::AUTOMATIC,
        };
        request.to_wire(&ctx).unwrap()
    }

    #[test]
    fn test_get_params_go_to_query() {
        let request = Request::get("/users?active=true").with_param("page", "2");
        let wire = wire(&request, &HeaderMap::new());

        assert_eq!(wire.method(), http::Method::GET);
        assert_eq!(
            wire.uri().to_string(),
            "https://api.example.com/v1/users?active=true&page=2"
        );
        assert!(wire.body().is_empty());
        assert!(wire.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_raw_bytes_win_over_string() {
        let request = Request::post("/upload")
            .with_body_string("from string")
            .with_body_bytes(&b"{\"from\":\"bytes\"}"[..])
            .with_param("ignored", "yes");
        let wire = wire(&request, &HeaderMap::new());

        assert_eq!(wire.body().as_ref(), b"{\"from\":\"bytes\"}");
        assert_eq!(wire.headers()[CONTENT_TYPE], content::JSON);
    }

    #[test]
    fn test_post_params_automatic_is_form() {
        let request = Request::post("login")
            .with_param("user", "ada")
            .with_param("pass", "a&b");
        let wire = wire(&request, &HeaderMap::new());

        assert_eq!(wire.uri().path(), "/v1/login");
        assert_eq!(wire.body().as_ref(), b"user=ada&pass=a%26b");
        assert_eq!(wire.headers()[CONTENT_TYPE], content::FORM_URLENCODED);
    }

    #[test]
    fn test_post_params_as_json() {
        let request = Request::put("/users/1")
            .with_content_type(content::JSON)
            .with_param("name", "Ada");
        let wire = wire(&request, &HeaderMap::new());

        assert_eq!(wire.body().as_ref(), br#"{"name":"Ada"}"#);
        assert_eq!(wire.headers()[CONTENT_TYPE], content::JSON);
    }

    #[test]
    fn test_request_headers_override_defaults_case_insensitively() {
        let mut defaults = HeaderMap::new();
        defaults.insert("x-client", HeaderValue::from_static("default"));
        defaults.insert("user-agent", HeaderValue::from_static("courier"));

        let request = Request::delete("/users/1")
            .with_header("X-Client", "first")
            .unwrap()
            .with_header("x-CLIENT", "second")
            .unwrap();
        let wire = wire(&request, &defaults);

        let values: Vec<_> = wire.headers().get_all("x-client").iter().collect();
        assert_eq!(values, ["second"]);
        assert_eq!(wire.headers()["user-agent"], "courier");
    }

    #[test]
    fn test_absolute_path_bypasses_base() {
        let request = Request::get("https://other.example.org/status");
        let wire = wire(&request, &HeaderMap::new());
        assert_eq!(wire.uri().to_string(), "https://other.example.org/status");
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = Request::<()>::get("/").with_header("bad header", "x");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_equality_ignores_handler() {
        let plain = Request::<()>::get("/a").with_param("k", "v");
        let with_handler = Request::<()>::get("/a")
            .with_param("k", "v")
            .on_complete(|_| {});
        assert_eq!(plain, with_handler);
        assert!(with_handler.has_handler());
    }
}
