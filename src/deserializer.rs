//! Content-type keyed deserialization.
//!
//! A [`Deserializer`] turns raw body bytes into a self-describing
//! [`serde_json::Value`]; the registry then binds that value to the target
//! type of the request with serde. Implementations only need to understand
//! their wire format, never the caller's types.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::content;
use crate::error::DeserializationError;

/// Decodes one wire format.
///
/// # Examples
///
/// ```
/// use courier::{DeserializationError, Deserializer, DeserializerRegistry};
/// use serde_json::Value;
///
/// /// Treats every line as an array element.
/// struct Lines;
///
/// impl Deserializer for Lines {
///     fn deserialize(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
///         let text = std::str::from_utf8(bytes)
///             .map_err(|e| DeserializationError::new(e.to_string()))?;
///         Ok(Value::Array(text.lines().map(|l| Value::from(l)).collect()))
///     }
/// }
///
/// let mut registry = DeserializerRegistry::with_defaults();
/// registry.register("text/x-lines", Lines);
///
/// let lines: Vec<String> = registry
///     .deserialize("text/x-lines", b"a\nb")
///     .unwrap()
///     .unwrap();
/// assert_eq!(lines, ["a", "b"]);
/// ```
pub trait Deserializer: Send + Sync {
    /// Parses `bytes` into an intermediate value.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, DeserializationError>;
}

/// `application/json` via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
        serde_json::from_slice(bytes).map_err(|e| DeserializationError::new(e.to_string()))
    }
}

/// `application/x-www-form-urlencoded` into an object of strings.
///
/// A key that appears more than once keeps its last value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormDeserializer;

impl Deserializer for FormDeserializer {
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
        let fields: Map<String, Value> = url::form_urlencoded::parse(bytes)
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect();
        Ok(Value::Object(fields))
    }
}

/// Maps normalized content types to deserializers.
///
/// Keys are bare media types: case is folded and parameters are dropped, so
/// `application/vnd.acme+json; version=1` and `; version=2` share one entry
/// and registering the second replaces the first. Dispatch on a parameter
/// belongs inside the deserializer.
///
/// The registry is filled in before a [`Client`](crate::Client) is built;
/// the client only ever reads it, so lookups need no locking.
#[derive(Clone, Default)]
pub struct DeserializerRegistry {
    entries: HashMap<String, Arc<dyn Deserializer>>,
}

impl DeserializerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with JSON and URL-encoded form support.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(content::JSON, JsonDeserializer);
        registry.register(content::FORM_URLENCODED, FormDeserializer);
        registry
    }

    /// Registers `deserializer` for the media type of `content_type`,
    /// returning the entry it replaced.
    pub fn register<D>(
        &mut self,
        content_type: impl AsRef<str>,
        deserializer: D,
    ) -> Option<Arc<dyn Deserializer>>
    where
        D: Deserializer + 'static,
    {
        self.register_shared(content_type, Arc::new(deserializer))
    }

    /// Registers an already shared deserializer.
    pub fn register_shared(
        &mut self,
        content_type: impl AsRef<str>,
        deserializer: Arc<dyn Deserializer>,
    ) -> Option<Arc<dyn Deserializer>> {
        self.entries
            .insert(content::media_type(content_type.as_ref()), deserializer)
    }

    /// Looks up the deserializer for `content_type`.
    pub fn get(&self, content_type: &str) -> Option<&Arc<dyn Deserializer>> {
        self.entries.get(&content::media_type(content_type))
    }

    /// Whether a deserializer is registered for `content_type`.
    pub fn contains(&self, content_type: &str) -> bool {
        self.get(content_type).is_some()
    }

    /// Number of registered content types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deserializes `bytes` as `content_type` into `T`.
    ///
    /// Returns `None` when no deserializer is registered for the content type.
    pub fn deserialize<T>(
        &self,
        content_type: &str,
        bytes: &[u8],
    ) -> Option<Result<T, DeserializationError>>
    where
        T: DeserializeOwned,
    {
        let deserializer = self.get(content_type)?;
        let result = deserializer.deserialize(bytes).and_then(|value| {
            serde_json::from_value(value).map_err(|e| DeserializationError::new(e.to_string()))
        });
        Some(result.map_err(|e| e.with_content_type(&content::media_type(content_type))))
    }
}

impl fmt::Debug for DeserializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut content_types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        content_types.sort_unstable();
        f.debug_struct("DeserializerRegistry")
            .field("content_types", &content_types)
            .finish()
    }
}
