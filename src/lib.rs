//! # Courier - the request lifecycle core of an HTTP client
//!
//! Courier issues HTTP requests, retries failed attempts under a pluggable
//! policy, turns response bytes into typed values through a content-type
//! keyed deserializer registry, and hands every caller the same [`Response`]
//! envelope whether the request succeeded or not.
//!
//! ## Quick Start
//!
//! ```no_run
//! use courier::{Client, Request, StandardRetryPolicy};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateUser {
//!     name: String,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), courier::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .timeout(Duration::from_secs(30))
//!         .retry_policy(StandardRetryPolicy::default())
//!         .build()?;
//!
//!     // Await a response
//!     let user = client.get::<User>("/users/123").await;
//!     println!("User: {:?} in {:?}", user.data(), user.latency());
//!
//!     // Or fire and forget with a completion callback
//!     let request = Request::<User>::post("/users")
//!         .with_json(&CreateUser { name: "Alice".to_string() })?
//!         .on_complete(|response| match response.error() {
//!             Some(error) => eprintln!("Create failed: {}", error),
//!             None => println!("Created: {:?}", response.data()),
//!         });
//!     client.send(request).await;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//!
//! Each attempt is a fresh connection over the [`Transport`]. A failed
//! attempt is offered to the [`RetryPolicy`]; when the sequence ends the
//! [`build_response`] function assembles the terminal [`Response`], the
//! [`ErrorHandler`] may surface a failure, and the request's completion
//! callback runs exactly once.
//!
//! ## Error Handling
//!
//! Failures travel on the response rather than as an early return, and the
//! raw body is always kept:
//!
//! ```no_run
//! use courier::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! let response = client.get::<serde_json::Value>("/endpoint").await;
//! match response.error() {
//!     None => println!("Success: {:?}", response.output()),
//!     Some(Error::Deserialization(e)) => {
//!         eprintln!("Failed to deserialize {}: {}", e.content_type(), e.message());
//!         eprintln!("  Raw response: {}", response.raw_string());
//!     }
//!     Some(Error::NoRetryBudget { attempts, last_error }) => {
//!         eprintln!("Gave up after {} attempts: {}", attempts, last_error);
//!     }
//!     Some(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
pub mod content;
mod deserializer;
mod error;
mod handler;
pub mod rate_limit;
mod request;
mod response;
pub mod retry;
mod transport;

pub use client::{Client, ClientBuilder, RequestHandle};
pub use content::TextEncoding;
pub use deserializer::{Deserializer, DeserializerRegistry, FormDeserializer, JsonDeserializer};
pub use error::{DeserializationError, Error, Result, TransportError, TransportErrorKind};
pub use handler::{ErrorHandler, NoopErrorHandler, Outcome};
pub use request::{Method, Request, ResponseHandler};
pub use response::{build_response, DecodeOptions, Output, Response, ResponseParts};
pub use retry::{Backoff, NoRetry, RetryPolicy, RetryPredicate, StandardRetryPolicy};
pub use transport::{ReqwestTransport, Transport, TransportEvent, TransportStream};
