//! Example demonstrating callbacks, cancellation and the error handler.
//!
//! This example shows how to:
//! - Send requests with completion callbacks
//! - Cancel a request that is in flight
//! - Surface failures through an `ErrorHandler`
//! - Register a deserializer for a custom content type
//!
//! Run with: `cargo run --example callbacks`

use courier::{
    Client, DeserializationError, Deserializer, Error, ErrorHandler, Outcome, Request,
    StandardRetryPolicy,
};
use serde_json::Value;
use std::time::Duration;

/// Shows server failures, ignores everything else.
struct Console;

impl ErrorHandler for Console {
    fn should_surface_error(&self, outcome: &Outcome<'_>) -> bool {
        outcome.status.is_some_and(|status| status.is_server_error())
    }

    fn surface_error(&self, outcome: &Outcome<'_>) {
        eprintln!(
            "!! {} {} failed after {} attempt(s): {}",
            outcome.method,
            outcome.path,
            outcome.attempts,
            self.error_message(outcome)
        );
    }
}

/// Turns `text/csv` rows into arrays of fields.
struct Csv;

impl Deserializer for Csv {
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| DeserializationError::new(e.to_string()))?;
        Ok(Value::Array(
            text.lines()
                .map(|row| Value::Array(row.split(',').map(|f| Value::from(f.trim())).collect()))
                .collect(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("courier=info,callbacks=info")
        .init();

    let client = Client::builder()
        .base_url("https://httpbin.org")?
        .retry_policy(
            StandardRetryPolicy::builder()
                .max_retry_count(2)
                .failure_statuses(500..=599)
                .build(),
        )
        .error_handler(Console)
        .register_deserializer("text/csv", Csv)
        .build()?;

    println!("=== Completion Callback ===");
    let request = Request::<Value>::get("/get")
        .with_param("source", "courier")
        .on_complete(|response| {
            println!(
                "Callback: status {:?}, {} bytes",
                response.status(),
                response.raw_bytes().len()
            );
        });
    client.send(request).await;
    println!();

    println!("=== Server Failure ===");
    let response = client.get::<Value>("/status/503").await;
    println!("Error on response: {:?}", response.error());
    println!();

    println!("=== Cancellation ===");
    let handle = client.send(Request::<Value>::get("/delay/10"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();
    if let Some(response) = handle.await {
        println!("Cancelled: {}", matches!(response.error(), Some(Error::Cancelled)));
    }

    Ok(())
}
