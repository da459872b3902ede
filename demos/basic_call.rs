//! Basic example demonstrating simple GET and POST requests.
//!
//! This example shows how to:
//! - Create a client with basic configuration
//! - Await responses for GET and POST requests
//! - Read typed data, raw bodies and metadata from a response
//!
//! Run with: `cargo run --example basic_call`

use courier::{Client, Error, StandardRetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("courier=debug,basic_call=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .timeout(Duration::from_secs(10))
        .retry_policy(StandardRetryPolicy::default())
        .build()?;

    println!("=== GET Request Example ===");
    let response = client.get::<Post>("/posts/1").await;
    match response.data() {
        Some(post) => {
            println!("Post ID: {}", post.id);
            println!("Title: {}", post.title);
        }
        None => println!("No post: {:?}", response.error()),
    }
    println!("Request latency: {:?}", response.latency());
    println!("Status code: {:?}", response.status());
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };
    let response = client.post::<_, Post>("/posts", &new_post).await?;
    println!("Created post: {:?}", response.data());
    println!();

    println!("=== Accessing Response Metadata ===");
    println!("Raw response length: {} bytes", response.raw_bytes().len());
    println!("Content-Type: {:?}", response.header("content-type"));
    println!("Attempts: {}", response.attempts());

    let post = response.into_result()?;
    println!("Title via into_result: {}", post.title);

    Ok(())
}
