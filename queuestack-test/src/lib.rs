//! Test utilities for queuestack
//!
//! Provides utilities for integration testing with queuestack:
//! - Start the broker in-process on a random port
//! - Drive visibility timeouts with a manual clock
//! - A Query protocol client
//!
//! ## Usage
//!
//! ```rust,no_run
//! use queuestack_test::TestServer;
//!
//! #[tokio::test]
//! async fn test_queue() {
//!     let server = TestServer::start().await.unwrap();
//!     let client = server.client();
//!
//!     let url = client.create_queue("orders").await.unwrap();
//!     client.send_message(&url, "hello").await.unwrap();
//! }
//! ```

pub mod client;
pub mod server;

pub use client::{ClientError, QueuePage, QueueStackClient, Receive, SendResult, SqsMessage};
pub use server::{TestError, TestServer};

/// Route broker logs to the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
