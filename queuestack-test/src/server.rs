//! In-process test server

use queuestack_core::ManualClock;
use queuestack_sqs::scheduler::{SweepReport, DEFAULT_SWEEP_INTERVAL};
use queuestack_sqs::{QueueStore, SqsState, StoreConfig, VisibilityScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::QueueStackClient;

/// A broker listening on a random local port
///
/// Time is driven by a [`ManualClock`] and timed-out messages only return to
/// their queues when [`advance`](Self::advance) or [`sweep`](Self::sweep) is
/// called, so visibility tests never sleep.
pub struct TestServer {
    base_url: String,
    store: Arc<QueueStore>,
    clock: Arc<ManualClock>,
    scheduler: VisibilityScheduler,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self, TestError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let base_url = format!("http://{addr}");

        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(QueueStore::new(
            StoreConfig {
                base_url: base_url.clone(),
                ..StoreConfig::default()
            },
            clock.clone(),
        ));
        let scheduler = VisibilityScheduler::new(store.clone(), DEFAULT_SWEEP_INTERVAL);
        let router = queuestack_sqs::routes(Arc::new(SqsState::new(store.clone())));

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!(error = %e, "Test server stopped with error");
            }
        });

        info!(url = %base_url, "Test server started");
        Ok(Self {
            base_url,
            store,
            clock,
            scheduler,
            handle,
        })
    }

    /// Get the base URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Run one visibility sweep at the current clock time
    pub fn sweep(&self) -> SweepReport {
        self.scheduler.sweep()
    }

    /// Move the clock forward, then sweep
    pub fn advance(&self, by: Duration) -> SweepReport {
        self.clock.advance(by);
        self.sweep()
    }

    /// Get a client for the Query protocol
    pub fn client(&self) -> QueueStackClient {
        QueueStackClient::new(self.base_url.clone())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Errors that can occur with test server
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("Failed to start server: {0}")]
    StartFailed(#[from] std::io::Error),
}
