//! Common test utilities for driving the status API in-process.
//!
//! The router is built around a `watch` channel, either fed by hand with a
//! snapshot or subscribed to an orchestrator running against mocks.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use opensite_core::testing::{MockCpuHandler, MockDownloader, MockUnzipper};
use opensite_core::{Config, Orchestrator, OrchestratorConfig, RunOutcome, RunSnapshot, Tree};
use opensite_server::api::create_router;
use opensite_server::state::AppState;

/// Re-export fixtures for test convenience
pub use opensite_core::testing::fixtures;

/// In-process status API.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() {
///     let fixture = TestFixture::new();
///     let response = fixture.get("/api/v1/health").await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    /// Sender kept alive so the router always sees a snapshot.
    _status: Option<watch::Sender<RunSnapshot>>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture with default config and an empty snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(Config::default(), RunSnapshot::default())
    }

    /// Fixture serving a fixed snapshot.
    pub fn with_snapshot(config: Config, snapshot: RunSnapshot) -> Self {
        let (tx, rx) = watch::channel(snapshot);
        let state = Arc::new(AppState::new(config, rx));
        Self {
            router: create_router(state),
            _status: Some(tx),
        }
    }

    /// Run `tree` to the end against mock collaborators and serve the
    /// orchestrator's final snapshot.
    pub async fn after_run(
        tree: &mut Tree,
        downloader: Arc<MockDownloader>,
    ) -> (Self, RunOutcome) {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default()
                .with_cpu_workers(2)
                .with_poll_interval_ms(20)
                .with_yield_ms(1),
            downloader,
            Arc::new(MockUnzipper::new()),
            Arc::new(MockCpuHandler::new()),
        );
        let state = Arc::new(AppState::new(Config::default(), orchestrator.subscribe()));

        let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(tree))
            .await
            .expect("run finished in time")
            .expect("run succeeded");

        let fixture = Self {
            router: create_router(state),
            _status: None,
        };
        (fixture, outcome)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        TestResponse { status, body }
    }
}
