//! HTTP router for the queuestack broker

use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use queuestack_sqs::{QueueStore, SqsState};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Service state for the main router
pub struct AppState {
    store: Arc<QueueStore>,
    sqs: Arc<SqsState>,
}

impl AppState {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self {
            sqs: Arc::new(SqsState::new(store.clone())),
            store,
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .route("/_localstack/health", get(health_check)) // LocalStack compatibility
        .with_state(shared_state.clone())
        .merge(queuestack_sqs::routes(shared_state.sqs.clone()))
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "services": ["sqs"],
        "queues": state.store.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use queuestack_core::SystemClock;
    use queuestack_sqs::{QueueConfig, StoreConfig};
    use tower::ServiceExt;

    fn state() -> (AppState, Arc<QueueStore>) {
        let store = Arc::new(QueueStore::new(StoreConfig::default(), Arc::new(SystemClock)));
        (AppState::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_health_reports_queue_count() {
        let (state, store) = state();
        store.create_queue("a", QueueConfig::default()).unwrap();
        let app = create_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "running");
        assert_eq!(health["queues"], 1);
    }

    #[tokio::test]
    async fn test_sqs_routes_are_mounted() {
        let (state, _) = state();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("Action=CreateQueue&QueueName=mounted"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
