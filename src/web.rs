//! HTTP control surface: health checks and on-demand sync

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use kubescribe_store::SyncTrigger;

pub const INDEX_BODY: &str = "hello from kubescribe";

#[derive(Clone)]
struct AppState {
    syncer: Arc<dyn SyncTrigger>,
}

pub fn create_router(syncer: Arc<dyn SyncTrigger>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/sync", get(sync).post(sync))
        .with_state(AppState { syncer })
}

async fn index() -> &'static str {
    INDEX_BODY
}

async fn health() -> StatusCode {
    debug!("health check");
    StatusCode::NO_CONTENT
}

async fn ready() -> StatusCode {
    debug!("ready check");
    StatusCode::NO_CONTENT
}

async fn sync(State(state): State<AppState>) -> (StatusCode, String) {
    match state.syncer.sync().await {
        Ok(outcome) => (StatusCode::OK, outcome),
        Err(err) => {
            error!(error = %err, "failed to sync");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to sync: {err}"),
            )
        }
    }
}

/// Serve until the token is cancelled
pub async fn serve(port: u16, syncer: Arc<dyn SyncTrigger>, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!(port, "kubescribe is now listening");

    axum::serve(listener, create_router(syncer))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use kubescribe_store::StoreError;
    use tower::ServiceExt;

    struct FakeSyncer {
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeSyncer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SyncTrigger for FakeSyncer {
        async fn sync(&self) -> Result<String, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StoreError::Git {
                    args: "push origin gh-pages".to_string(),
                    output: "rejected".to_string(),
                })
            } else {
                Ok("sync completed".to_string())
            }
        }
    }

    async fn call(router: Router, method: Method, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let router = create_router(FakeSyncer::new(false));

        let (status, body) = call(router.clone(), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let (status, _) = call(router.clone(), Method::GET, "/ready").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(router, Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, INDEX_BODY);
    }

    #[tokio::test]
    async fn test_sync_get_and_post() {
        let syncer = FakeSyncer::new(false);
        let router = create_router(syncer.clone());

        let (status, body) = call(router.clone(), Method::GET, "/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "sync completed");

        let (status, _) = call(router, Method::POST, "/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(syncer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sync_failure() {
        let router = create_router(FakeSyncer::new(true));

        let (status, body) = call(router, Method::POST, "/sync").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "failed to sync: git push origin gh-pages failed: rejected");
    }

    #[tokio::test]
    async fn test_sync_rejects_other_methods() {
        let router = create_router(FakeSyncer::new(false));
        let (status, _) = call(router, Method::DELETE, "/sync").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
