//! HTTP surface for messages a sibling posts back to its owner.
//!
//! `POST /post-message` with the target entrypoint in the `host` header and
//! the encoded value as the body. Responds 204 when delivered, 404 when no
//! handler is registered under that entrypoint, 400 when the body cannot be
//! decoded.

use crate::context::ExecutionContext;
use crate::error::{Result, WorkerError};
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info, warn};

pub fn router(context: Arc<ExecutionContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/post-message", post(handle_post_message))
        .with_state(context)
}

/// Serve [`router`] on `addr` until `shutdown` resolves.
pub async fn serve(
    context: Arc<ExecutionContext>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WorkerError::Config(format!("failed to bind {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| WorkerError::Config(e.to_string()))?;
    info!(%local_addr, "accepting sibling messages");

    axum::serve(listener, router(context))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| WorkerError::Config(format!("inbound server failed: {e}")))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_post_message(
    State(context): State<Arc<ExecutionContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(entrypoint) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };

    match context.receive_message(entrypoint, body.to_vec()) {
        Ok(()) => {
            debug!(%entrypoint, "inbound message delivered");
            StatusCode::NO_CONTENT
        }
        Err(WorkerError::UnknownEntrypoint(_)) => {
            debug!(%entrypoint, "no handler for inbound message");
            StatusCode::NOT_FOUND
        }
        Err(e) => {
            warn!(%entrypoint, error = %e, "rejected inbound message");
            StatusCode::BAD_REQUEST
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobStore;
    use crate::config::SiblingConfig;
    use crate::test_utils::RecordingTransport;
    use axum::body::Body;
    use axum::http::Request;
    use sibling_codec::{Value, encode};
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn context() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(
            Arc::new(RecordingTransport::new()),
            Arc::new(BlobStore::default()),
            SiblingConfig::default(),
        ))
    }

    fn post(host: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/post-message")
            .header("host", host)
            .header("content-type", "application/octet-stream")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_delivers_to_registered_handler() {
        let ctx = context();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        ctx.handlers()
            .register("abc", Arc::new(move |v: Value| sink.lock().unwrap().push(v)));

        let value = Value::object([("message", Value::string("pong"))]);
        let bytes = encode(&value, &[], ctx.hooks()).unwrap().bytes;

        let response = router(ctx).oneshot(post("abc", bytes)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(*received.lock().unwrap(), vec![value]);
    }

    #[tokio::test]
    async fn test_unknown_entrypoint_is_404() {
        let response = router(context())
            .oneshot(post("nobody", vec![0xFF, 15, b'0']))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_400() {
        let ctx = context();
        ctx.handlers().register("abc", Arc::new(|_: Value| {}));
        let response = router(ctx)
            .oneshot(post("abc", vec![0xFF, 14, b'0']))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(context())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
