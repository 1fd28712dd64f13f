//! HttpTransport, Worker and DynamicWorkerApi against a mock control plane.

use serde_json::json;
use sibling_codec::{EncodedValue, Value, decode};
use sibling_worker::transport::SubrequestRequest;
use sibling_worker::{
    BlobStore, ChannelId, DynamicWorkerApi, ExecutionContext, HttpTransport, SiblingConfig,
    SubrequestTransport, Worker, WorkerError, WorkerOptions,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer) -> HttpTransport {
    let base = Url::parse(&server.uri()).unwrap();
    HttpTransport::new(base, Duration::from_secs(5)).unwrap()
}

mod transport_send {
    use super::*;

    #[tokio::test]
    async fn control_channel_maps_to_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/workers"))
            .and(header("content-type", "application/json"))
            .and(body_string("{}"))
            .respond_with(ResponseTemplate::new(201).set_body_string("{\"channel\":1}"))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport(&server)
            .send(
                ChannelId::CONTROL,
                SubrequestRequest::post("workers", "{}")
                    .with_header("content-type", "application/json"),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.text(), "{\"channel\":1}");
    }

    #[tokio::test]
    async fn sibling_channel_maps_to_channel_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/5/post-message"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport(&server)
            .send(ChannelId(5), SubrequestRequest::post("post-message", vec![1u8]))
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn error_status_is_returned_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/abc"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such worker"))
            .mount(&server)
            .await;

        let response = transport(&server)
            .send(ChannelId::CONTROL, SubrequestRequest::delete("abc"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.text(), "no such worker");
    }

    #[tokio::test]
    async fn unreachable_server_is_http_error() {
        let base = Url::parse("http://127.0.0.1:1/").unwrap();
        let transport = HttpTransport::new(base, Duration::from_secs(2)).unwrap();
        let err = transport
            .send(ChannelId::CONTROL, SubrequestRequest::delete("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Http(_)));
    }
}

mod worker_over_http {
    use super::*;

    fn context(server: &MockServer, blobs: Arc<BlobStore>) -> Arc<ExecutionContext> {
        let config = SiblingConfig {
            control_url: server.uri(),
            ..SiblingConfig::default()
        };
        Arc::new(ExecutionContext::new(
            Arc::new(transport(server)),
            blobs,
            config,
        ))
    }

    #[tokio::test]
    async fn spawn_post_terminate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/workers"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"channel": 3})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channels/3/post-message"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let blobs = Arc::new(BlobStore::default());
        let ctx = context(&server, blobs.clone());
        let url = blobs.create_object_url("export default {}");
        let worker = Worker::new(
            ctx.clone(),
            &url,
            WorkerOptions::default().with_type("module"),
        )
        .unwrap();

        worker
            .post_message(&Value::object([("message", Value::string("hello"))]), &[])
            .unwrap();
        worker.post_message(&Value::Int32(2), &[]).unwrap();
        worker.ready().await.unwrap();
        ctx.settle().await;

        worker.terminate();
        worker.terminate();
        ctx.settle().await;

        let requests = server.received_requests().await.unwrap();
        let delete = requests
            .iter()
            .find(|r| r.method.as_str() == "DELETE")
            .unwrap();
        assert_eq!(delete.url.path(), format!("/{}", worker.id()));

        let first_delivery = requests
            .iter()
            .find(|r| r.url.path() == "/channels/3/post-message")
            .unwrap();
        let encoded = EncodedValue::from_wire(first_delivery.body.clone());
        assert!(decode(&encoded, ctx.hooks()).is_ok());
    }

    #[tokio::test]
    async fn creation_failure_rejects_ready_with_body_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/workers"))
            .respond_with(ResponseTemplate::new(400).set_body_string("SyntaxError: bad script"))
            .expect(1)
            .mount(&server)
            .await;

        let blobs = Arc::new(BlobStore::default());
        let ctx = context(&server, blobs.clone());
        let url = blobs.create_object_url("{");
        let worker = Worker::new(ctx.clone(), &url, WorkerOptions::default()).unwrap();

        assert_eq!(
            worker.ready().await.unwrap_err(),
            WorkerError::Transport {
                status: 400,
                message: "SyntaxError: bad script".to_string()
            }
        );
        ctx.settle().await;
        assert!(worker.last_error().is_some());
    }
}

mod dynamic_workers {
    use super::*;
    use reqwest::Method;

    #[tokio::test]
    async fn new_worker_returns_fetcher_bound_to_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/9/workers"))
            .respond_with(ResponseTemplate::new(200).set_body_string("12"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/12/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let api = DynamicWorkerApi::new(Arc::new(transport(&server)), ChannelId(9), "workers");
        let fetcher = api
            .new_worker(json!({"compatibilityDate": "2025-01-01"}))
            .await
            .unwrap();
        assert_eq!(fetcher.channel(), ChannelId(12));

        let response = fetcher.fetch(Method::GET, "status", "").await.unwrap();
        assert_eq!(response.text(), "ok");
    }

    #[tokio::test]
    async fn new_worker_error_status_surfaces_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/9/workers"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let api = DynamicWorkerApi::new(Arc::new(transport(&server)), ChannelId(9), "workers");
        assert_eq!(
            api.new_worker(json!({})).await.unwrap_err(),
            WorkerError::Transport {
                status: 503,
                message: "overloaded".to_string()
            }
        );
    }
}
