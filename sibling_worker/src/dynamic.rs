//! Programmatic worker creation through a service binding.
//!
//! [`DynamicWorkerApi::new_worker`] posts arbitrary JSON creation arguments to
//! the service's `workers` endpoint. The response body is the decimal id of
//! the new worker's channel, and the returned [`Fetcher`] forwards
//! subrequests to it.

use crate::error::{Result, WorkerError};
use crate::transport::{ChannelId, SubrequestRequest, SubrequestResponse, SubrequestTransport};
use bytes::Bytes;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

pub struct DynamicWorkerApi {
    transport: Arc<dyn SubrequestTransport>,
    service: ChannelId,
    create_path: String,
}

impl DynamicWorkerApi {
    pub fn new(
        transport: Arc<dyn SubrequestTransport>,
        service: ChannelId,
        create_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            service,
            create_path: create_path.into(),
        }
    }

    pub async fn new_worker(&self, args: serde_json::Value) -> Result<Fetcher> {
        let body = serde_json::to_vec(&args)?;
        let request = SubrequestRequest::post(self.create_path.clone(), body)
            .with_header("content-type", "application/json");
        let response = self.transport.send(self.service, request).await?;
        if response.status >= 400 {
            return Err(WorkerError::Transport {
                status: response.status,
                message: response.text(),
            });
        }

        let text = response.text();
        let channel = text
            .trim()
            .parse::<u32>()
            .map_err(|_| WorkerError::InvalidChannel(text.clone()))?;
        let channel = ChannelId::sibling(channel)?;
        debug!(%channel, "dynamic worker created");
        Ok(Fetcher {
            transport: self.transport.clone(),
            channel,
        })
    }
}

/// A subrequest client bound to one channel.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn SubrequestTransport>,
    channel: ChannelId,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: impl Into<Bytes>,
    ) -> Result<SubrequestResponse> {
        self.transport
            .send(self.channel, SubrequestRequest::new(method, path, body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_new_worker_parses_channel() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond_on(ChannelId(9), SubrequestResponse::new(200, "42"));
        let api = DynamicWorkerApi::new(transport.clone(), ChannelId(9), "workers");

        let fetcher = api.new_worker(json!({"mainModule": "a.js"})).await.unwrap();
        assert_eq!(fetcher.channel(), ChannelId(42));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, ChannelId(9));
        assert_eq!(requests[0].1.path, "workers");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&requests[0].1.body).unwrap(),
            json!({"mainModule": "a.js"})
        );
    }

    #[tokio::test]
    async fn test_new_worker_error_body() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond_on(ChannelId(9), SubrequestResponse::new(400, "bad module"));
        let api = DynamicWorkerApi::new(transport, ChannelId(9), "workers");

        assert_eq!(
            api.new_worker(json!({})).await.unwrap_err(),
            WorkerError::Transport {
                status: 400,
                message: "bad module".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_new_worker_rejects_non_numeric_channel() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond_on(ChannelId(9), SubrequestResponse::new(200, "seven"));
        let api = DynamicWorkerApi::new(transport, ChannelId(9), "workers");

        assert!(matches!(
            api.new_worker(json!({})).await,
            Err(WorkerError::InvalidChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_new_worker_rejects_control_channel() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond_on(ChannelId(9), SubrequestResponse::new(200, "0"));
        let api = DynamicWorkerApi::new(transport, ChannelId(9), "workers");

        assert_eq!(
            api.new_worker(json!({})).await.unwrap_err(),
            WorkerError::InvalidChannel("0".to_string())
        );
    }
}
