//! Test helpers shared by unit and integration tests.

use crate::error::{Result, WorkerError};
use crate::transport::{ChannelId, SubrequestRequest, SubrequestResponse, SubrequestTransport};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Method;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use tokio::sync::watch;

/// In-memory transport that records every request and answers like a
/// well-behaved control plane:
///
/// - `POST` on the control channel: 201 `{"channel": n, "name": "sibling-n"}`
///   with `n` counting up from 1, unless overridden or held.
/// - any other control request: 200, empty body.
/// - any other channel: the delivery status (204 by default), empty body.
///
/// Requests are recorded before they are answered, so a held creation is
/// already visible in [`requests`](RecordingTransport::requests).
pub struct RecordingTransport {
    requests: Mutex<Vec<(ChannelId, SubrequestRequest)>>,
    request_count: watch::Sender<usize>,
    next_channel: AtomicU32,
    creation_open: watch::Sender<bool>,
    creation_response: Mutex<Option<SubrequestResponse>>,
    delivery_status: AtomicU16,
    fixed: DashMap<ChannelId, SubrequestResponse>,
    failures: DashMap<ChannelId, WorkerError>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            request_count: watch::Sender::new(0),
            next_channel: AtomicU32::new(1),
            creation_open: watch::Sender::new(true),
            creation_response: Mutex::new(None),
            delivery_status: AtomicU16::new(204),
            fixed: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Hold creation responses until [`release_creation`](Self::release_creation).
    pub fn hold_creation(&self) {
        self.creation_open.send_replace(false);
    }

    pub fn release_creation(&self) {
        self.creation_open.send_replace(true);
    }

    /// Answer creation requests with `response` instead of a new channel.
    pub fn set_creation_response(&self, response: SubrequestResponse) {
        *lock(&self.creation_response) = Some(response);
    }

    pub fn set_delivery_status(&self, status: u16) {
        self.delivery_status.store(status, Ordering::SeqCst);
    }

    /// Answer every request on `channel` with `response`.
    pub fn respond_on(&self, channel: ChannelId, response: SubrequestResponse) {
        self.fixed.insert(channel, response);
    }

    /// Fail every request on `channel` with `error`.
    pub fn fail_on(&self, channel: ChannelId, error: WorkerError) {
        self.failures.insert(channel, error);
    }

    pub fn requests(&self) -> Vec<(ChannelId, SubrequestRequest)> {
        lock(&self.requests).clone()
    }

    pub fn creation_requests(&self) -> Vec<SubrequestRequest> {
        self.control_requests(Method::POST)
    }

    pub fn teardowns(&self) -> Vec<SubrequestRequest> {
        self.control_requests(Method::DELETE)
    }

    pub fn deliveries(&self) -> Vec<(ChannelId, SubrequestRequest)> {
        self.requests()
            .into_iter()
            .filter(|(channel, _)| !channel.is_control())
            .collect()
    }

    /// Wait until at least `count` requests have been recorded.
    pub async fn wait_for_requests(&self, count: usize) {
        let mut rx = self.request_count.subscribe();
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }

    fn control_requests(&self, method: Method) -> Vec<SubrequestRequest> {
        self.requests()
            .into_iter()
            .filter(|(channel, request)| channel.is_control() && request.method == method)
            .map(|(_, request)| request)
            .collect()
    }
}

#[async_trait]
impl SubrequestTransport for RecordingTransport {
    async fn send(
        &self,
        channel: ChannelId,
        request: SubrequestRequest,
    ) -> Result<SubrequestResponse> {
        let is_creation = channel.is_control() && request.method == Method::POST;
        {
            let mut requests = lock(&self.requests);
            requests.push((channel, request));
            self.request_count.send_replace(requests.len());
        }

        if let Some(error) = self.failures.get(&channel) {
            return Err(error.clone());
        }
        if let Some(response) = self.fixed.get(&channel) {
            return Ok(response.clone());
        }

        if is_creation {
            let mut open = self.creation_open.subscribe();
            let _ = open.wait_for(|open| *open).await;
            if let Some(response) = lock(&self.creation_response).clone() {
                return Ok(response);
            }
            let n = self.next_channel.fetch_add(1, Ordering::SeqCst);
            let body = serde_json::json!({"channel": n, "name": format!("sibling-{n}")});
            return Ok(SubrequestResponse::new(201, body.to_string()));
        }
        if channel.is_control() {
            return Ok(SubrequestResponse::new(200, ""));
        }
        Ok(SubrequestResponse::new(
            self.delivery_status.load(Ordering::SeqCst),
            "",
        ))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
