//! Request/response transport between a host and its siblings.
//!
//! Every exchange is addressed to a [`ChannelId`]: the control channel for
//! creation and teardown, or the channel a creation response handed back for
//! message delivery. [`HttpTransport`] carries subrequests over HTTP; tests
//! use [`RecordingTransport`](crate::test_utils::RecordingTransport).

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Opaque route to a sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// The host's own control channel.
    pub const CONTROL: ChannelId = ChannelId(0);

    pub fn is_control(&self) -> bool {
        *self == Self::CONTROL
    }

    /// A channel handed back by the host. The control value is reserved and
    /// never names a sibling.
    pub fn sibling(raw: u32) -> Result<ChannelId> {
        let channel = ChannelId(raw);
        if channel.is_control() {
            return Err(WorkerError::InvalidChannel(raw.to_string()));
        }
        Ok(channel)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubrequestRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl SubrequestRequest {
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, path, body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path, Bytes::new())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A completed exchange. The body has always been read in full.
#[derive(Debug, Clone, PartialEq)]
pub struct SubrequestResponse {
    pub status: u16,
    pub body: Bytes,
}

impl SubrequestResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait SubrequestTransport: Send + Sync {
    async fn send(
        &self,
        channel: ChannelId,
        request: SubrequestRequest,
    ) -> Result<SubrequestResponse>;
}

/// HTTP transport: the control channel is `base`, channel `n` is
/// `base/channels/n/`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base))
    }

    pub fn with_client(client: reqwest::Client, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn channel_url(&self, channel: ChannelId, path: &str) -> Result<Url> {
        let root = if channel.is_control() {
            self.base.clone()
        } else {
            self.base.join(&format!("channels/{channel}/"))?
        };
        Ok(root.join(path.trim_start_matches('/'))?)
    }
}

#[async_trait]
impl SubrequestTransport for HttpTransport {
    async fn send(
        &self,
        channel: ChannelId,
        request: SubrequestRequest,
    ) -> Result<SubrequestResponse> {
        let url = self.channel_url(channel, &request.path)?;
        debug!(%channel, method = %request.method, %url, "sending subrequest");

        let mut builder = self.client.request(request.method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        // Drain the body so the connection can be reused.
        let body = response.bytes().await?;
        Ok(SubrequestResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_channel_excludes_control() {
        assert_eq!(
            ChannelId::sibling(0),
            Err(WorkerError::InvalidChannel("0".to_string()))
        );
        assert_eq!(ChannelId::sibling(3), Ok(ChannelId(3)));
    }

    #[test]
    fn test_channel_urls() {
        let transport = HttpTransport::with_client(
            reqwest::Client::new(),
            Url::parse("http://workerd.local/api").unwrap(),
        );
        assert_eq!(
            transport
                .channel_url(ChannelId::CONTROL, "workers")
                .unwrap()
                .as_str(),
            "http://workerd.local/api/workers"
        );
        assert_eq!(
            transport
                .channel_url(ChannelId(7), "/post-message")
                .unwrap()
                .as_str(),
            "http://workerd.local/api/channels/7/post-message"
        );
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = SubrequestRequest::post("post-message", Bytes::new())
            .with_header("Content-Type", "application/octet-stream");
        assert_eq!(
            request.header("content-type"),
            Some("application/octet-stream")
        );
        assert_eq!(request.header("host"), None);
    }
}
