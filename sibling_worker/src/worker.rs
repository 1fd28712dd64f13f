//! # Sibling Handles
//!
//! A [`Worker`] is the owner's handle to one sibling execution context.
//!
//! ## Spawn
//!
//! [`Worker::new`] validates its arguments synchronously, builds exactly one
//! creation request and wraps its outcome in a shared future. Every operation
//! that needs the sibling's channel awaits that same future, so the request is
//! issued once no matter how many messages are queued behind it. When the
//! creation succeeds an inbound handler is registered in the context and the
//! handle becomes `Ready`; when it fails the failure goes to the error surface.
//!
//! ## Delivery
//!
//! [`Worker::post_message`] encodes immediately (so clone errors surface to
//! the caller before any I/O) and hands the bytes to a background unit that
//! waits for the channel and posts them. Deliveries are independent of each
//! other and of termination.
//!
//! ## Lifecycle
//!
//! `Initializing -> Ready -> Terminated`. [`Worker::terminate`] takes effect
//! synchronously; teardown of the remote side happens in the background once
//! the spawn has completed either way.
//!
//! ## Errors
//!
//! [`Worker::report_error`] records the first error only and dispatches one
//! [`WorkerEvent::Error`] for it.

use crate::config::ProtocolGeneration;
use crate::context::ExecutionContext;
use crate::error::{Result, WorkerError};
use crate::options::{CreateRequest, CreateResponse, WorkerOptions};
use crate::transport::{ChannelId, SubrequestRequest, SubrequestTransport};
use futures::future::{BoxFuture, FutureExt, Shared};
use sibling_codec::{ArrayBuffer, SerializerOptions, Value};
use sibling_common::lifecycle::{LifecycleState, LifecycleStateMachine};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub const POST_MESSAGE_PATH: &str = "post-message";

const EVENT_CAPACITY: usize = 64;
const STATUS_CREATED: u16 = 201;
const STATUS_NO_CONTENT: u16 = 204;

type ChannelFuture = Shared<BoxFuture<'static, Result<CreateResponse>>>;

/// The first error reported for a sibling. Never overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub message: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A message the sibling posted back to its owner.
    Message(Value),
    Error { message: String, error: Value },
}

#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    id: String,
    context: Arc<ExecutionContext>,
    channel: ChannelFuture,
    lifecycle: LifecycleStateMachine,
    last_error: OnceLock<ErrorRecord>,
    registered_as: OnceLock<String>,
    events: broadcast::Sender<WorkerEvent>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("state", &self.inner.lifecycle.current())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Spawn a sibling running the script behind `url`.
    ///
    /// # Errors
    ///
    /// `InvalidUrl`, `ScriptNotFound` and `InvalidOption` are returned before
    /// any request is made. Creation failures are reported asynchronously
    /// through [`ready`](Worker::ready) and the error surface.
    pub fn new(context: Arc<ExecutionContext>, url: &str, options: WorkerOptions) -> Result<Self> {
        let script_url = Url::parse(url).map_err(|_| WorkerError::InvalidUrl(url.to_string()))?;
        if script_url.scheme() != "blob" {
            return Err(WorkerError::InvalidUrl(url.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let script = context
            .scripts()
            .resolve(&script_url)
            .ok_or_else(|| WorkerError::ScriptNotFound(url.to_string()))?;
        let options = options.validate()?;

        let body = serde_json::to_vec(&CreateRequest {
            id: id.clone(),
            script_ref: script,
            options,
        })?;
        let request = SubrequestRequest::post(context.config().create_path.clone(), body)
            .with_header("content-type", "application/json");
        let channel = create_sibling(context.transport().clone(), request)
            .boxed()
            .shared();

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(WorkerInner {
            id,
            context: context.clone(),
            channel,
            lifecycle: LifecycleStateMachine::new(),
            last_error: OnceLock::new(),
            registered_as: OnceLock::new(),
            events,
        });

        info!(worker_id = %inner.id, "sibling spawn requested");
        context.wait_until(inner.clone().complete_spawn());
        Ok(Self { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.current()
    }

    pub fn state_changes(&self) -> watch::Receiver<LifecycleState> {
        self.inner.lifecycle.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.inner.last_error.get()
    }

    /// Resolves with the sibling's channel once the creation request completes.
    pub async fn channel(&self) -> Result<ChannelId> {
        let created = self.inner.channel.clone().await?;
        Ok(ChannelId(created.channel))
    }

    /// Wait until the spawn has completed. Fails with the creation error if
    /// the sibling could not be created.
    pub async fn ready(&self) -> Result<()> {
        self.inner.channel.clone().await?;
        // Err only if terminated first, which leaves nothing to wait for.
        let _ = self.inner.lifecycle.wait_for_ready().await;
        Ok(())
    }

    /// Send `value` to the sibling, moving the listed buffers.
    ///
    /// A no-op once terminated. Encoding failures are returned and nothing is
    /// sent; delivery failures are logged only.
    pub fn post_message(&self, value: &Value, transfer: &[ArrayBuffer]) -> Result<()> {
        let inner = &self.inner;
        if inner.lifecycle.is_terminated() {
            debug!(worker_id = %inner.id, "post_message after terminate ignored");
            return Ok(());
        }

        let encoded = sibling_codec::encode_with_options(
            value,
            transfer,
            inner.context.hooks(),
            SerializerOptions::for_wire(),
        )?;
        debug_assert!(encoded.is_self_contained());
        let request = SubrequestRequest::post(POST_MESSAGE_PATH, encoded.bytes)
            .with_header("content-type", "application/octet-stream")
            .with_header("host", inner.context.config().entrypoint_name.clone());

        let id = inner.id.clone();
        let channel = inner.channel.clone();
        let transport = inner.context.transport().clone();
        inner.context.wait_until(async move {
            let created = match channel.await {
                Ok(created) => created,
                Err(e) => {
                    debug!(worker_id = %id, error = %e, "message dropped, sibling was never created");
                    return;
                }
            };
            match transport.send(ChannelId(created.channel), request).await {
                Ok(response) if response.status == STATUS_NO_CONTENT => {}
                Ok(response) => warn!(
                    worker_id = %id,
                    status = response.status,
                    body = %response.text(),
                    "sibling did not accept message"
                ),
                Err(e) => warn!(worker_id = %id, error = %e, "message delivery failed"),
            }
        });
        Ok(())
    }

    /// Terminate the sibling. Only the first call has any effect.
    pub fn terminate(&self) {
        let inner = &self.inner;
        if !inner.lifecycle.transition_to_terminated() {
            return;
        }
        info!(worker_id = %inner.id, "terminating sibling");
        inner.context.wait_until(inner.clone().tear_down());
    }

    /// Record `error` as this sibling's error and dispatch an error event.
    /// Returns false, doing nothing, if an error was already recorded.
    pub fn report_error(&self, error: Value) -> bool {
        self.inner.report_error(error)
    }
}

impl WorkerInner {
    async fn complete_spawn(self: Arc<Self>) {
        let created = match self.channel.clone().await {
            Ok(created) => created,
            Err(e) => {
                if self.lifecycle.is_terminated() {
                    debug!(worker_id = %self.id, error = %e, "spawn failed after terminate");
                } else {
                    warn!(worker_id = %self.id, error = %e, "sibling spawn failed");
                    self.report_error(error_value(&e));
                }
                return;
            }
        };

        let key = match self.context.config().protocol {
            ProtocolGeneration::IdKeyed => self.id.clone(),
            ProtocolGeneration::NameKeyed => created.name.unwrap_or_else(|| self.id.clone()),
        };
        let weak = Arc::downgrade(&self);
        self.context.handlers().register(
            key.clone(),
            Arc::new(move |value: Value| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch_message(value);
                }
            }),
        );
        let _ = self.registered_as.set(key.clone());

        // terminate() may have run while the creation was in flight.
        if self.lifecycle.is_terminated() {
            self.context.handlers().unregister(&key);
            return;
        }
        if self.lifecycle.transition_to_ready().is_ok() {
            debug!(worker_id = %self.id, channel = created.channel, entrypoint = %key, "sibling ready");
        }
    }

    async fn tear_down(self: Arc<Self>) {
        // The sibling may not exist yet; wait for the spawn either way.
        let _ = self.channel.clone().await;

        let request = SubrequestRequest::delete(self.id.clone());
        match self
            .context
            .transport()
            .send(ChannelId::CONTROL, request)
            .await
        {
            Ok(response) => {
                debug!(worker_id = %self.id, status = response.status, "teardown sent")
            }
            Err(e) => warn!(worker_id = %self.id, error = %e, "teardown request failed"),
        }

        if let Some(key) = self.registered_as.get() {
            self.context.handlers().unregister(key);
        }
    }

    fn dispatch_message(&self, value: Value) {
        if !self.lifecycle.current().accepts_messages() {
            return;
        }
        // No subscribers is fine.
        let _ = self.events.send(WorkerEvent::Message(value));
    }

    fn report_error(&self, error: Value) -> bool {
        let record = ErrorRecord {
            message: error.to_display_string(),
            value: error,
        };
        if self.last_error.set(record.clone()).is_err() {
            return false;
        }
        let _ = self.events.send(WorkerEvent::Error {
            message: record.message,
            error: record.value,
        });
        true
    }
}

async fn create_sibling(
    transport: Arc<dyn SubrequestTransport>,
    request: SubrequestRequest,
) -> Result<CreateResponse> {
    let response = transport.send(ChannelId::CONTROL, request).await?;
    if response.status != STATUS_CREATED {
        return Err(WorkerError::Transport {
            status: response.status,
            message: response.text(),
        });
    }
    let created: CreateResponse = serde_json::from_slice(&response.body)?;
    ChannelId::sibling(created.channel)?;
    Ok(created)
}

fn error_value(error: &WorkerError) -> Value {
    Value::object([
        ("name", Value::string("Error")),
        ("message", Value::string(error.to_string())),
    ])
}
