//! The execution context that owns siblings.
//!
//! An [`ExecutionContext`] bundles the collaborators every sibling handle
//! needs (transport, script resolver, key backend), the host-object hooks
//! used for every encode and decode, the registry of inbound message
//! handlers, and the context's pending work.
//!
//! Background units (deliveries, teardown, spawn completion) are spawned with
//! [`ExecutionContext::wait_until`] and joined by [`ExecutionContext::settle`].

use crate::blob::ScriptResolver;
use crate::config::SiblingConfig;
use crate::crypto_key::{CryptoKeyHook, JwkKeyBackend, KeyBackend};
use crate::error::{Result, WorkerError};
use crate::transport::SubrequestTransport;
use dashmap::DashMap;
use sibling_codec::{EncodedValue, HostObjectHook, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::debug;

pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Inbound message handlers keyed by entrypoint name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, MessageHandler>,
}

impl HandlerRegistry {
    pub fn register(&self, name: impl Into<String>, handler: MessageHandler) {
        let name = name.into();
        debug!(entrypoint = %name, "registering inbound handler");
        self.handlers.insert(name, handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<MessageHandler> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct ExecutionContext {
    transport: Arc<dyn SubrequestTransport>,
    scripts: Arc<dyn ScriptResolver>,
    hooks: Vec<Arc<dyn HostObjectHook>>,
    handlers: HandlerRegistry,
    tasks: TaskTracker,
    config: SiblingConfig,
}

impl ExecutionContext {
    pub fn new(
        transport: Arc<dyn SubrequestTransport>,
        scripts: Arc<dyn ScriptResolver>,
        config: SiblingConfig,
    ) -> Self {
        Self::with_key_backend(transport, scripts, Arc::new(JwkKeyBackend), config)
    }

    pub fn with_key_backend(
        transport: Arc<dyn SubrequestTransport>,
        scripts: Arc<dyn ScriptResolver>,
        keys: Arc<dyn KeyBackend>,
        config: SiblingConfig,
    ) -> Self {
        Self {
            transport,
            scripts,
            hooks: vec![Arc::new(CryptoKeyHook::new(keys))],
            handlers: HandlerRegistry::default(),
            tasks: TaskTracker::new(),
            config,
        }
    }

    pub fn transport(&self) -> &Arc<dyn SubrequestTransport> {
        &self.transport
    }

    pub fn scripts(&self) -> &dyn ScriptResolver {
        self.scripts.as_ref()
    }

    pub fn hooks(&self) -> &[Arc<dyn HostObjectHook>] {
        &self.hooks
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn config(&self) -> &SiblingConfig {
        &self.config
    }

    /// Run `future` as pending work of this context. Its result is discarded.
    pub fn wait_until<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    /// Number of pending work units still running.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for all pending work, including work spawned while waiting.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Decode a message addressed to `entrypoint` and hand it to the
    /// registered handler.
    pub fn receive_message(&self, entrypoint: &str, bytes: Vec<u8>) -> Result<()> {
        let handler = self
            .handlers
            .get(entrypoint)
            .ok_or_else(|| WorkerError::UnknownEntrypoint(entrypoint.to_string()))?;
        let encoded = EncodedValue::from_wire(bytes);
        let value = sibling_codec::decode(&encoded, &self.hooks)?;
        handler(value);
        Ok(())
    }
}
