//! # Sibling Workers
//!
//! Spawn sibling execution contexts, exchange structured values with them, and
//! tear them down.
//!
//! ## Overview
//!
//! - **[`Worker`]**: the owner's handle. Construction issues one creation
//!   request on the control channel; messages queue behind it and are
//!   delivered on the channel the creation response names.
//! - **[`ExecutionContext`]**: collaborators shared by all handles of one
//!   owner (transport, script resolver, key backend), the inbound handler
//!   registry and the owner's pending work.
//! - **Codec**: values cross the boundary in the pinned wire format of
//!   [`sibling_codec`]. Crypto keys travel through a host-object hook as
//!   algorithm name plus JWK.
//! - **Attestation**: [`sibling_attest`] provides the device channel; the `sibling`
//!   binary exposes it as `sibling attest`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sibling_codec::Value;
//! use sibling_worker::{
//!     BlobStore, ExecutionContext, HttpTransport, SiblingConfig, Worker, WorkerOptions,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SiblingConfig::default();
//! let transport = HttpTransport::new(config.control_url.parse()?, config.request_timeout())?;
//! let blobs = Arc::new(BlobStore::default());
//! let context = Arc::new(ExecutionContext::new(Arc::new(transport), blobs.clone(), config));
//!
//! let url = blobs.create_object_url("addEventListener('message', () => {})");
//! let worker = Worker::new(context.clone(), &url, WorkerOptions::default().with_type("module"))?;
//! blobs.revoke_object_url(&url);
//!
//! worker.post_message(&Value::object([("message", Value::string("hello"))]), &[])?;
//! context.settle().await;
//! worker.terminate();
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod config;
pub mod context;
pub mod crypto_key;
pub mod dynamic;
pub mod error;
pub mod inbound;
pub mod options;
pub mod transport;
pub mod utils;
pub mod worker;

// Test utilities
pub mod test_utils;

pub use blob::{BlobStore, ScriptResolver};
pub use config::{ProtocolGeneration, SiblingConfig};
pub use context::{ExecutionContext, HandlerRegistry};
pub use crypto_key::{CryptoKey, CryptoKeyHook, JwkKeyBackend, KeyBackend};
pub use dynamic::{DynamicWorkerApi, Fetcher};
pub use error::{Result, WorkerError};
pub use options::WorkerOptions;
pub use transport::{ChannelId, HttpTransport, SubrequestTransport};
pub use worker::{ErrorRecord, Worker, WorkerEvent};
