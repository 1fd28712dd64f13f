//! # Sibling Structured Value Codec
//!
//! Encodes [`Value`]s into a versioned, tag-per-value byte format and back.
//! The format is shared by every build that exchanges messages with a
//! sibling, so the version is pinned: [`WIRE_FORMAT_VERSION`] is written by
//! every encoder and required by every decoder, whatever the newest format
//! this crate could produce.
//!
//! ## Host objects
//!
//! Values such as crypto keys are not structurally cloneable. Callers pass an
//! ordered list of [`HostObjectHook`]s; before any composite value is written
//! the first matching hook takes over and writes its own payload behind a
//! tagged host-object marker. Decoding selects the hook by that tag.
//!
//! ## Buffers
//!
//! - `ArrayBuffer`s listed for transfer are detached from their source when the
//!   encode succeeds and travel in [`EncodedValue::transferred_buffers`] (or
//!   inline, see [`TransferMode`]).
//! - `SharedArrayBuffer`s are referenced by a small id into
//!   [`EncodedValue::shared_buffers`]; decoding hands back handles to the same
//!   backing memory.
//!
//! ## Example
//!
//! ```rust
//! use sibling_codec::{Value, decode, encode};
//!
//! let value = Value::object([("greeting", Value::string("hello"))]);
//! let encoded = encode(&value, &[], &[]).unwrap();
//! assert_eq!(decode(&encoded, &[]).unwrap(), value);
//! ```

pub mod de;
pub mod error;
pub mod hook;
mod json;
pub mod ser;
pub mod value;
mod wire;

pub use de::{Deserializer, DeserializerOptions};
pub use error::{CloneError, Result};
pub use hook::HostObjectHook;
pub use ser::{Serializer, SerializerOptions, TransferMode};
pub use value::{ArrayBuffer, HostObject, SharedArrayBuffer, Value};

use std::sync::Arc;

/// The one wire format version used for every encode and decode.
pub const WIRE_FORMAT_VERSION: u32 = 15;

/// Nesting limit for composite values, on both encode and decode.
pub const MAX_DEPTH: usize = 512;

/// The product of an encode: the byte stream plus any out-of-band buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedValue {
    pub version: u32,
    pub bytes: Vec<u8>,
    pub transferred_buffers: Vec<Vec<u8>>,
    pub shared_buffers: Vec<SharedArrayBuffer>,
}

impl EncodedValue {
    /// Wrap bytes received from a peer. The version is taken from the header;
    /// data without a readable header is tagged with version 0 and will be
    /// refused by the decoder.
    pub fn from_wire(bytes: Vec<u8>) -> Self {
        Self {
            version: wire::peek_version(&bytes).unwrap_or(0),
            bytes,
            transferred_buffers: Vec::new(),
            shared_buffers: Vec::new(),
        }
    }

    /// True if the value can travel as bytes alone.
    pub fn is_self_contained(&self) -> bool {
        self.transferred_buffers.is_empty() && self.shared_buffers.is_empty()
    }
}

/// Encode `value`, transferring the listed buffers.
pub fn encode(
    value: &Value,
    transfer: &[ArrayBuffer],
    hooks: &[Arc<dyn HostObjectHook>],
) -> Result<EncodedValue> {
    encode_with_options(value, transfer, hooks, SerializerOptions::default())
}

pub fn encode_with_options(
    value: &Value,
    transfer: &[ArrayBuffer],
    hooks: &[Arc<dyn HostObjectHook>],
    options: SerializerOptions,
) -> Result<EncodedValue> {
    let mut serializer = Serializer::with_options(hooks, options);
    for buffer in transfer {
        serializer.transfer(buffer)?;
    }
    serializer.write(value)?;
    Ok(serializer.release())
}

pub fn decode(encoded: &EncodedValue, hooks: &[Arc<dyn HostObjectHook>]) -> Result<Value> {
    Deserializer::new(encoded, hooks)?.read_value()
}
