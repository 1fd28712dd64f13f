use crate::error::{CloneError, Result};
use crate::hook::HostObjectHook;
use crate::value::{ArrayBuffer, SharedArrayBuffer, Value};
use crate::wire::{self, write_varint};
use crate::{EncodedValue, MAX_DEPTH, WIRE_FORMAT_VERSION};
use std::sync::Arc;

/// Where transferred `ArrayBuffer` contents end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// Contents move into [`EncodedValue::transferred_buffers`] and the byte
    /// stream refers to them by index.
    #[default]
    SideTable,
    /// Contents are written into the byte stream itself. Used when only the
    /// bytes travel, e.g. over a subrequest.
    Inline,
}

#[derive(Debug, Clone, Copy)]
pub struct SerializerOptions {
    /// When set, the version header is not written to the output buffer.
    pub omit_header: bool,
    pub transfer_mode: TransferMode,
    pub allow_shared_buffers: bool,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            omit_header: false,
            transfer_mode: TransferMode::SideTable,
            allow_shared_buffers: true,
        }
    }
}

impl SerializerOptions {
    /// Options for values whose bytes alone cross a process boundary.
    pub fn for_wire() -> Self {
        Self {
            omit_header: false,
            transfer_mode: TransferMode::Inline,
            allow_shared_buffers: false,
        }
    }
}

/// Writes values into the wire format.
///
/// Nothing escapes until [`release`](Serializer::release): a failed `write`
/// leaves transferred buffers attached, and dropping the serializer discards
/// whatever was written.
pub struct Serializer<'h> {
    buffer: Vec<u8>,
    hooks: &'h [Arc<dyn HostObjectHook>],
    options: SerializerOptions,
    transfers: Vec<ArrayBuffer>,
    shared: Vec<SharedArrayBuffer>,
    depth: usize,
}

impl<'h> Serializer<'h> {
    pub fn new(hooks: &'h [Arc<dyn HostObjectHook>]) -> Self {
        Self::with_options(hooks, SerializerOptions::default())
    }

    pub fn with_options(hooks: &'h [Arc<dyn HostObjectHook>], options: SerializerOptions) -> Self {
        let mut buffer = Vec::new();
        if !options.omit_header {
            buffer.push(wire::VERSION_TAG);
            write_varint(&mut buffer, u64::from(WIRE_FORMAT_VERSION));
        }
        Self {
            buffer,
            hooks,
            options,
            transfers: Vec::new(),
            shared: Vec::new(),
            depth: 0,
        }
    }

    /// Mark a buffer for transfer. It is detached when the serializer is released.
    pub fn transfer(&mut self, buffer: &ArrayBuffer) -> Result<()> {
        if buffer.is_detached() {
            return Err(CloneError::DetachedBuffer);
        }
        if self.transfers.iter().any(|t| t.same_buffer(buffer)) {
            return Err(CloneError::DuplicateTransfer(self.transfers.len()));
        }
        self.transfers.push(buffer.clone());
        Ok(())
    }

    /// Write one value. Host-object hooks may call this recursively for
    /// their own sub-values.
    pub fn write(&mut self, value: &Value) -> Result<()> {
        if value.is_composite() {
            let hooks = self.hooks;
            if let Some(hook) = hooks.iter().find(|hook| hook.matches(value)) {
                tracing::trace!(tag = hook.tag(), "host object claimed by hook");
                self.buffer.push(wire::HOST_OBJECT);
                self.write_raw_string(hook.tag());
                return self.nested(|s| hook.write(value, s));
            }
        }

        match value {
            Value::Undefined => self.buffer.push(wire::UNDEFINED),
            Value::Null => self.buffer.push(wire::NULL),
            Value::Bool(true) => self.buffer.push(wire::TRUE),
            Value::Bool(false) => self.buffer.push(wire::FALSE),
            Value::Int32(n) => {
                self.buffer.push(wire::INT32);
                write_varint(&mut self.buffer, u64::from(wire::zigzag_encode(*n)));
            }
            Value::Uint32(n) => {
                self.buffer.push(wire::UINT32);
                write_varint(&mut self.buffer, u64::from(*n));
            }
            Value::Double(n) => {
                self.buffer.push(wire::DOUBLE);
                self.buffer.extend_from_slice(&n.to_le_bytes());
            }
            Value::BigInt(n) => self.write_bigint(*n),
            Value::String(s) => self.write_string(s),
            Value::Date(ms) => {
                self.buffer.push(wire::DATE);
                self.buffer.extend_from_slice(&ms.to_le_bytes());
            }
            Value::Array(items) => self.nested(|s| {
                s.buffer.push(wire::BEGIN_DENSE_ARRAY);
                write_varint(&mut s.buffer, items.len() as u64);
                for item in items {
                    s.write(item)?;
                }
                s.buffer.push(wire::END_DENSE_ARRAY);
                write_varint(&mut s.buffer, 0);
                write_varint(&mut s.buffer, items.len() as u64);
                Ok(())
            })?,
            Value::Object(entries) => self.nested(|s| {
                s.buffer.push(wire::BEGIN_OBJECT);
                for (key, item) in entries {
                    s.write_string(key);
                    s.write(item)?;
                }
                s.buffer.push(wire::END_OBJECT);
                write_varint(&mut s.buffer, entries.len() as u64);
                Ok(())
            })?,
            Value::Map(entries) => self.nested(|s| {
                s.buffer.push(wire::BEGIN_MAP);
                for (key, item) in entries {
                    s.write(key)?;
                    s.write(item)?;
                }
                s.buffer.push(wire::END_MAP);
                write_varint(&mut s.buffer, 2 * entries.len() as u64);
                Ok(())
            })?,
            Value::Set(items) => self.nested(|s| {
                s.buffer.push(wire::BEGIN_SET);
                for item in items {
                    s.write(item)?;
                }
                s.buffer.push(wire::END_SET);
                write_varint(&mut s.buffer, items.len() as u64);
                Ok(())
            })?,
            Value::ArrayBuffer(buffer) => self.write_array_buffer(buffer)?,
            Value::SharedArrayBuffer(buffer) => self.write_shared_array_buffer(buffer)?,
            Value::Host(_) | Value::Function(_) | Value::Symbol(_) => {
                return Err(CloneError::NotCloneable(value.describe()));
            }
        }
        Ok(())
    }

    /// Finish encoding: detach transferred buffers and hand out the result.
    pub fn release(self) -> EncodedValue {
        let mut transferred_buffers = Vec::new();
        for buffer in &self.transfers {
            let bytes = buffer.detach().unwrap_or_default();
            if self.options.transfer_mode == TransferMode::SideTable {
                transferred_buffers.push(bytes);
            }
        }
        EncodedValue {
            version: WIRE_FORMAT_VERSION,
            bytes: self.buffer,
            transferred_buffers,
            shared_buffers: self.shared,
        }
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(CloneError::DepthExceeded(MAX_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn write_string(&mut self, s: &str) {
        self.buffer.push(wire::UTF8_STRING);
        self.write_raw_string(s);
    }

    fn write_raw_string(&mut self, s: &str) {
        write_varint(&mut self.buffer, s.len() as u64);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    fn write_bigint(&mut self, n: i128) {
        self.buffer.push(wire::BIGINT);
        let magnitude = n.unsigned_abs();
        let byte_length: u64 = if magnitude == 0 {
            0
        } else if magnitude <= u128::from(u64::MAX) {
            8
        } else {
            16
        };
        let bitfield = (byte_length << 1) | u64::from(n < 0);
        write_varint(&mut self.buffer, bitfield);
        self.buffer
            .extend_from_slice(&magnitude.to_le_bytes()[..byte_length as usize]);
    }

    fn write_array_buffer(&mut self, buffer: &ArrayBuffer) -> Result<()> {
        if let Some(index) = self.transfers.iter().position(|t| t.same_buffer(buffer))
            && self.options.transfer_mode == TransferMode::SideTable
        {
            self.buffer.push(wire::ARRAY_BUFFER_TRANSFER);
            write_varint(&mut self.buffer, index as u64);
            return Ok(());
        }
        let bytes = buffer.to_vec().ok_or(CloneError::DetachedBuffer)?;
        self.buffer.push(wire::ARRAY_BUFFER);
        write_varint(&mut self.buffer, bytes.len() as u64);
        self.buffer.extend_from_slice(&bytes);
        Ok(())
    }

    fn write_shared_array_buffer(&mut self, buffer: &SharedArrayBuffer) -> Result<()> {
        if !self.options.allow_shared_buffers {
            return Err(CloneError::SharedBufferNotAllowed);
        }
        let id = match self.shared.iter().position(|s| s.same_buffer(buffer)) {
            Some(id) => id,
            None => {
                self.shared.push(buffer.clone());
                self.shared.len() - 1
            }
        };
        self.buffer.push(wire::SHARED_ARRAY_BUFFER);
        write_varint(&mut self.buffer, id as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_pinned_version() {
        let encoded = Serializer::new(&[]).release();
        assert_eq!(encoded.bytes, vec![0xFF, 15]);
        assert_eq!(encoded.version, WIRE_FORMAT_VERSION);
    }

    #[test]
    fn test_omit_header() {
        let options = SerializerOptions {
            omit_header: true,
            ..SerializerOptions::default()
        };
        let mut ser = Serializer::with_options(&[], options);
        ser.write(&Value::Null).unwrap();
        assert_eq!(ser.release().bytes, vec![b'0']);
    }

    #[test]
    fn test_int32_layout() {
        let mut ser = Serializer::new(&[]);
        ser.write(&Value::Int32(-1)).unwrap();
        assert_eq!(ser.release().bytes, vec![0xFF, 15, b'I', 0x01]);
    }

    #[test]
    fn test_failed_write_leaves_transfer_attached() {
        let buffer = ArrayBuffer::new(vec![1, 2, 3]);
        let mut ser = Serializer::new(&[]);
        ser.transfer(&buffer).unwrap();
        let value = Value::Array(vec![
            Value::ArrayBuffer(buffer.clone()),
            Value::Function("callback".into()),
        ]);
        let err = ser.write(&value).unwrap_err();
        drop(ser);
        assert_eq!(
            err,
            CloneError::NotCloneable("function callback() {}".to_string())
        );
        assert!(!buffer.is_detached());
    }

    #[test]
    fn test_duplicate_transfer_rejected() {
        let buffer = ArrayBuffer::new(vec![1]);
        let mut ser = Serializer::new(&[]);
        ser.transfer(&buffer).unwrap();
        assert_eq!(
            ser.transfer(&buffer.clone()),
            Err(CloneError::DuplicateTransfer(1))
        );
    }

    #[test]
    fn test_inline_transfer_detaches_without_side_table() {
        let buffer = ArrayBuffer::new(vec![9, 9]);
        let mut ser = Serializer::with_options(&[], SerializerOptions::for_wire());
        ser.transfer(&buffer).unwrap();
        ser.write(&Value::ArrayBuffer(buffer.clone())).unwrap();
        let encoded = ser.release();
        assert!(buffer.is_detached());
        assert!(encoded.transferred_buffers.is_empty());
        assert_eq!(&encoded.bytes[2..], &[b'B', 2, 9, 9]);
    }

    #[test]
    fn test_wire_options_reject_shared_buffers() {
        let mut ser = Serializer::with_options(&[], SerializerOptions::for_wire());
        let err = ser
            .write(&Value::SharedArrayBuffer(SharedArrayBuffer::new(vec![0])))
            .unwrap_err();
        assert_eq!(err, CloneError::SharedBufferNotAllowed);
    }

    #[test]
    fn test_depth_limit() {
        let mut value = Value::Null;
        for _ in 0..(MAX_DEPTH + 1) {
            value = Value::Array(vec![value]);
        }
        let mut ser = Serializer::new(&[]);
        assert_eq!(
            ser.write(&value),
            Err(CloneError::DepthExceeded(MAX_DEPTH))
        );
    }
}
