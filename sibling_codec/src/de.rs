use crate::error::{CloneError, Result};
use crate::hook::HostObjectHook;
use crate::value::{ArrayBuffer, SharedArrayBuffer, Value};
use crate::wire;
use crate::{EncodedValue, MAX_DEPTH, WIRE_FORMAT_VERSION};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct DeserializerOptions {
    /// Expect a version header at the start of the data. When false the data
    /// is assumed to be written with the pinned version.
    pub read_header: bool,
}

impl Default for DeserializerOptions {
    fn default() -> Self {
        Self { read_header: true }
    }
}

/// Reads values back out of the wire format.
pub struct Deserializer<'a> {
    data: &'a [u8],
    position: usize,
    hooks: &'a [Arc<dyn HostObjectHook>],
    transferred_bytes: &'a [Vec<u8>],
    /// Transferred buffers already read; repeat indices alias the same buffer.
    transferred: Vec<Option<ArrayBuffer>>,
    shared: &'a [SharedArrayBuffer],
    version: u32,
    depth: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(encoded: &'a EncodedValue, hooks: &'a [Arc<dyn HostObjectHook>]) -> Result<Self> {
        Self::with_options(encoded, hooks, DeserializerOptions::default())
    }

    pub fn with_options(
        encoded: &'a EncodedValue,
        hooks: &'a [Arc<dyn HostObjectHook>],
        options: DeserializerOptions,
    ) -> Result<Self> {
        if encoded.version != WIRE_FORMAT_VERSION {
            return Err(CloneError::VersionMismatch {
                expected: WIRE_FORMAT_VERSION,
                found: encoded.version,
            });
        }
        let mut de = Self {
            data: &encoded.bytes,
            position: 0,
            hooks,
            transferred_bytes: &encoded.transferred_buffers,
            transferred: vec![None; encoded.transferred_buffers.len()],
            shared: &encoded.shared_buffers,
            version: WIRE_FORMAT_VERSION,
            depth: 0,
        };
        if options.read_header {
            de.read_header()?;
        }
        Ok(de)
    }

    /// Wire format version of the data being read.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_tag()?;
        self.read_tagged(tag)
    }

    /// Read a value that must be a string. Convenience for hooks.
    pub fn read_string_value(&mut self) -> Result<String> {
        match self.read_value()? {
            Value::String(s) => Ok(s),
            other => Err(CloneError::Malformed(format!(
                "expected a string, found {}",
                other.describe()
            ))),
        }
    }

    fn read_header(&mut self) -> Result<()> {
        if self.read_byte()? != wire::VERSION_TAG {
            return Err(CloneError::Malformed("missing version header".to_string()));
        }
        let version = self.read_varint32()?;
        if version != WIRE_FORMAT_VERSION {
            return Err(CloneError::VersionMismatch {
                expected: WIRE_FORMAT_VERSION,
                found: version,
            });
        }
        self.version = version;
        Ok(())
    }

    fn read_tagged(&mut self, tag: u8) -> Result<Value> {
        let value = match tag {
            wire::UNDEFINED => Value::Undefined,
            wire::NULL => Value::Null,
            wire::TRUE => Value::Bool(true),
            wire::FALSE => Value::Bool(false),
            wire::INT32 => Value::Int32(wire::zigzag_decode(self.read_varint32()?)),
            wire::UINT32 => Value::Uint32(self.read_varint32()?),
            wire::DOUBLE => Value::Double(self.read_f64()?),
            wire::BIGINT => Value::BigInt(self.read_bigint()?),
            wire::UTF8_STRING => Value::String(self.read_utf8()?),
            wire::ONE_BYTE_STRING => {
                let len = self.read_length()?;
                Value::String(self.read_bytes(len)?.iter().map(|&b| b as char).collect())
            }
            wire::TWO_BYTE_STRING => Value::String(self.read_two_byte()?),
            wire::DATE => Value::Date(self.read_f64()?),
            wire::BEGIN_OBJECT => self.nested(Self::read_object)?,
            wire::BEGIN_DENSE_ARRAY => self.nested(Self::read_dense_array)?,
            wire::BEGIN_MAP => self.nested(Self::read_map)?,
            wire::BEGIN_SET => self.nested(Self::read_set)?,
            wire::ARRAY_BUFFER => {
                let len = self.read_length()?;
                Value::ArrayBuffer(ArrayBuffer::new(self.read_bytes(len)?.to_vec()))
            }
            wire::ARRAY_BUFFER_TRANSFER => {
                let index = self.read_varint32()? as usize;
                let sources = self.transferred_bytes;
                let bytes = sources.get(index).ok_or_else(|| {
                    CloneError::Malformed(format!("invalid transferred buffer index {index}"))
                })?;
                let buffer = self.transferred[index]
                    .get_or_insert_with(|| ArrayBuffer::new(bytes.clone()))
                    .clone();
                Value::ArrayBuffer(buffer)
            }
            wire::SHARED_ARRAY_BUFFER => {
                let id = self.read_varint32()? as usize;
                let shared = self.shared.get(id).ok_or_else(|| {
                    CloneError::Malformed(format!("invalid shared buffer id {id}"))
                })?;
                Value::SharedArrayBuffer(shared.clone())
            }
            wire::HOST_OBJECT => self.nested(Self::read_host_object)?,
            other => {
                return Err(CloneError::Malformed(format!("unknown tag 0x{other:02x}")));
            }
        };
        Ok(value)
    }

    fn read_object(&mut self) -> Result<Value> {
        let mut entries = Vec::new();
        loop {
            let tag = self.read_tag()?;
            if tag == wire::END_OBJECT {
                self.expect_count(entries.len() as u32, "object")?;
                return Ok(Value::Object(entries));
            }
            let key = match self.read_tagged(tag)? {
                Value::String(s) => s,
                Value::Int32(n) => n.to_string(),
                Value::Uint32(n) => n.to_string(),
                Value::Double(n) => n.to_string(),
                other => {
                    return Err(CloneError::Malformed(format!(
                        "invalid object key {}",
                        other.describe()
                    )));
                }
            };
            let value = self.read_value()?;
            entries.push((key, value));
        }
    }

    fn read_dense_array(&mut self) -> Result<Value> {
        let len = self.read_length()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        if self.read_tag()? != wire::END_DENSE_ARRAY {
            return Err(CloneError::Malformed(
                "dense array has trailing properties".to_string(),
            ));
        }
        self.expect_count(0, "array properties")?;
        self.expect_count(len as u32, "array length")?;
        Ok(Value::Array(items))
    }

    fn read_map(&mut self) -> Result<Value> {
        let mut entries = Vec::new();
        loop {
            let tag = self.read_tag()?;
            if tag == wire::END_MAP {
                self.expect_count(2 * entries.len() as u32, "map")?;
                return Ok(Value::Map(entries));
            }
            let key = self.read_tagged(tag)?;
            let value = self.read_value()?;
            entries.push((key, value));
        }
    }

    fn read_set(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        loop {
            let tag = self.read_tag()?;
            if tag == wire::END_SET {
                self.expect_count(items.len() as u32, "set")?;
                return Ok(Value::Set(items));
            }
            items.push(self.read_tagged(tag)?);
        }
    }

    fn read_host_object(&mut self) -> Result<Value> {
        let len = self.read_length()?;
        let tag = String::from_utf8(self.read_bytes(len)?.to_vec())
            .map_err(|_| CloneError::Malformed("host object tag is not UTF-8".to_string()))?;
        let hooks = self.hooks;
        let hook = hooks
            .iter()
            .find(|hook| hook.tag() == tag)
            .ok_or(CloneError::UnknownHostObject(tag))?;
        hook.read(self)
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<Value>) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(CloneError::DepthExceeded(MAX_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expect_count(&mut self, expected: u32, what: &str) -> Result<()> {
        let found = self.read_varint32()?;
        if found != expected {
            return Err(CloneError::Malformed(format!(
                "{what} count mismatch: expected {expected}, found {found}"
            )));
        }
        Ok(())
    }

    /// Next tag, skipping alignment padding.
    fn read_tag(&mut self) -> Result<u8> {
        loop {
            let byte = self.read_byte()?;
            if byte != wire::PADDING {
                return Ok(byte);
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.position).ok_or(CloneError::UnexpectedEnd)?;
        self.position += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let data = self.data;
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(CloneError::UnexpectedEnd)?;
        let bytes = &data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 {
                return Err(CloneError::Malformed("varint too long".to_string()));
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_varint32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| CloneError::Malformed(format!("varint {value} exceeds 32 bits")))
    }

    /// A length prefix, bounded by the bytes that remain.
    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_varint32()? as usize;
        if len > self.data.len() - self.position {
            return Err(CloneError::UnexpectedEnd);
        }
        Ok(len)
    }

    fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_utf8(&mut self) -> Result<String> {
        let len = self.read_length()?;
        String::from_utf8(self.read_bytes(len)?.to_vec())
            .map_err(|_| CloneError::Malformed("invalid UTF-8 string".to_string()))
    }

    fn read_two_byte(&mut self) -> Result<String> {
        let len = self.read_length()?;
        if len % 2 != 0 {
            return Err(CloneError::Malformed(
                "two-byte string has odd length".to_string(),
            ));
        }
        let units: Vec<u16> = self
            .read_bytes(len)?
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|_| CloneError::Malformed("invalid UTF-16 string".to_string()))
    }

    fn read_bigint(&mut self) -> Result<i128> {
        let bitfield = self.read_varint()?;
        let negative = bitfield & 1 == 1;
        let byte_length = (bitfield >> 1) as usize;
        if byte_length > 16 {
            return Err(CloneError::Malformed(
                "BigInt exceeds 128 bits".to_string(),
            ));
        }
        let mut raw = [0u8; 16];
        raw[..byte_length].copy_from_slice(self.read_bytes(byte_length)?);
        let magnitude = u128::from_le_bytes(raw);
        const MIN_MAGNITUDE: u128 = 1 << 127;
        match (negative, magnitude) {
            (true, MIN_MAGNITUDE) => Ok(i128::MIN),
            (_, m) if m > i128::MAX as u128 => Err(CloneError::Malformed(
                "BigInt exceeds 128 bits".to_string(),
            )),
            (true, m) => Ok(-(m as i128)),
            (false, m) => Ok(m as i128),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(bytes: Vec<u8>) -> EncodedValue {
        EncodedValue::from_wire(bytes)
    }

    #[test]
    fn test_reads_one_byte_and_two_byte_strings() {
        let data = encoded(vec![0xFF, 15, b'"', 3, b'a', 0xE9, b'c']);
        let mut de = Deserializer::new(&data, &[]).unwrap();
        assert_eq!(de.read_value().unwrap(), Value::string("aéc"));

        let data = encoded(vec![0xFF, 15, b'c', 4, b'h', 0, b'i', 0]);
        let mut de = Deserializer::new(&data, &[]).unwrap();
        assert_eq!(de.read_value().unwrap(), Value::string("hi"));
    }

    #[test]
    fn test_skips_padding() {
        let data = encoded(vec![0xFF, 15, 0, 0, b'T']);
        let mut de = Deserializer::new(&data, &[]).unwrap();
        assert_eq!(de.read_value().unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_rejects_other_version() {
        let data = EncodedValue {
            version: WIRE_FORMAT_VERSION,
            bytes: vec![0xFF, 13, b'_'],
            transferred_buffers: Vec::new(),
            shared_buffers: Vec::new(),
        };
        assert!(matches!(
            Deserializer::new(&data, &[]).err(),
            Some(CloneError::VersionMismatch {
                expected: 15,
                found: 13
            })
        ));
    }

    #[test]
    fn test_rejects_missing_header() {
        let data = EncodedValue {
            version: WIRE_FORMAT_VERSION,
            bytes: vec![b'_'],
            transferred_buffers: Vec::new(),
            shared_buffers: Vec::new(),
        };
        assert!(matches!(
            Deserializer::new(&data, &[]).err(),
            Some(CloneError::Malformed(_))
        ));

        let headerless = Deserializer::with_options(
            &data,
            &[],
            DeserializerOptions { read_header: false },
        );
        assert_eq!(headerless.unwrap().read_value().unwrap(), Value::Undefined);
    }

    #[test]
    fn test_truncated_length_is_unexpected_end() {
        let data = encoded(vec![0xFF, 15, b'S', 10, b'a']);
        let mut de = Deserializer::new(&data, &[]).unwrap();
        assert_eq!(de.read_value(), Err(CloneError::UnexpectedEnd));
    }

    #[test]
    fn test_unknown_host_tag() {
        let data = encoded(vec![0xFF, 15, b'\\', 3, b'K', b'e', b'y']);
        let mut de = Deserializer::new(&data, &[]).unwrap();
        assert_eq!(
            de.read_value(),
            Err(CloneError::UnknownHostObject("Key".to_string()))
        );
    }

    #[test]
    fn test_repeated_transfer_index_aliases_one_buffer() {
        let data = EncodedValue {
            version: WIRE_FORMAT_VERSION,
            bytes: vec![0xFF, 15, b'A', 2, b't', 0, b't', 0, b'$', 0, 2],
            transferred_buffers: vec![vec![1]],
            shared_buffers: Vec::new(),
        };
        let mut de = Deserializer::new(&data, &[]).unwrap();
        let Value::Array(items) = de.read_value().unwrap() else {
            panic!("expected an array");
        };
        let (Value::ArrayBuffer(first), Value::ArrayBuffer(second)) = (&items[0], &items[1]) else {
            panic!("expected two array buffers");
        };
        assert!(first.same_buffer(second));
        assert_eq!(first.to_vec(), Some(vec![1]));
    }

    #[test]
    fn test_transfer_index_out_of_range() {
        let data = EncodedValue {
            version: WIRE_FORMAT_VERSION,
            bytes: vec![0xFF, 15, b't', 1],
            transferred_buffers: vec![vec![1]],
            shared_buffers: Vec::new(),
        };
        let mut de = Deserializer::new(&data, &[]).unwrap();
        assert!(matches!(de.read_value(), Err(CloneError::Malformed(_))));
    }
}
