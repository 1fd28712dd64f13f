//! Tag bytes and integer encodings of the wire format.

pub(crate) const VERSION_TAG: u8 = 0xFF;
pub(crate) const PADDING: u8 = 0x00;

pub(crate) const UNDEFINED: u8 = b'_';
pub(crate) const NULL: u8 = b'0';
pub(crate) const TRUE: u8 = b'T';
pub(crate) const FALSE: u8 = b'F';
pub(crate) const INT32: u8 = b'I';
pub(crate) const UINT32: u8 = b'U';
pub(crate) const DOUBLE: u8 = b'N';
pub(crate) const BIGINT: u8 = b'Z';
pub(crate) const UTF8_STRING: u8 = b'S';
pub(crate) const ONE_BYTE_STRING: u8 = b'"';
pub(crate) const TWO_BYTE_STRING: u8 = b'c';
pub(crate) const DATE: u8 = b'D';
pub(crate) const BEGIN_OBJECT: u8 = b'o';
pub(crate) const END_OBJECT: u8 = b'{';
pub(crate) const BEGIN_DENSE_ARRAY: u8 = b'A';
pub(crate) const END_DENSE_ARRAY: u8 = b'$';
pub(crate) const BEGIN_MAP: u8 = b';';
pub(crate) const END_MAP: u8 = b':';
pub(crate) const BEGIN_SET: u8 = b'\'';
pub(crate) const END_SET: u8 = b',';
pub(crate) const ARRAY_BUFFER: u8 = b'B';
pub(crate) const ARRAY_BUFFER_TRANSFER: u8 = b't';
pub(crate) const SHARED_ARRAY_BUFFER: u8 = b'u';
pub(crate) const HOST_OBJECT: u8 = b'\\';

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub(crate) fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Read the version header, if present, without consuming anything.
pub(crate) fn peek_version(bytes: &[u8]) -> Option<u32> {
    if bytes.first() != Some(&VERSION_TAG) {
        return None;
    }
    let mut result: u64 = 0;
    for (i, byte) in bytes[1..].iter().take(5).enumerate() {
        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return u32::try_from(result).ok();
        }
    }
    None
}
