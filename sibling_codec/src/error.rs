use thiserror::Error;

/// Errors raised while encoding or decoding structured values.
///
/// Messages for values that cannot be cloned follow the engine's wording
/// (`"#<CryptoKey> could not be cloned."`) so they read the same on both sides
/// of a sibling boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloneError {
    #[error("{0} could not be cloned.")]
    NotCloneable(String),

    #[error("An ArrayBuffer is detached and could not be cloned.")]
    DetachedBuffer,

    #[error(
        "ArrayBuffer at index {0} is a duplicate of an earlier ArrayBuffer. Duplicate transfers are not allowed."
    )]
    DuplicateTransfer(usize),

    #[error("SharedArrayBuffer cannot be sent across this boundary")]
    SharedBufferNotAllowed,

    #[error("Host object could not be written: {0}")]
    HostObjectWrite(String),

    #[error("Host object could not be read: {0}")]
    HostObjectRead(String),

    #[error("Unknown host object tag '{0}'")]
    UnknownHostObject(String),

    #[error("Wire format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Unable to deserialize cloned data: {0}")]
    Malformed(String),

    #[error("Unable to deserialize cloned data: unexpected end of input")]
    UnexpectedEnd,

    #[error("Maximum nesting depth of {0} exceeded")]
    DepthExceeded(usize),
}

pub type Result<T> = std::result::Result<T, CloneError>;
