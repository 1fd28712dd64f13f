use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("NSM request too large: {len} bytes (limit is {} exclusive)", crate::MAX_REQUEST_LEN)]
    RequestTooLarge { len: usize },

    #[error("the attestation device is not supported on this platform")]
    Unsupported,

    #[error("attestation device failure: {0}")]
    Fatal(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, AttestationError>;
