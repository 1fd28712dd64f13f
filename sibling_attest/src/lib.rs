//! # Sibling Attestation Channel
//!
//! A narrow, synchronous request/response channel to the Nitro Secure Module
//! device. Requests must be smaller than [`MAX_REQUEST_LEN`] bytes; every
//! response is exactly [`RESPONSE_LEN`] bytes, returned verbatim with no
//! interpretation of its contents.
//!
//! On Linux [`AttestationChannel::open`] opens `/dev/nsm`. Elsewhere the channel
//! is created in unsupported mode and every request fails with
//! [`AttestationError::Unsupported`].

pub mod device;
pub mod error;

pub use device::Device;
pub use error::{AttestationError, Result};

use std::path::Path;

pub const DEFAULT_DEVICE_PATH: &str = "/dev/nsm";

/// Exclusive upper bound on request size.
pub const MAX_REQUEST_LEN: usize = 0x1000;

/// Size of every response buffer.
pub const RESPONSE_LEN: usize = 0x3000;

pub struct AttestationChannel {
    device: Option<Box<dyn Device>>,
}

impl std::fmt::Debug for AttestationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationChannel")
            .field("supported", &self.is_supported())
            .finish()
    }
}

impl AttestationChannel {
    pub fn open() -> Result<Self> {
        Self::open_path(DEFAULT_DEVICE_PATH)
    }

    #[cfg(target_os = "linux")]
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let device = device::NsmDevice::open(path.as_ref())?;
        Ok(Self::with_device(Box::new(device)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        tracing::warn!(
            path = %path.as_ref().display(),
            "attestation device unsupported on this platform"
        );
        Ok(Self::unsupported())
    }

    pub fn with_device(device: Box<dyn Device>) -> Self {
        Self {
            device: Some(device),
        }
    }

    /// A channel with no device behind it.
    pub fn unsupported() -> Self {
        Self { device: None }
    }

    pub fn is_supported(&self) -> bool {
        self.device.is_some()
    }

    /// Perform one exchange. Blocks the calling thread for the duration of
    /// the device call.
    pub fn request(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let device = self.device.as_mut().ok_or(AttestationError::Unsupported)?;
        if request.len() >= MAX_REQUEST_LEN {
            return Err(AttestationError::RequestTooLarge { len: request.len() });
        }

        let mut response = vec![0u8; RESPONSE_LEN];
        device.exchange(request, &mut response).map_err(|e| {
            tracing::error!(error = %e, request_len = request.len(), "attestation exchange failed");
            AttestationError::Fatal(e)
        })?;
        tracing::debug!(request_len = request.len(), "attestation exchange complete");
        Ok(response)
    }

    pub fn close(mut self) -> Result<()> {
        match self.device.take() {
            Some(device) => device.close().map_err(AttestationError::Fatal),
            None => Ok(()),
        }
    }
}
