//! The device behind an [`AttestationChannel`](crate::AttestationChannel).

use std::io;

/// One request/response exchange with a security module.
///
/// `exchange` is called with a request already checked against the size
/// ceiling and a zero-filled response buffer of exactly
/// [`RESPONSE_LEN`](crate::RESPONSE_LEN) bytes. It performs one round trip and
/// does not retry.
pub trait Device: Send {
    fn exchange(&mut self, request: &[u8], response: &mut [u8]) -> io::Result<()>;

    fn close(self: Box<Self>) -> io::Result<()>;
}

#[cfg(target_os = "linux")]
pub use linux::NsmDevice;

#[cfg(target_os = "linux")]
mod linux {
    use super::Device;
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::{AsRawFd, IntoRawFd};
    use std::path::Path;

    /// `struct { struct iovec request; struct iovec response; }` as the
    /// driver reads it.
    #[repr(C)]
    struct NsmMessage {
        request: libc::iovec,
        response: libc::iovec,
    }

    const IOC_READ: u64 = 2;
    const NSM_IOCTL_MAGIC: u64 = 0x0A;

    /// `_IOR(0x0A, 0, struct NsmMessage)`
    const NSM_IOCTL_REQUEST: u64 = (IOC_READ << 30)
        | ((std::mem::size_of::<NsmMessage>() as u64) << 16)
        | (NSM_IOCTL_MAGIC << 8);

    /// Character device opened read-write; one ioctl per exchange.
    #[derive(Debug)]
    pub struct NsmDevice {
        file: File,
    }

    impl NsmDevice {
        pub fn open(path: &Path) -> io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            tracing::debug!(path = %path.display(), "opened attestation device");
            Ok(Self { file })
        }
    }

    impl Device for NsmDevice {
        fn exchange(&mut self, request: &[u8], response: &mut [u8]) -> io::Result<()> {
            let mut message = NsmMessage {
                request: libc::iovec {
                    iov_base: request.as_ptr() as *mut libc::c_void,
                    iov_len: request.len(),
                },
                response: libc::iovec {
                    iov_base: response.as_mut_ptr().cast(),
                    iov_len: response.len(),
                },
            };
            // SAFETY: both iovecs point at live buffers of the stated length
            // for the duration of the call; the driver only reads the request
            // and writes at most `response.len()` bytes.
            let rc = unsafe {
                libc::ioctl(
                    self.file.as_raw_fd(),
                    NSM_IOCTL_REQUEST as _,
                    &mut message as *mut NsmMessage,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn close(self: Box<Self>) -> io::Result<()> {
            let fd = self.file.into_raw_fd();
            // SAFETY: `fd` was just released from the `File`, so nothing else
            // owns or closes it.
            if unsafe { libc::close(fd) } < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_ioctl_request_number() {
            // 64-bit: two iovecs are 32 bytes.
            if std::mem::size_of::<usize>() == 8 {
                assert_eq!(NSM_IOCTL_REQUEST, 0x8020_0A00);
            }
        }
    }
}
