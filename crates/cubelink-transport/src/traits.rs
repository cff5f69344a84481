use std::io::{Read, Write};

/// A byte-stream endpoint that frames can be read from and written to.
///
/// On top of `Read + Write`, a channel must report how much data can be read
/// without blocking, so that the framing layer can drain a burst of input
/// after its first blocking read.
pub trait Channel: Read + Write {
    /// Number of bytes that can be read right now without blocking.
    fn bytes_available(&self) -> std::io::Result<usize>;
}

#[cfg(unix)]
pub use self::unix::CubeStream;

#[cfg(unix)]
mod unix {
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Write};
    use std::os::fd::{AsRawFd, RawFd};
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::time::Duration;

    use tracing::debug;

    use super::Channel;
    use crate::error::{Result, TransportError};
    use crate::serial;
    use crate::uds::UnixDomainSocket;

    /// A connected cube channel; implements [`Channel`].
    ///
    /// This is the fundamental I/O type returned by transport operations.
    /// It wraps either a Unix domain socket (QEMU socket chardev) or a
    /// character device such as a pty or a real serial port.
    pub struct CubeStream {
        inner: CubeStreamInner,
    }

    enum CubeStreamInner {
        Unix(UnixStream),
        Device(File),
    }

    impl CubeStream {
        /// Open the channel at `path`.
        ///
        /// Unix sockets are connected to; anything else is opened read/write
        /// as a device. Terminals are switched to raw 8N1 at
        /// [`serial::DEFAULT_BAUD_RATE`].
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let metadata = std::fs::metadata(path).map_err(|e| TransportError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;

            if metadata.file_type().is_socket() {
                return UnixDomainSocket::connect(path);
            }

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| TransportError::Open {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            serial::configure_raw(&file, path, serial::DEFAULT_BAUD_RATE)?;
            debug!(?path, "opened cube device");
            Ok(Self::from_device(file))
        }

        pub(crate) fn from_unix(stream: UnixStream) -> Self {
            Self {
                inner: CubeStreamInner::Unix(stream),
            }
        }

        pub(crate) fn from_device(file: File) -> Self {
            Self {
                inner: CubeStreamInner::Device(file),
            }
        }

        /// Set read timeout on the underlying stream.
        ///
        /// Only sockets support timeouts; a device rejects `Some(_)`.
        pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
            match &self.inner {
                CubeStreamInner::Unix(stream) => {
                    stream.set_read_timeout(timeout).map_err(Into::into)
                }
                CubeStreamInner::Device(_) => device_timeout(timeout),
            }
        }

        /// Set write timeout on the underlying stream.
        pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
            match &self.inner {
                CubeStreamInner::Unix(stream) => {
                    stream.set_write_timeout(timeout).map_err(Into::into)
                }
                CubeStreamInner::Device(_) => device_timeout(timeout),
            }
        }

        /// Short transport name for diagnostics.
        pub fn transport_name(&self) -> &'static str {
            match &self.inner {
                CubeStreamInner::Unix(_) => "unix-domain-socket",
                CubeStreamInner::Device(_) => "device",
            }
        }
    }

    fn device_timeout(timeout: Option<Duration>) -> Result<()> {
        match timeout {
            None => Ok(()),
            Some(_) => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "timeouts are not supported on device channels",
            ))),
        }
    }

    impl Read for CubeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match &mut self.inner {
                CubeStreamInner::Unix(stream) => stream.read(buf),
                CubeStreamInner::Device(file) => file.read(buf),
            }
        }
    }

    impl Write for CubeStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match &mut self.inner {
                CubeStreamInner::Unix(stream) => stream.write(buf),
                CubeStreamInner::Device(file) => file.write(buf),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            match &mut self.inner {
                CubeStreamInner::Unix(stream) => stream.flush(),
                CubeStreamInner::Device(file) => file.flush(),
            }
        }
    }

    impl AsRawFd for CubeStream {
        fn as_raw_fd(&self) -> RawFd {
            match &self.inner {
                CubeStreamInner::Unix(stream) => stream.as_raw_fd(),
                CubeStreamInner::Device(file) => file.as_raw_fd(),
            }
        }
    }

    impl Channel for CubeStream {
        fn bytes_available(&self) -> std::io::Result<usize> {
            bytes_available(self.as_raw_fd())
        }
    }

    impl Channel for UnixStream {
        fn bytes_available(&self) -> std::io::Result<usize> {
            bytes_available(self.as_raw_fd())
        }
    }

    impl Channel for File {
        fn bytes_available(&self) -> std::io::Result<usize> {
            bytes_available(self.as_raw_fd())
        }
    }

    /// Query `FIONREAD` on a descriptor.
    fn bytes_available(fd: RawFd) -> std::io::Result<usize> {
        let mut available: libc::c_int = 0;

        // SAFETY: `available` is a valid writable c_int and `fd` is an open
        // descriptor borrowed from a live stream for the duration of the call.
        let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut available as *mut libc::c_int) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(available.max(0) as usize)
    }

    impl std::fmt::Debug for CubeStream {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CubeStream")
                .field("type", &self.transport_name())
                .field("fd", &self.as_raw_fd())
                .finish()
        }
    }

}
