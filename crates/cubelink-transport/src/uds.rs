use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::CubeStream;

/// Unix domain socket transport.
///
/// QEMU's socket chardev listens on a filesystem path and the host side
/// connects to it.
pub struct UnixDomainSocket;

impl UnixDomainSocket {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    pub const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    pub const MAX_PATH_LEN: usize = 104;

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<CubeStream> {
        let path = path.as_ref();
        Self::check_path_len(path)?;

        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(CubeStream::from_unix(stream))
    }

    /// Reject paths that do not fit in `sockaddr_un`.
    pub fn check_path_len(path: &Path) -> Result<()> {
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(())
    }
}

/// Remove a channel artifact left behind by a previous, uncleanly terminated
/// run.
///
/// Any non-directory entry (socket, symlink, regular file, fifo) is removed;
/// a directory at `path` is an error. Returns whether something was removed.
pub fn remove_stale(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(TransportError::Io(err)),
    };

    if metadata.file_type().is_dir() {
        return Err(TransportError::StaleArtifact {
            path: path.to_path_buf(),
            reason: "existing path is a directory".to_string(),
        });
    }

    debug!(?path, "removing stale channel artifact");
    std::fs::remove_file(path).map_err(|e| TransportError::StaleArtifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(true)
}
