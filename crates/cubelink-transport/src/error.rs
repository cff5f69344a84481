use std::path::PathBuf;

/// Errors that can occur in cube channel operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the socket at the specified path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to open the device at the specified path.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuring the serial line failed.
    #[error("failed to configure serial line {path}: {source}")]
    Serial {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// A leftover artifact at a channel path could not be cleared.
    #[error("cannot clear stale channel artifact at {path}: {reason}")]
    StaleArtifact { path: PathBuf, reason: String },

    /// Waiting for readiness failed.
    #[error("poll failed: {0}")]
    Poll(std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
