use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Errors that can occur while supervising a cube.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] cubelink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] cubelink_frame::FrameError),

    /// The operation is not valid in the cube's current lifecycle state.
    #[error("invalid cube state: {0}")]
    ProcessState(#[from] StateError),

    /// Preparing host-side files (staged assets, log directories) failed.
    #[error("staging failed at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The emulator process could not be launched.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The channel did not appear before the startup deadline.
    #[error("channel {path} did not appear within {timeout:?}")]
    StartupTimeout { path: PathBuf, timeout: Duration },

    /// The emulator exited before creating its channel.
    #[error("emulator exited before creating {path} ({status})")]
    ChildExited { path: PathBuf, status: ExitStatus },

    /// A cube passed to `select_on` has no active channel.
    #[error("cube {0} has no active channel")]
    NoChannel(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Waiting on or signalling the child process failed.
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Only spawned cubes own a process that can be started.
    #[error("cube is attached to an external process")]
    Attached,

    /// `start` was called twice.
    #[error("cube is already started")]
    AlreadyStarted,

    /// Stopped is terminal.
    #[error("cube has been stopped")]
    Stopped,

    /// No channel is open.
    #[error("cube is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, SimError>;
