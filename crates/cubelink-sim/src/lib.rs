//! Supervision of QEMU-backed virtual cubes.
//!
//! A [`CubeProcess`] either launches its own emulator ([`CubeProcess::spawn`]
//! then [`start`](CubeProcess::start)) or attaches to one that is already
//! serving a channel ([`CubeProcess::attach`]). Messages travel over a
//! [`cubelink_frame::FrameTransport`]; [`select_on`] waits on many cubes at
//! once.

pub mod config;
pub mod control;
#[cfg(unix)]
pub mod cube;
pub mod error;
pub mod launch;
pub mod registry;
#[cfg(unix)]
pub mod select;
pub mod staging;

pub use config::{BinariesConfig, LoggingConfig, QemuConfig, SimConfig, CONFIG_ENV};
pub use control::{SimMessage, SystemAction};
#[cfg(unix)]
pub use cube::{CubeProcess, CubeState};
pub use error::{Result, SimError, StateError};
pub use registry::{CubeId, CubeRegistry};
#[cfg(unix)]
pub use select::{select_on, select_on_with};
