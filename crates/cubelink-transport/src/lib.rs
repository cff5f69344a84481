//! Byte-stream channels to virtual cubes.
//!
//! A cube VM exposes its serial port either as a Unix domain socket (QEMU
//! `-chardev socket`) or as a character device. This crate hides the
//! difference behind [`CubeStream`] and the [`Channel`] trait, and provides
//! the `poll(2)` based readiness primitive used to wait on many channels at
//! once.
//!
//! This is the lowest layer of cubelink. Everything else builds on top of
//! the types provided here.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod readiness;
#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::Channel;

#[cfg(unix)]
pub use readiness::{PollReadiness, Readiness};
#[cfg(unix)]
pub use traits::CubeStream;
#[cfg(unix)]
pub use uds::{remove_stale, UnixDomainSocket};
