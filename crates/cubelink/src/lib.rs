//! Framed message channels to QEMU-backed virtual cubes.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte channels (Unix sockets, serial devices) and poll readiness
//! - [`frame`]: COWS byte stuffing and separator-delimited framing
//! - [`sim`]: cube supervision: spawn, attach, stop, `select_on` (behind `sim` feature)

/// Re-export transport types.
pub mod transport {
    pub use cubelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cubelink_frame::*;
}

/// Re-export cube supervision types (requires `sim` feature).
#[cfg(feature = "sim")]
pub mod sim {
    pub use cubelink_sim::*;
}
