//! Separator-delimited message framing for cube channels.
//!
//! Every message travels as one frame:
//! - a 2-byte overhead word
//! - the payload, COWS-stuffed so it holds no word-aligned `00 00`
//! - a `00 00` separator
//!
//! [`FrameTransport`] owns the receive-side buffering, so callers only ever
//! see whole messages.

pub mod codec;
pub mod cows;
pub mod error;
pub mod reader;
pub mod transport;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, SEPARATOR};
pub use cows::{stuff, unstuff, MAX_STUFFED_LEN, OVERHEAD_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use transport::FrameTransport;
pub use writer::{write_fully, FrameWriter};
