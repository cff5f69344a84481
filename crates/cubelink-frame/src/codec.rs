use bytes::{BufMut, Bytes, BytesMut};

use crate::cows::{self, MAX_STUFFED_LEN, OVERHEAD_SIZE};
use crate::error::{FrameError, Result};

/// Frame separator: one all-zero word.
pub const SEPARATOR: [u8; 2] = [0x00, 0x00];

/// Default (and largest) payload size: whatever still fits the COWS word
/// distance range once the overhead word is added.
pub const DEFAULT_MAX_PAYLOAD: usize = MAX_STUFFED_LEN - OVERHEAD_SIZE;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────────────┬──────────────┐
/// │ Overhead (2B)│ COWS-stuffed payload     │ Separator    │
/// │ BE distance  │ (no aligned 00 00 word)  │ 0x00 0x00    │
/// └──────────────┴──────────────────────────┴──────────────┘
/// ```
///
/// The receiver splits at the first `00 00` pair in the byte stream, aligned
/// or not. Payloads whose stuffed form holds such a pair before the final
/// separator are rejected with [`FrameError::Unframeable`] and nothing is
/// appended to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > DEFAULT_MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: DEFAULT_MAX_PAYLOAD,
        });
    }

    let mut body = BytesMut::with_capacity(OVERHEAD_SIZE + payload.len() + SEPARATOR.len());
    body.put_bytes(0, OVERHEAD_SIZE);
    body.put_slice(payload);
    cows::stuff(&mut body)?;
    body.put_slice(&SEPARATOR);

    // Stuffing only removes aligned zero words; an odd-offset pair would
    // still end the frame early on the receiving side.
    let end = body.len() - SEPARATOR.len();
    if let Some(offset) = find_separator(&body, 0).filter(|&pos| pos != end) {
        return Err(FrameError::Unframeable { offset });
    }

    dst.put_slice(&body);
    Ok(())
}

/// Decode one frame body (everything between two separators).
///
/// Unstuffs the body and strips the overhead word, leaving the payload.
pub fn decode_frame(mut body: BytesMut) -> Result<Bytes> {
    if body.len() < OVERHEAD_SIZE {
        return Err(FrameError::Corrupt(format!(
            "frame body of {} bytes has no overhead word",
            body.len()
        )));
    }

    cows::unstuff(&mut body)?;
    let _overhead = body.split_to(OVERHEAD_SIZE);
    Ok(body.freeze())
}

/// Find the first separator in `buf` at or after byte `from`.
pub fn find_separator(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < SEPARATOR.len() || from > buf.len() - SEPARATOR.len() {
        return None;
    }
    buf[from..]
        .windows(SEPARATOR.len())
        .position(|window| window == SEPARATOR)
        .map(|pos| from + pos)
}

/// Configuration for the frame transport.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: [`DEFAULT_MAX_PAYLOAD`].
    ///
    /// Incoming data that runs longer than this without a separator is
    /// treated as loss of synchronization.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl FrameConfig {
    /// Longest frame body (overhead plus stuffed payload) accepted on read.
    pub fn max_frame_body(&self) -> usize {
        self.max_payload_size.min(DEFAULT_MAX_PAYLOAD) + OVERHEAD_SIZE
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
