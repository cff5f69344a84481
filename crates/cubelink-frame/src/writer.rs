use std::io::{self, ErrorKind, Write};
use std::time::Duration;

use bytes::BytesMut;

use crate::codec::{encode_frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Encodes frames and writes them out completely.
///
/// The writer does not own the stream: the transport shares one channel
/// between its reading and writing halves and lends it to each call.
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    max_payload_size: usize,
    write_timeout: Option<Duration>,
}

impl FrameWriter {
    /// Create a writer that rejects payloads above `max_payload_size`.
    ///
    /// `write_timeout` is the send timeout configured on the channel, if any.
    pub fn new(max_payload_size: usize, write_timeout: Option<Duration>) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size: max_payload_size.min(DEFAULT_MAX_PAYLOAD),
            write_timeout,
        }
    }

    /// Stuff, delimit and send a payload (blocking).
    pub fn send<W: Write + ?Sized>(&mut self, inner: &mut W, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;
        write_fully(inner, &self.buf, self.write_timeout)
    }
}

/// Write all of `data`, tolerating short writes, then flush.
///
/// A write that accepts zero bytes means the channel can no longer drain and
/// is reported as [`FrameError::ConnectionClosed`]. `WouldBlock` is retried
/// only when no `write_timeout` is set; with one set, the channel already
/// waited that long and the stall is returned as a `TimedOut` I/O error.
pub fn write_fully<W: Write + ?Sized>(
    inner: &mut W,
    data: &[u8],
    write_timeout: Option<Duration>,
) -> Result<()> {
    let mut offset = 0usize;
    while offset < data.len() {
        match inner.write(&data[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) => retry_or_fail(err, write_timeout, data.len() - offset)?,
        }
    }

    loop {
        match inner.flush() {
            Ok(()) => return Ok(()),
            Err(err) => retry_or_fail(err, write_timeout, 0)?,
        }
    }
}

fn retry_or_fail(err: io::Error, write_timeout: Option<Duration>, unsent: usize) -> Result<()> {
    match (err.kind(), write_timeout) {
        (ErrorKind::Interrupted, _) | (ErrorKind::WouldBlock, None) => Ok(()),
        (ErrorKind::WouldBlock | ErrorKind::TimedOut, Some(timeout)) => {
            Err(FrameError::Io(io::Error::new(
                ErrorKind::TimedOut,
                format!("channel did not drain within {timeout:?} ({unsent} bytes unsent)"),
            )))
        }
        _ => Err(FrameError::Io(err)),
    }
}
