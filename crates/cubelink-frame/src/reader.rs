use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use cubelink_transport::Channel;
use tracing::{debug, trace, warn};

use crate::codec::{find_separator, FrameConfig, SEPARATOR};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Receive-side framing state.
///
/// Bytes arrive in arbitrary pieces. The reader accumulates them in a pending
/// buffer, splits off every complete body as soon as its separator shows up,
/// and queues the still-stuffed bodies in arrival order. A separator split
/// across two reads is found because each scan restarts one byte before the
/// newly appended data.
///
/// Like [`FrameWriter`](crate::FrameWriter), the reader borrows the channel
/// per call instead of owning it.
#[derive(Debug)]
pub struct FrameReader {
    synced: bool,
    pending: BytesMut,
    queue: VecDeque<BytesMut>,
    max_frame_body: usize,
}

impl FrameReader {
    /// Create an unsynchronized reader.
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            synced: false,
            pending: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            queue: VecDeque::new(),
            max_frame_body: config.max_frame_body(),
        }
    }

    /// Whether a separator has been seen since creation or the last desync.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Number of complete bodies waiting to be decoded.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Bytes received after the last separator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the oldest complete (still stuffed) body.
    pub fn pop_body(&mut self) -> Option<BytesMut> {
        self.queue.pop_front()
    }

    /// Consume single bytes until a separator has been read.
    ///
    /// Everything before the separator is discarded. A byte left over from an
    /// earlier desync still counts as the first half of a separator.
    pub fn sync<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let mut prev = self.pending.last().copied();
        self.pending.clear();

        let mut skipped = 0usize;
        let mut byte = [0u8; 1];
        loop {
            read_some(reader, &mut byte)?;
            if prev == Some(SEPARATOR[0]) && byte[0] == SEPARATOR[1] {
                break;
            }
            prev = Some(byte[0]);
            skipped += 1;
        }

        self.synced = true;
        debug!(skipped, "synchronized to frame separator");
        Ok(())
    }

    /// Read whatever the channel has and split it into frames.
    ///
    /// The first read blocks; after that the reader only drains what the
    /// channel reports as immediately available. Returns the number of bytes
    /// consumed.
    pub fn fill<C: Channel + ?Sized>(&mut self, channel: &mut C) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        let mut total = read_some(channel, &mut chunk)?;
        self.ingest(&chunk[..total]);

        loop {
            let available = channel.bytes_available()?;
            if available == 0 {
                break;
            }
            let want = available.min(READ_CHUNK_SIZE);
            let read = read_some(channel, &mut chunk[..want])?;
            self.ingest(&chunk[..read]);
            total += read;
        }

        trace!(bytes = total, queued = self.queue.len(), "filled frame reader");
        Ok(total)
    }

    /// Append received bytes and split off any completed bodies.
    pub fn ingest(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let scan_from = self.pending.len().saturating_sub(1);
        self.pending.extend_from_slice(data);
        self.split_frames(scan_from);
    }

    fn split_frames(&mut self, mut scan_from: usize) {
        loop {
            if !self.synced {
                match find_separator(&self.pending, scan_from) {
                    Some(pos) => {
                        self.pending.advance(pos + SEPARATOR.len());
                        self.synced = true;
                        debug!(skipped = pos, "resynchronized to frame separator");
                        scan_from = 0;
                    }
                    None => {
                        self.keep_tail();
                        return;
                    }
                }
            }

            match find_separator(&self.pending, scan_from) {
                Some(pos) => {
                    let body = self.pending.split_to(pos);
                    self.pending.advance(SEPARATOR.len());
                    self.push_body(body);
                    scan_from = 0;
                }
                None => {
                    // One extra byte may be the first half of the next separator.
                    if self.pending.len() > self.max_frame_body + 1 {
                        warn!(
                            pending = self.pending.len(),
                            max = self.max_frame_body,
                            "no separator within maximum frame size; resynchronizing"
                        );
                        self.synced = false;
                        self.keep_tail();
                    }
                    return;
                }
            }
        }
    }

    fn push_body(&mut self, body: BytesMut) {
        if body.is_empty() {
            debug!("skipping empty frame between adjacent separators");
            return;
        }
        if body.len() > self.max_frame_body {
            warn!(
                size = body.len(),
                max = self.max_frame_body,
                "discarding oversized frame"
            );
            return;
        }
        self.queue.push_back(body);
    }

    fn keep_tail(&mut self) {
        let drop = self.pending.len().saturating_sub(1);
        self.pending.advance(drop);
    }
}

/// Read at least one byte, retrying interrupted calls.
fn read_some<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
