use bytes::Bytes;
use cubelink_transport::Channel;
#[cfg(unix)]
use cubelink_transport::{CubeStream, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{decode_frame, FrameConfig, SEPARATOR};
use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::writer::{write_fully, FrameWriter};

/// Bidirectional message transport over one byte channel.
///
/// Construction writes a single separator so the peer can synchronize on the
/// first real frame. Reads synchronize lazily on first use.
#[derive(Debug)]
pub struct FrameTransport<C> {
    channel: C,
    reader: FrameReader,
    writer: FrameWriter,
    config: FrameConfig,
}

impl<C: Channel> FrameTransport<C> {
    /// Create a transport with default configuration.
    pub fn new(channel: C) -> Result<Self> {
        Self::with_config(channel, FrameConfig::default())
    }

    /// Create a transport with explicit configuration.
    pub fn with_config(mut channel: C, config: FrameConfig) -> Result<Self> {
        write_fully(&mut channel, &SEPARATOR, config.write_timeout)?;
        debug!("frame transport ready");

        Ok(Self {
            reader: FrameReader::new(&config),
            writer: FrameWriter::new(config.max_payload_size, config.write_timeout),
            channel,
            config,
        })
    }

    /// Send one message (blocking until fully written).
    pub fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.send(&mut self.channel, payload)
    }

    /// Receive the next message (blocking).
    ///
    /// Frames that fail to unstuff are logged and dropped; the call keeps
    /// reading until a valid one arrives.
    pub fn read_message(&mut self) -> Result<Bytes> {
        loop {
            while let Some(body) = self.reader.pop_body() {
                match decode_frame(body) {
                    Ok(payload) => return Ok(payload),
                    Err(FrameError::Corrupt(reason)) => {
                        warn!(%reason, "discarding corrupt frame");
                    }
                    Err(err) => return Err(err),
                }
            }

            if !self.reader.is_synced() {
                self.reader.sync(&mut self.channel)?;
            }
            self.reader.fill(&mut self.channel)?;
        }
    }

    /// Serialize `message` as JSON and send it.
    pub fn write_message_as<M: Serialize + ?Sized>(&mut self, message: &M) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.write_message(&payload)
    }

    /// Receive the next message and parse it as JSON.
    pub fn read_message_as<M: DeserializeOwned>(&mut self) -> Result<M> {
        let payload = self.read_message()?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Whether complete frames are already queued, so that
    /// [`read_message`](Self::read_message) may return without touching the
    /// channel.
    pub fn has_buffered(&self) -> bool {
        self.reader.queued() > 0
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &C {
        &self.channel
    }

    /// Mutably borrow the underlying channel.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Consume the transport and return the channel. Queued frames are lost.
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(unix)]
impl FrameTransport<CubeStream> {
    /// Create a transport for a [`CubeStream`], applying the configured timeouts.
    pub fn with_config_stream(stream: CubeStream, config: FrameConfig) -> Result<Self> {
        stream
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        stream
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Self::with_config(stream, config)
    }
}

#[cfg(unix)]
fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Poll(io) => FrameError::Io(io),
        TransportError::Connect { source, .. }
        | TransportError::Open { source, .. }
        | TransportError::Serial { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
