/// Errors that can occur during framing and byte stuffing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in a single stuffed frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The stuffed frame would contain a separator before its end, so the
    /// receiver would split it early.
    #[error("payload cannot be framed: separator at frame offset {offset}")]
    Unframeable { offset: usize },

    /// A stuffed buffer does not carry a valid zero chain.
    #[error("corrupt stuffed frame: {0}")]
    Corrupt(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The payload could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
