/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame type discriminator is not a known frame kind.
    #[error("unknown frame type 0x{0:02X}")]
    UnknownFrameType(u8),

    /// A `CallResponse` status byte is neither ok nor fault.
    #[error("unknown call response status 0x{0:02X}")]
    UnknownResponseStatus(u8),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A complete frame arrived but its payload is shorter than its
    /// type-specific fields require.
    #[error("truncated {frame} payload ({len} bytes)")]
    TruncatedPayload { frame: &'static str, len: usize },

    /// A call frame carries a string field that is not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// A remote fault body could not be serialized or deserialized.
    #[error("fault body error: {0}")]
    FaultBody(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
