use procmesh_frame::RemoteFault;

/// Errors that can occur on a channel or on one of its calls.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer presented a wrong magic number. Fatal to the channel.
    #[error("handshake mismatch: expected magic 0x{expected:08X}, got 0x{actual:08X}")]
    HandshakeMismatch { expected: u32, actual: u32 },

    /// The handshake did not complete within the configured timeout.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// The handshake broke down for a non-magic reason (wrong frame kind,
    /// stream closed mid-exchange).
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The transport is broken; every call pending on this channel fails
    /// with this error.
    #[error("channel faulted: {0}")]
    Faulted(String),

    /// The call was cancelled locally. The remote side may still run to
    /// completion.
    #[error("call cancelled")]
    Cancelled,

    /// The remote endpoint failed. Call-scoped; the channel stays healthy.
    #[error("remote invocation failed: {0}")]
    Remote(RemoteFault),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] procmesh_frame::FrameError),

    /// An I/O error occurred on the underlying stream.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
