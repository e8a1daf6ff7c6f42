//! Length-prefixed protocol frames for the procmesh IPC transport.
//!
//! Every message on the wire is framed with:
//! - A 4-byte little-endian payload length (type byte + body)
//! - A 1-byte frame type discriminator
//!
//! Handshake frames carry a single 32-bit magic number. Call frames carry
//! a correlation id plus an opaque serialized payload; the codec never
//! inspects argument bytes.

pub mod codec;
pub mod error;

pub use codec::{
    decode_frame, encode_frame, CallResult, IpcFrame, RemoteFault, DEFAULT_MAX_PAYLOAD,
    HANDSHAKE_REQUEST_MAGIC, HANDSHAKE_RESPONSE_MAGIC, HEADER_SIZE,
};
pub use error::{FrameError, Result};
