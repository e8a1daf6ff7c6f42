//! One duplex byte stream, turned into a safe multiplexed call transport.
//!
//! An [`IpcChannel`] owns the stream: it runs the magic-number handshake,
//! a single reader loop and a serialized writer task. The
//! [`CallMultiplexer`] layered on top assigns correlation ids to outgoing
//! calls, matches inbound responses to pending calls and routes in-band
//! cancellation frames.

pub mod channel;
pub mod error;
pub mod handshake;
pub mod mux;

pub use channel::{ChannelConfig, ChannelState, IpcChannel};
pub use error::{ChannelError, Result};
pub use handshake::HandshakeConfig;
pub use mux::{CallMultiplexer, InboundService};
