use procmesh_channel::ChannelError;
use procmesh_frame::RemoteFault;

use crate::types::TargetFrameworkKind;

/// Well-known remote fault type names used on the wire.
pub mod faults {
    pub const ENDPOINT_NOT_FOUND: &str = "EndpointNotFound";
    pub const ENDPOINT_ALREADY_EXISTS: &str = "EndpointAlreadyExists";
    pub const ENDPOINT_INITIALIZATION_FAILED: &str = "EndpointInitializationFailed";
    pub const BAD_REQUEST: &str = "BadRequest";
    pub const CANCELLED: &str = "Cancelled";
}

/// Errors surfaced by cluster, broker, registry and proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// `ThrowIfExists` was set and the process id is already registered.
    #[error("process '{0}' already exists")]
    ProcessAlreadyExists(String),

    /// The endpoint id is already taken within its process.
    #[error("endpoint already exists: {0}")]
    EndpointAlreadyExists(String),

    /// OS-level spawn failure (binary missing, exec error, accept failure).
    #[error("failed to launch process '{process}': {source}")]
    ProcessLaunchFailure {
        process: String,
        #[source]
        source: std::io::Error,
    },

    /// No subordinate binary is configured for the requested framework.
    #[error("no binary configured for target framework {0:?}")]
    TargetFrameworkUnsupported(TargetFrameworkKind),

    /// The addressed process is not part of this cluster.
    #[error("process '{0}' not found")]
    ProcessNotFound(String),

    /// The call was addressed to an unknown endpoint.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The remote endpoint threw; carries the remote type and message.
    /// Call-scoped, never faults the channel.
    #[error("remote invocation failed: {0}")]
    RemoteInvocation(RemoteFault),

    /// The transport to the addressed process is broken.
    #[error("channel faulted: {0}")]
    ChannelFaulted(String),

    /// The handshake with the subordinate process failed. Fatal to that
    /// channel; not retried automatically.
    #[error("handshake failed: {0}")]
    Handshake(#[source] ChannelError),

    /// The call was cancelled locally (cooperative).
    #[error("call cancelled")]
    Cancelled,

    /// A malformed endpoint address.
    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),

    /// Creation envelope or result failed to (de)serialize.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<ChannelError> for ClusterError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Remote(fault) => match fault.error_type.as_str() {
                faults::ENDPOINT_NOT_FOUND => ClusterError::EndpointNotFound(fault.message),
                faults::ENDPOINT_ALREADY_EXISTS => {
                    ClusterError::EndpointAlreadyExists(fault.message)
                }
                _ => ClusterError::RemoteInvocation(fault),
            },
            ChannelError::Cancelled => ClusterError::Cancelled,
            ChannelError::Faulted(reason) => ClusterError::ChannelFaulted(reason),
            err @ (ChannelError::HandshakeMismatch { .. }
            | ChannelError::HandshakeTimeout(_)
            | ChannelError::HandshakeFailed(_)) => ClusterError::Handshake(err),
            other => ClusterError::ChannelFaulted(other.to_string()),
        }
    }
}

impl ClusterError {
    /// Wire form of this error, for the host side of a call.
    pub fn to_fault(&self) -> RemoteFault {
        match self {
            ClusterError::EndpointNotFound(msg) => {
                RemoteFault::new(faults::ENDPOINT_NOT_FOUND, msg.clone())
            }
            ClusterError::EndpointAlreadyExists(msg) => {
                RemoteFault::new(faults::ENDPOINT_ALREADY_EXISTS, msg.clone())
            }
            ClusterError::RemoteInvocation(fault) => fault.clone(),
            ClusterError::Cancelled => RemoteFault::new(faults::CANCELLED, "call cancelled"),
            ClusterError::InvalidAddress(msg) => {
                RemoteFault::new(faults::BAD_REQUEST, msg.clone())
            }
            ClusterError::Codec(err) => RemoteFault::new(faults::BAD_REQUEST, err.to_string()),
            other => RemoteFault::new("ClusterError", other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
