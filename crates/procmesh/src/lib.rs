//! Umbrella crate for the procmesh stack.
//!
//! Re-exports the layered crates so applications depend on one name:
//!
//! - [`frame`]: length-prefixed wire frames and the handshake magic
//!   numbers.
//! - [`channel`]: one duplex stream turned into a multiplexed,
//!   cancellable call transport.
//! - [`cluster`]: process broker, endpoint registry, lifecycle and
//!   typed proxies.
//!
//! The `procmesh-host` binary in this crate is the stock subordinate
//! process: it connects back to the socket its parent passes on the
//! command line and serves the built-in diagnostic endpoints. Real
//! deployments embed [`cluster::run_host`] in their own binary with
//! their own [`cluster::EndpointFactory`].

pub use procmesh_channel as channel;
pub use procmesh_cluster as cluster;
pub use procmesh_frame as frame;

pub mod builtin;
pub mod logging;

pub use builtin::builtin_factory;
