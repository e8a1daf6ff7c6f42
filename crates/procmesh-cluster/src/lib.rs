//! Process cluster orchestration over procmesh channels.
//!
//! A [`ProcessCluster`] is a master process plus the subordinate
//! processes its [`ProcessBroker`] has launched. Each process hosts an
//! [`EndpointRegistry`] behind an [`EndpointHost`]; callers reach
//! endpoints through [`ProcessProxy`] handles addressed by
//! [`EndpointAddress`] paths of the form `/processId/endpointId`.
//!
//! The master's own registry sits behind an in-memory loopback channel,
//! so local and remote endpoints are called through the same wire path.

pub mod address;
pub mod broker;
pub mod cluster;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod launcher;
pub mod proxy;
pub mod registry;
pub mod types;

pub use address::EndpointAddress;
pub use broker::{ProcessBroker, ProcessRecord};
pub use cluster::{ClusterConfig, ProcessCluster};
pub use endpoint::{Endpoint, EndpointContext, EndpointFactory, InvocationFault};
pub use error::{faults, ClusterError, Result};
pub use host::{EndpointHost, REGISTRY_CREATE, REGISTRY_DESTROY};
#[cfg(unix)]
pub use host::run_host;
#[cfg(unix)]
pub use launcher::OsProcessLauncher;
pub use launcher::{BoxedDuplex, IpcStream, Launched, LoopbackLauncher, ProcessLauncher};
pub use proxy::{ProcessProxy, RemoteInterface};
pub use registry::{EndpointLifecycle, EndpointRegistry};
pub use types::{
    EndpointCreationRequest, ProcessCreationInfo, ProcessCreationOptions, ProcessCreationRequest,
    TargetFramework, TargetFrameworkKind,
};
