use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use procmesh_frame::RemoteFault;
use tokio_util::sync::CancellationToken;

/// A failure produced by an endpoint invocation.
///
/// `fatal` marks the failure as destroying the endpoint after the
/// response is sent.
#[derive(Debug, Clone)]
pub struct InvocationFault {
    pub fault: RemoteFault,
    pub fatal: bool,
}

impl InvocationFault {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fault: RemoteFault::new(error_type, message),
            fatal: false,
        }
    }

    pub fn fatal(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fault: RemoteFault::new(error_type, message),
            fatal: true,
        }
    }
}

/// Capability interface every hosted endpoint implements.
///
/// Lifecycle is composed around implementations by the registry, not
/// inherited: the registry drives `initialize` between `Created` and
/// `Active`, routes invocations while `Active`, and calls `destroy`
/// exactly once on the way to `Destroyed`.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Initialization hook. An error fails the creation call and the
    /// endpoint goes straight to `Destroyed`.
    async fn initialize(&self) -> Result<(), RemoteFault> {
        Ok(())
    }

    /// Execute one invocation. `cancel` fires if the remote caller sends
    /// an in-band cancel; honoring it is cooperative.
    async fn handle_invocation(
        &self,
        method: &str,
        args: Bytes,
        cancel: CancellationToken,
    ) -> Result<Bytes, InvocationFault>;

    /// Teardown hook, called once during destruction.
    async fn destroy(&self) {}
}

/// Handed to constructors at creation time.
#[derive(Clone)]
pub struct EndpointContext {
    /// Endpoint-scoped controlling token: when signalled (by the endpoint
    /// itself or by whoever holds a clone), destruction is scheduled.
    pub scope: CancellationToken,
}

type Constructor = Arc<dyn Fn(EndpointContext) -> Arc<dyn Endpoint> + Send + Sync>;

/// Maps implementation type descriptors to constructors.
///
/// Each hosting process registers the implementations it can build;
/// creation requests naming anything else are rejected. This replaces
/// runtime type loading with an explicit table built at startup.
#[derive(Default)]
pub struct EndpointFactory {
    constructors: HashMap<String, Constructor>,
}

impl EndpointFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under an implementation type name.
    pub fn register<F>(&mut self, implementation_type: impl Into<String>, constructor: F)
    where
        F: Fn(EndpointContext) -> Arc<dyn Endpoint> + Send + Sync + 'static,
    {
        self.constructors
            .insert(implementation_type.into(), Arc::new(constructor));
    }

    /// Build an endpoint, or `None` if the type is unknown here.
    pub fn construct(
        &self,
        implementation_type: &str,
        context: EndpointContext,
    ) -> Option<Arc<dyn Endpoint>> {
        self.constructors
            .get(implementation_type)
            .map(|ctor| ctor(context))
    }

    pub fn is_registered(&self, implementation_type: &str) -> bool {
        self.constructors.contains_key(implementation_type)
    }
}
