use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use procmesh_channel::InboundService;
#[cfg(unix)]
use procmesh_channel::{ChannelConfig, IpcChannel};
use procmesh_frame::CallResult;
use tokio_util::sync::CancellationToken;

use crate::address::EndpointAddress;
use crate::endpoint::EndpointFactory;
use crate::error::{faults, ClusterError, Result};
use crate::registry::EndpointRegistry;
use crate::types::EndpointCreationRequest;

/// Reserved method: create an endpoint at the addressed id. Body is a
/// JSON `EndpointCreationRequest`.
pub const REGISTRY_CREATE: &str = "__registry/create";

/// Reserved method: destroy the addressed endpoint. Idempotent.
pub const REGISTRY_DESTROY: &str = "__registry/destroy";

/// Serves the inbound side of a channel against one process's registry.
///
/// Regular methods dispatch to the addressed endpoint; the reserved
/// `__registry/*` methods provision and tear down endpoints.
pub struct EndpointHost {
    registry: Arc<EndpointRegistry>,
    factory: Arc<EndpointFactory>,
}

impl EndpointHost {
    pub fn new(registry: Arc<EndpointRegistry>, factory: Arc<EndpointFactory>) -> Self {
        Self { registry, factory }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    async fn handle(
        &self,
        address: &str,
        method: &str,
        args: Bytes,
        cancel: CancellationToken,
    ) -> Result<Bytes> {
        let address: EndpointAddress = address.parse()?;
        if address.process_id() != self.registry.process_id() {
            return Err(ClusterError::EndpointNotFound(format!(
                "address {address} does not belong to process '{}'",
                self.registry.process_id()
            )));
        }

        match method {
            REGISTRY_CREATE => {
                let request: EndpointCreationRequest = serde_json::from_slice(&args)?;
                if request.endpoint_id != address.endpoint_id() {
                    return Err(ClusterError::InvalidAddress(format!(
                        "creation request id '{}' does not match address {address}",
                        request.endpoint_id
                    )));
                }
                self.registry.create(&request, &self.factory).await?;
                Ok(Bytes::new())
            }
            REGISTRY_DESTROY => {
                self.registry.destroy(address.endpoint_id()).await;
                Ok(Bytes::new())
            }
            _ => self
                .registry
                .invoke(address.endpoint_id(), method, args, cancel)
                .await
                .map_err(ClusterError::RemoteInvocation),
        }
    }
}

#[async_trait]
impl InboundService for EndpointHost {
    async fn handle_call(
        &self,
        address: &str,
        method: &str,
        args: Bytes,
        cancel: CancellationToken,
    ) -> CallResult {
        match self.handle(address, method, args, cancel).await {
            Ok(bytes) => CallResult::Ok(bytes),
            Err(err) => {
                let fault = err.to_fault();
                tracing::debug!(address, method, fault = %fault, "inbound call failed");
                CallResult::Err(fault)
            }
        }
    }
}

/// Entry point for a subordinate process: connect back to the parent's
/// socket, handshake, and serve the registry until the channel closes.
#[cfg(unix)]
pub async fn run_host(
    socket: &std::path::Path,
    process_id: &str,
    factory: Arc<EndpointFactory>,
    config: ChannelConfig,
) -> Result<()> {
    let stream = tokio::net::UnixStream::connect(socket)
        .await
        .map_err(|source| ClusterError::ProcessLaunchFailure {
            process: process_id.to_string(),
            source,
        })?;

    let registry = Arc::new(EndpointRegistry::new(process_id));
    let host = Arc::new(EndpointHost::new(registry, factory));
    let channel = IpcChannel::establish(stream, config, Some(host)).await?;
    tracing::info!(process_id, "host serving");

    channel.closed().await;
    tracing::info!(process_id, "parent channel closed; host exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::endpoint::{Endpoint, InvocationFault};

    struct Greeter;

    #[async_trait]
    impl Endpoint for Greeter {
        async fn handle_invocation(
            &self,
            method: &str,
            _args: Bytes,
            _cancel: CancellationToken,
        ) -> std::result::Result<Bytes, InvocationFault> {
            match method {
                "Test" => Ok(Bytes::from_static(b"\"Allo\"")),
                other => Err(InvocationFault::new("UnknownMethod", other)),
            }
        }
    }

    fn host() -> EndpointHost {
        let registry = Arc::new(EndpointRegistry::new("p"));
        let mut factory = EndpointFactory::new();
        factory.register("Greeter", |_ctx| Arc::new(Greeter) as Arc<dyn Endpoint>);
        EndpointHost::new(registry, Arc::new(factory))
    }

    fn create_body(id: &str) -> Bytes {
        let request = EndpointCreationRequest::new(id, "IGreeter", "Greeter");
        Bytes::from(serde_json::to_vec(&request).unwrap())
    }

    #[tokio::test]
    async fn create_then_invoke() {
        let host = host();
        let token = CancellationToken::new();

        let created = host
            .handle_call("/p/e", REGISTRY_CREATE, create_body("e"), token.clone())
            .await;
        assert!(matches!(created, CallResult::Ok(_)));

        match host.handle_call("/p/e", "Test", Bytes::new(), token).await {
            CallResult::Ok(bytes) => assert_eq!(bytes.as_ref(), b"\"Allo\""),
            CallResult::Err(fault) => panic!("unexpected fault {fault}"),
        }
    }

    #[tokio::test]
    async fn duplicate_create_reports_already_exists() {
        let host = host();
        let token = CancellationToken::new();

        host.handle_call("/p/e", REGISTRY_CREATE, create_body("e"), token.clone())
            .await;
        match host
            .handle_call("/p/e", REGISTRY_CREATE, create_body("e"), token)
            .await
        {
            CallResult::Err(fault) => {
                assert_eq!(fault.error_type, faults::ENDPOINT_ALREADY_EXISTS);
            }
            CallResult::Ok(_) => panic!("duplicate create should fail"),
        }
    }

    #[tokio::test]
    async fn wrong_process_address_rejected() {
        let host = host();
        match host
            .handle_call("/other/e", "Test", Bytes::new(), CancellationToken::new())
            .await
        {
            CallResult::Err(fault) => assert_eq!(fault.error_type, faults::ENDPOINT_NOT_FOUND),
            CallResult::Ok(_) => panic!("foreign address should fail"),
        }
    }

    #[tokio::test]
    async fn mismatched_creation_id_rejected() {
        let host = host();
        match host
            .handle_call(
                "/p/other",
                REGISTRY_CREATE,
                create_body("e"),
                CancellationToken::new(),
            )
            .await
        {
            CallResult::Err(fault) => assert_eq!(fault.error_type, faults::BAD_REQUEST),
            CallResult::Ok(_) => panic!("mismatched id should fail"),
        }
    }

    #[tokio::test]
    async fn destroy_via_control_method_is_idempotent() {
        let host = host();
        let token = CancellationToken::new();
        host.handle_call("/p/e", REGISTRY_CREATE, create_body("e"), token.clone())
            .await;

        let first = host
            .handle_call("/p/e", REGISTRY_DESTROY, Bytes::new(), token.clone())
            .await;
        let second = host
            .handle_call("/p/e", REGISTRY_DESTROY, Bytes::new(), token)
            .await;
        assert!(matches!(first, CallResult::Ok(_)));
        assert!(matches!(second, CallResult::Ok(_)));
    }
}
