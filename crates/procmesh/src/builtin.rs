use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use procmesh_cluster::{Endpoint, EndpointFactory, InvocationFault};
use tokio_util::sync::CancellationToken;

/// Diagnostic endpoint every stock host carries.
///
/// `Echo` returns its argument bytes unchanged and `Ping` returns the
/// process's crate version, which is enough to smoke-test a deployment
/// end to end without application endpoints.
pub struct Echo;

#[async_trait]
impl Endpoint for Echo {
    async fn handle_invocation(
        &self,
        method: &str,
        args: Bytes,
        _cancel: CancellationToken,
    ) -> Result<Bytes, InvocationFault> {
        match method {
            "Echo" => Ok(args),
            "Ping" => Ok(Bytes::from_static(
                concat!("\"", env!("CARGO_PKG_VERSION"), "\"").as_bytes(),
            )),
            other => Err(InvocationFault::new(
                "UnknownMethod",
                format!("Echo has no method '{other}'"),
            )),
        }
    }
}

/// Factory with the built-in diagnostic endpoints registered.
pub fn builtin_factory() -> EndpointFactory {
    let mut factory = EndpointFactory::new();
    factory.register("Echo", |_ctx| Arc::new(Echo) as Arc<dyn Endpoint>);
    factory
}
