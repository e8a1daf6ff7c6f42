use bytes::Bytes;
use procmesh_channel::CallMultiplexer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::address::EndpointAddress;
use crate::error::{ClusterError, Result};

/// Client-side handle to one remote endpoint.
///
/// A proxy never owns the channel; it borrows the process's multiplexer,
/// so many proxies share one stream. Failures split two ways:
/// [`ClusterError::RemoteInvocation`] means the endpoint threw and the
/// channel is still good, [`ClusterError::ChannelFaulted`] means the
/// transport is gone.
#[derive(Clone)]
pub struct ProcessProxy {
    address: EndpointAddress,
    mux: CallMultiplexer,
}

impl std::fmt::Debug for ProcessProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessProxy")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ProcessProxy {
    pub fn new(address: EndpointAddress, mux: CallMultiplexer) -> Self {
        Self { address, mux }
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Invoke with raw argument bytes.
    pub async fn invoke_raw(
        &self,
        method: &str,
        args: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.mux
            .invoke(&self.address.to_string(), method, args, cancel)
            .await
            .map_err(ClusterError::from)
    }

    /// Invoke with JSON-encoded arguments and a JSON-decoded result.
    pub async fn invoke<A, R>(&self, method: &str, args: &A, cancel: &CancellationToken) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = Bytes::from(serde_json::to_vec(args)?);
        let reply = self.invoke_raw(method, body, cancel).await?;
        Ok(serde_json::from_slice(&reply)?)
    }
}

/// A typed client interface over a [`ProcessProxy`].
///
/// Implementations wrap the proxy in methods matching the remote
/// endpoint's contract; `INTERFACE` names that contract for creation
/// requests.
pub trait RemoteInterface: Sized {
    const INTERFACE: &'static str;

    fn bind(proxy: ProcessProxy) -> Self;
}
