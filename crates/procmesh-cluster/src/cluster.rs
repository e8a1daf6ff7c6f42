use std::sync::Arc;

use procmesh_channel::{ChannelConfig, InboundService, IpcChannel};

use crate::address::EndpointAddress;
use crate::broker::{ProcessBroker, ProcessRecord};
use crate::endpoint::EndpointFactory;
use crate::error::{ClusterError, Result};
use crate::host::EndpointHost;
use crate::launcher::ProcessLauncher;
use crate::proxy::{ProcessProxy, RemoteInterface};
use crate::registry::EndpointRegistry;
use crate::types::{ProcessCreationInfo, TargetFramework};

/// Cluster-wide settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Process id reserved for the master's own registry.
    pub master_process_id: String,
    pub channel: ChannelConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master_process_id: "master".to_string(),
            channel: ChannelConfig::default(),
        }
    }
}

/// The master process plus every subordinate it has created.
///
/// The master's own registry is served over an in-memory loopback
/// channel by the same host loop subordinates run, so every call takes
/// the same path through the handshake, framing and multiplexing layers
/// regardless of where the endpoint lives.
pub struct ProcessCluster {
    broker: Arc<ProcessBroker>,
    config: ClusterConfig,
    // Host side of the master loopback. Dropping it would fault the
    // master record's channel.
    _master_host: IpcChannel,
}

impl ProcessCluster {
    /// Stand up a cluster: wires the master loopback, registers the
    /// master record and prepares the broker for subordinate launches.
    pub async fn start(
        launcher: Arc<dyn ProcessLauncher>,
        factory: Arc<EndpointFactory>,
        config: ClusterConfig,
    ) -> Result<Self> {
        let broker = Arc::new(ProcessBroker::new(launcher, config.channel.clone()));

        let (client_side, host_side) = tokio::io::duplex(256 * 1024);
        let registry = Arc::new(EndpointRegistry::new(&config.master_process_id));
        let host = Arc::new(EndpointHost::new(registry, factory));

        let host_channel = tokio::spawn(IpcChannel::establish(
            host_side,
            config.channel.clone(),
            Some(host as Arc<dyn InboundService>),
        ));
        let client_channel =
            IpcChannel::establish(client_side, config.channel.clone(), None).await?;
        let host_channel = host_channel
            .await
            .map_err(|err| ClusterError::ChannelFaulted(err.to_string()))??;

        let master = Arc::new(ProcessRecord::new(
            ProcessCreationInfo::new(&config.master_process_id, TargetFramework::host()),
            client_channel,
        ));
        broker.register(master).await?;
        tracing::info!(master = %config.master_process_id, "cluster started");

        Ok(Self {
            broker,
            config,
            _master_host: host_channel,
        })
    }

    pub fn broker(&self) -> &Arc<ProcessBroker> {
        &self.broker
    }

    pub fn master_process_id(&self) -> &str {
        &self.config.master_process_id
    }

    pub async fn master(&self) -> Result<Arc<ProcessRecord>> {
        self.broker
            .get(&self.config.master_process_id)
            .await
            .ok_or_else(|| ClusterError::ProcessNotFound(self.config.master_process_id.clone()))
    }

    /// Build a proxy for an endpoint address, resolved through the
    /// broker's process table.
    pub async fn proxy(&self, address: &EndpointAddress) -> Result<ProcessProxy> {
        let record = self
            .broker
            .get(address.process_id())
            .await
            .ok_or_else(|| ClusterError::ProcessNotFound(address.process_id().to_string()))?;
        Ok(ProcessProxy::new(
            address.clone(),
            record.channel().multiplexer(),
        ))
    }

    /// Build a typed interface bound to an endpoint address.
    pub async fn create_interface<T: RemoteInterface>(
        &self,
        address: &EndpointAddress,
    ) -> Result<T> {
        Ok(T::bind(self.proxy(address).await?))
    }
}
