use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use procmesh_channel::{ChannelConfig, IpcChannel};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::address::EndpointAddress;
use crate::error::{ClusterError, Result};
use crate::host::{REGISTRY_CREATE, REGISTRY_DESTROY};
use crate::launcher::ProcessLauncher;
use crate::types::{
    EndpointCreationRequest, ProcessCreationInfo, ProcessCreationRequest,
};

/// One live subordinate process: its identity, the channel to it, and
/// the OS child handle when the launcher produced one.
pub struct ProcessRecord {
    info: ProcessCreationInfo,
    channel: IpcChannel,
    child: std::sync::Mutex<Option<tokio::process::Child>>,
}

impl ProcessRecord {
    pub fn new(info: ProcessCreationInfo, channel: IpcChannel) -> Self {
        Self {
            info,
            channel,
            child: std::sync::Mutex::new(None),
        }
    }

    pub fn process_id(&self) -> &str {
        &self.info.process_unique_id
    }

    pub fn info(&self) -> &ProcessCreationInfo {
        &self.info
    }

    pub fn channel(&self) -> &IpcChannel {
        &self.channel
    }

    fn attach_child(&self, child: Option<tokio::process::Child>) {
        *self.child.lock().expect("child lock") = child;
    }

    fn take_child(&self) -> Option<tokio::process::Child> {
        self.child.lock().expect("child lock").take()
    }
}

impl std::fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRecord")
            .field("process_id", &self.info.process_unique_id)
            .field("framework", &self.info.framework)
            .finish_non_exhaustive()
    }
}

/// Creates, tracks and tears down subordinate processes, and provisions
/// endpoints inside them over the registry control methods.
pub struct ProcessBroker {
    records: Mutex<HashMap<String, Arc<ProcessRecord>>>,
    launcher: Arc<dyn ProcessLauncher>,
    channel_config: ChannelConfig,
}

impl ProcessBroker {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, channel_config: ChannelConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            launcher,
            channel_config,
        }
    }

    /// Create a process, or return the existing record for its id.
    ///
    /// With `throw_if_exists` set, an existing id is an error instead.
    /// The table lock is held across the launch so two concurrent
    /// requests for the same id cannot both spawn.
    pub async fn create_process(
        &self,
        request: &ProcessCreationRequest,
    ) -> Result<Arc<ProcessRecord>> {
        let process_id = &request.process.process_unique_id;
        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(process_id) {
            if request.options.throw_if_exists {
                return Err(ClusterError::ProcessAlreadyExists(process_id.clone()));
            }
            tracing::debug!(process_id, "reusing existing process");
            return Ok(Arc::clone(existing));
        }

        let launched = self.launcher.launch(&request.process).await?;
        let channel =
            IpcChannel::establish(launched.stream, self.channel_config.clone(), None).await?;

        let record = Arc::new(ProcessRecord::new(request.process.clone(), channel));
        record.attach_child(launched.child);
        records.insert(process_id.clone(), Arc::clone(&record));
        tracing::info!(process_id, "process registered");
        Ok(record)
    }

    /// Register an externally established process, e.g. the master.
    pub async fn register(&self, record: Arc<ProcessRecord>) -> Result<()> {
        let mut records = self.records.lock().await;
        let process_id = record.process_id().to_string();
        if records.contains_key(&process_id) {
            return Err(ClusterError::ProcessAlreadyExists(process_id));
        }
        records.insert(process_id, record);
        Ok(())
    }

    pub async fn get(&self, process_id: &str) -> Option<Arc<ProcessRecord>> {
        self.records.lock().await.get(process_id).cloned()
    }

    pub async fn process_ids(&self) -> Vec<String> {
        self.records.lock().await.keys().cloned().collect()
    }

    /// Create an endpoint inside an already-running process.
    pub async fn create_endpoint(
        &self,
        process_id: &str,
        request: &EndpointCreationRequest,
    ) -> Result<EndpointAddress> {
        let record = self
            .get(process_id)
            .await
            .ok_or_else(|| ClusterError::ProcessNotFound(process_id.to_string()))?;
        let address = EndpointAddress::new(process_id, &request.endpoint_id)?;

        let body = Bytes::from(serde_json::to_vec(request)?);
        let cancel = CancellationToken::new();
        record
            .channel
            .multiplexer()
            .invoke(&address.to_string(), REGISTRY_CREATE, body, &cancel)
            .await?;
        tracing::info!(%address, implementation = %request.implementation_type, "endpoint created");
        Ok(address)
    }

    /// Create the process (or reuse it) and an endpoint inside it in one
    /// step.
    pub async fn create_process_and_endpoint(
        &self,
        process: &ProcessCreationRequest,
        endpoint: &EndpointCreationRequest,
    ) -> Result<EndpointAddress> {
        let record = self.create_process(process).await?;
        self.create_endpoint(record.process_id(), endpoint).await
    }

    /// Destroy the addressed endpoint. Idempotent on the remote side.
    pub async fn destroy_endpoint(&self, address: &EndpointAddress) -> Result<()> {
        let record = self
            .get(address.process_id())
            .await
            .ok_or_else(|| ClusterError::ProcessNotFound(address.process_id().to_string()))?;

        let cancel = CancellationToken::new();
        record
            .channel
            .multiplexer()
            .invoke(
                &address.to_string(),
                REGISTRY_DESTROY,
                Bytes::new(),
                &cancel,
            )
            .await?;
        Ok(())
    }

    /// Tear down a process: close its channel and kill the OS child if
    /// one is attached. Unknown ids are a no-op.
    pub async fn destroy_process(&self, process_id: &str) {
        let record = self.records.lock().await.remove(process_id);
        let Some(record) = record else {
            return;
        };

        record.channel.close();
        if let Some(mut child) = record.take_child() {
            if let Err(err) = child.start_kill() {
                tracing::warn!(process_id, error = %err, "failed to kill subordinate");
            } else {
                let _ = child.wait().await;
            }
        }
        tracing::info!(process_id, "process destroyed");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::endpoint::{Endpoint, EndpointFactory, InvocationFault};
    use crate::launcher::LoopbackLauncher;
    use crate::types::{ProcessCreationOptions, TargetFramework};

    struct ZigZag;

    #[async_trait]
    impl Endpoint for ZigZag {
        async fn handle_invocation(
            &self,
            method: &str,
            _args: Bytes,
            _cancel: CancellationToken,
        ) -> std::result::Result<Bytes, InvocationFault> {
            match method {
                "Test" => Ok(Bytes::from(serde_json::to_vec("Allo").unwrap())),
                other => Err(InvocationFault::new("UnknownMethod", other)),
            }
        }
    }

    fn broker() -> ProcessBroker {
        let mut factory = EndpointFactory::new();
        factory.register("ZigZag", |_ctx| Arc::new(ZigZag) as Arc<dyn Endpoint>);
        let launcher = LoopbackLauncher::new(Arc::new(factory), ChannelConfig::default());
        ProcessBroker::new(Arc::new(launcher), ChannelConfig::default())
    }

    fn process_request(id: &str, options: ProcessCreationOptions) -> ProcessCreationRequest {
        ProcessCreationRequest::new(
            options,
            ProcessCreationInfo::new(id, TargetFramework::host()),
        )
    }

    #[tokio::test]
    async fn create_process_then_reuse() {
        let broker = broker();
        let first = broker
            .create_process(&process_request("LOL", ProcessCreationOptions::default()))
            .await
            .unwrap();
        let second = broker
            .create_process(&process_request("LOL", ProcessCreationOptions::default()))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn throw_if_exists_rejects_duplicate() {
        let broker = broker();
        broker
            .create_process(&process_request("LOL", ProcessCreationOptions::throw_if_exists()))
            .await
            .unwrap();

        let err = broker
            .create_process(&process_request("LOL", ProcessCreationOptions::throw_if_exists()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::ProcessAlreadyExists(_)));
    }

    #[tokio::test]
    async fn endpoint_roundtrip_through_subordinate() {
        let broker = broker();
        let address = broker
            .create_process_and_endpoint(
                &process_request("LOL", ProcessCreationOptions::throw_if_exists()),
                &EndpointCreationRequest::new("LOL", "IZigZag", "ZigZag"),
            )
            .await
            .unwrap();
        assert_eq!(address.to_string(), "/LOL/LOL");

        let record = broker.get("LOL").await.unwrap();
        let reply = record
            .channel()
            .multiplexer()
            .invoke("/LOL/LOL", "Test", Bytes::new(), &CancellationToken::new())
            .await
            .unwrap();
        let value: String = serde_json::from_slice(&reply).unwrap();
        assert_eq!(value, "Allo");
    }

    #[tokio::test]
    async fn create_endpoint_in_unknown_process_fails() {
        let broker = broker();
        let err = broker
            .create_endpoint("ghost", &EndpointCreationRequest::new("e", "I", "Impl"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::ProcessNotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_endpoint_id_reported_remotely() {
        let broker = broker();
        broker
            .create_process_and_endpoint(
                &process_request("p", ProcessCreationOptions::default()),
                &EndpointCreationRequest::new("e", "IZigZag", "ZigZag"),
            )
            .await
            .unwrap();

        let err = broker
            .create_endpoint("p", &EndpointCreationRequest::new("e", "IZigZag", "ZigZag"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::EndpointAlreadyExists(_)));
    }

    #[tokio::test]
    async fn destroy_endpoint_then_calls_fail() {
        let broker = broker();
        let address = broker
            .create_process_and_endpoint(
                &process_request("p", ProcessCreationOptions::default()),
                &EndpointCreationRequest::new("e", "IZigZag", "ZigZag"),
            )
            .await
            .unwrap();

        broker.destroy_endpoint(&address).await.unwrap();
        // Second destroy is a remote no-op.
        broker.destroy_endpoint(&address).await.unwrap();

        let record = broker.get("p").await.unwrap();
        let err = record
            .channel()
            .multiplexer()
            .invoke("/p/e", "Test", Bytes::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        let err = ClusterError::from(err);
        assert!(matches!(err, ClusterError::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn destroy_process_faults_its_channel() {
        let broker = broker();
        let record = broker
            .create_process(&process_request("p", ProcessCreationOptions::default()))
            .await
            .unwrap();
        let mux = record.channel().multiplexer();

        broker.destroy_process("p").await;
        assert!(broker.get("p").await.is_none());

        let err = mux
            .invoke("/p/e", "Test", Bytes::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, procmesh_channel::ChannelError::Faulted(_)));

        // Unknown id destroy is a no-op.
        broker.destroy_process("ghost").await;
    }
}
