use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use procmesh_frame::RemoteFault;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::address::validate_id;
use crate::endpoint::{Endpoint, EndpointContext, EndpointFactory};
use crate::error::{faults, ClusterError, Result};
use crate::types::EndpointCreationRequest;

/// Per-endpoint lifecycle. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointLifecycle {
    Created,
    Active,
    Destroying,
    Destroyed,
}

struct EndpointRecord {
    endpoint_id: String,
    implementation_type: String,
    endpoint: Arc<dyn Endpoint>,
    state: std::sync::Mutex<EndpointLifecycle>,
    /// Controlling token: signalling it schedules destruction.
    scope: CancellationToken,
}

/// Per-process table mapping endpoint ids to hosted endpoint instances.
///
/// Creation and destruction are serialized through the table lock; the
/// initialize hook runs outside it so a slow endpoint cannot block the
/// registry.
pub struct EndpointRegistry {
    process_id: String,
    endpoints: Mutex<HashMap<String, Arc<EndpointRecord>>>,
}

impl EndpointRegistry {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Accept an `EndpointCreationRequest`.
    ///
    /// The record enters `Created` synchronously on acceptance and
    /// becomes `Active` once `initialize` completes; an initialize error
    /// transitions straight to `Destroyed` and fails the creation.
    pub async fn create(
        self: &Arc<Self>,
        request: &EndpointCreationRequest,
        factory: &EndpointFactory,
    ) -> Result<()> {
        validate_id(&request.endpoint_id, "endpoint id")?;

        let scope = CancellationToken::new();
        let endpoint = factory
            .construct(
                &request.implementation_type,
                EndpointContext {
                    scope: scope.clone(),
                },
            )
            .ok_or_else(|| {
                ClusterError::RemoteInvocation(RemoteFault::new(
                    faults::BAD_REQUEST,
                    format!(
                        "implementation type '{}' is not registered in process '{}'",
                        request.implementation_type, self.process_id
                    ),
                ))
            })?;

        let record = Arc::new(EndpointRecord {
            endpoint_id: request.endpoint_id.clone(),
            implementation_type: request.implementation_type.clone(),
            endpoint,
            state: std::sync::Mutex::new(EndpointLifecycle::Created),
            scope: scope.clone(),
        });

        {
            let mut endpoints = self.endpoints.lock().await;
            if endpoints.contains_key(&request.endpoint_id) {
                return Err(ClusterError::EndpointAlreadyExists(format!(
                    "endpoint '{}' already exists in process '{}'",
                    request.endpoint_id, self.process_id
                )));
            }
            endpoints.insert(request.endpoint_id.clone(), Arc::clone(&record));
        }

        if let Err(fault) = record.endpoint.initialize().await {
            *record.state.lock().expect("endpoint state lock") = EndpointLifecycle::Destroyed;
            self.endpoints.lock().await.remove(&request.endpoint_id);
            tracing::warn!(
                endpoint = %request.endpoint_id,
                implementation = %record.implementation_type,
                error = %fault,
                "endpoint initialization failed"
            );
            return Err(ClusterError::RemoteInvocation(RemoteFault::new(
                faults::ENDPOINT_INITIALIZATION_FAILED,
                fault.to_string(),
            )));
        }

        {
            let mut state = record.state.lock().expect("endpoint state lock");
            if *state == EndpointLifecycle::Created {
                *state = EndpointLifecycle::Active;
            }
        }
        tracing::debug!(
            endpoint = %request.endpoint_id,
            implementation = %record.implementation_type,
            "endpoint active"
        );

        // Controlling-token watcher: a signal schedules destruction.
        let registry = Arc::clone(self);
        let endpoint_id = request.endpoint_id.clone();
        tokio::spawn(async move {
            scope.cancelled().await;
            tracing::debug!(endpoint = %endpoint_id, "endpoint scope signalled");
            registry.destroy(&endpoint_id).await;
        });

        Ok(())
    }

    /// Dispatch one invocation to the addressed endpoint.
    pub async fn invoke(
        self: &Arc<Self>,
        endpoint_id: &str,
        method: &str,
        args: Bytes,
        cancel: CancellationToken,
    ) -> std::result::Result<Bytes, RemoteFault> {
        let record = self.endpoints.lock().await.get(endpoint_id).cloned();
        let record = record.ok_or_else(|| {
            RemoteFault::new(
                faults::ENDPOINT_NOT_FOUND,
                format!(
                    "no endpoint '{endpoint_id}' in process '{}'",
                    self.process_id
                ),
            )
        })?;

        let state = *record.state.lock().expect("endpoint state lock");
        if state != EndpointLifecycle::Active {
            return Err(RemoteFault::new(
                faults::ENDPOINT_NOT_FOUND,
                format!("endpoint '{endpoint_id}' is {state:?}, not Active"),
            ));
        }

        match record.endpoint.handle_invocation(method, args, cancel).await {
            Ok(result) => Ok(result),
            Err(fault) => {
                if fault.fatal {
                    tracing::warn!(
                        endpoint = %endpoint_id,
                        error = %fault.fault,
                        "fatal invocation fault; scheduling endpoint destruction"
                    );
                    let registry = Arc::clone(self);
                    let endpoint_id = endpoint_id.to_string();
                    tokio::spawn(async move {
                        registry.destroy(&endpoint_id).await;
                    });
                }
                Err(fault.fault)
            }
        }
    }

    /// Destroy an endpoint. Idempotent: a second request while already
    /// `Destroying`/`Destroyed` (or for an id no longer present) is a
    /// no-op.
    pub async fn destroy(self: &Arc<Self>, endpoint_id: &str) {
        let record = self.endpoints.lock().await.get(endpoint_id).cloned();
        let Some(record) = record else {
            return;
        };

        {
            let mut state = record.state.lock().expect("endpoint state lock");
            match *state {
                EndpointLifecycle::Destroying | EndpointLifecycle::Destroyed => return,
                _ => *state = EndpointLifecycle::Destroying,
            }
        }

        // Wake the controlling-token watcher so it exits.
        record.scope.cancel();
        record.endpoint.destroy().await;
        *record.state.lock().expect("endpoint state lock") = EndpointLifecycle::Destroyed;
        self.endpoints.lock().await.remove(endpoint_id);
        tracing::debug!(
            endpoint = %record.endpoint_id,
            implementation = %record.implementation_type,
            "endpoint destroyed"
        );
    }

    /// Current lifecycle state, if the endpoint is still registered.
    pub async fn lifecycle(&self, endpoint_id: &str) -> Option<EndpointLifecycle> {
        let endpoints = self.endpoints.lock().await;
        endpoints
            .get(endpoint_id)
            .map(|record| *record.state.lock().expect("endpoint state lock"))
    }

    /// Ids of all registered endpoints.
    pub async fn endpoint_ids(&self) -> Vec<String> {
        self.endpoints.lock().await.keys().cloned().collect()
    }
}
