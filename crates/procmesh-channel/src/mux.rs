use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use procmesh_frame::{CallResult, IpcFrame, RemoteFault};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{ChannelError, Result};

/// Server side of the call path: executes inbound `CallRequest` frames.
///
/// Implemented by the endpoint host. The `cancel` token is signalled when
/// the remote caller sends an in-band `CancelRequest` for this call;
/// honoring it is cooperative.
#[async_trait]
pub trait InboundService: Send + Sync + 'static {
    async fn handle_call(
        &self,
        address: &str,
        method: &str,
        args: Bytes,
        cancel: CancellationToken,
    ) -> CallResult;
}

/// Turns the frame-level channel into a request/response API.
///
/// Outgoing calls get a fresh correlation id and a pending-call entry that
/// completes exactly once: with the matching response, with local
/// cancellation, or with a channel fault. Inbound calls are executed on
/// spawned tasks, never on the reader loop.
#[derive(Clone)]
pub struct CallMultiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    next_correlation: AtomicU64,
    /// Outgoing-call state. Pending entries and the fault reason live
    /// under one lock so a fault cannot slip in between the fault check
    /// and the insert and leave an entry the drain never saw.
    calls: Mutex<CallTable>,
    /// Inbound calls still executing locally, keyed by the caller's
    /// correlation id, so `CancelRequest` frames can signal them.
    inbound: Mutex<HashMap<u64, CancellationToken>>,
    outbound: mpsc::Sender<IpcFrame>,
    service: Option<Arc<dyn InboundService>>,
}

#[derive(Default)]
struct CallTable {
    /// An entry is removed before its sender is completed, so a call can
    /// never complete twice.
    pending: HashMap<u64, oneshot::Sender<Result<Bytes>>>,
    fault: Option<String>,
}

impl CallMultiplexer {
    pub(crate) fn new(
        outbound: mpsc::Sender<IpcFrame>,
        service: Option<Arc<dyn InboundService>>,
    ) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                next_correlation: AtomicU64::new(1),
                calls: Mutex::new(CallTable::default()),
                inbound: Mutex::new(HashMap::new()),
                outbound,
                service,
            }),
        }
    }

    /// Send a call and wait for its outcome.
    ///
    /// Cancellation is a local decision: the returned future resolves
    /// `Err(Cancelled)` as soon as `cancel` fires and a best-effort
    /// `CancelRequest` is sent to the peer, which may still run the call
    /// to completion.
    pub async fn invoke(
        &self,
        address: &str,
        method: &str,
        args: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let correlation_id = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();
        {
            let mut calls = self.inner.calls.lock().expect("mux lock");
            if let Some(reason) = &calls.fault {
                return Err(ChannelError::Faulted(reason.clone()));
            }
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            calls.pending.insert(correlation_id, tx);
        }

        let request = IpcFrame::CallRequest {
            correlation_id,
            address: address.to_string(),
            method: method.to_string(),
            args,
        };
        // The send can park behind a full writer queue, so the token must
        // be able to resolve the call out of the wait.
        tokio::select! {
            sent = self.inner.outbound.send(request) => {
                if sent.is_err() {
                    self.remove_pending(correlation_id);
                    return Err(self.fault_error());
                }
            }
            _ = cancel.cancelled() => {
                self.remove_pending(correlation_id);
                tracing::debug!(correlation_id, "call cancelled before send");
                return Err(ChannelError::Cancelled);
            }
        }

        tokio::select! {
            outcome = &mut rx => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(self.fault_error()),
            },
            _ = cancel.cancelled() => {
                if self.remove_pending(correlation_id) {
                    let _ = self
                        .inner
                        .outbound
                        .try_send(IpcFrame::CancelRequest { correlation_id });
                    tracing::debug!(correlation_id, "call cancelled locally");
                    Err(ChannelError::Cancelled)
                } else {
                    // The response won the race; deliver it.
                    match rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(ChannelError::Cancelled),
                    }
                }
            }
        }
    }

    /// Number of calls still waiting on a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.lock().expect("mux lock").pending.len()
    }

    fn remove_pending(&self, correlation_id: u64) -> bool {
        self.inner
            .calls
            .lock()
            .expect("mux lock")
            .pending
            .remove(&correlation_id)
            .is_some()
    }

    /// Route one inbound frame. Called only by the channel's reader loop.
    pub(crate) fn dispatch(&self, frame: IpcFrame) {
        match frame {
            IpcFrame::CallResponse {
                correlation_id,
                result,
            } => {
                let tx = self
                    .inner
                    .calls
                    .lock()
                    .expect("mux lock")
                    .pending
                    .remove(&correlation_id);
                match tx {
                    Some(tx) => {
                        let outcome = match result {
                            CallResult::Ok(bytes) => Ok(bytes),
                            CallResult::Err(fault) => Err(ChannelError::Remote(fault)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => {
                        tracing::trace!(correlation_id, "discarding response with no pending call");
                    }
                }
            }
            IpcFrame::CancelRequest { correlation_id } => {
                match self
                    .inner
                    .inbound
                    .lock()
                    .expect("mux lock")
                    .get(&correlation_id)
                {
                    Some(token) => token.cancel(),
                    None => {
                        tracing::trace!(correlation_id, "discarding cancel for completed call");
                    }
                }
            }
            IpcFrame::CallRequest {
                correlation_id,
                address,
                method,
                args,
            } => self.spawn_inbound(correlation_id, address, method, args),
            other => {
                tracing::warn!(kind = other.kind(), "unexpected frame after handshake");
            }
        }
    }

    fn spawn_inbound(&self, correlation_id: u64, address: String, method: String, args: Bytes) {
        let token = CancellationToken::new();
        self.inner
            .inbound
            .lock()
            .expect("mux lock")
            .insert(correlation_id, token.clone());

        // Endpoint execution happens off the reader loop so a slow call
        // cannot stall the frame pump.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = match &inner.service {
                Some(service) => service.handle_call(&address, &method, args, token).await,
                None => CallResult::Err(RemoteFault::new(
                    "EndpointNotFound",
                    format!("no endpoint host behind this channel for {address}"),
                )),
            };
            inner
                .inbound
                .lock()
                .expect("mux lock")
                .remove(&correlation_id);
            let _ = inner
                .outbound
                .send(IpcFrame::CallResponse {
                    correlation_id,
                    result,
                })
                .await;
        });
    }

    /// Fail every pending call with a channel-fault error.
    ///
    /// Setting the fault reason and draining the table happen under one
    /// lock: any call that got its entry in is drained here, and any call
    /// that has not yet inserted will see the fault and refuse to start.
    pub(crate) fn fault_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut calls = self.inner.calls.lock().expect("mux lock");
            if calls.fault.is_none() {
                calls.fault = Some(reason.to_string());
            }
            calls.pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), reason, "faulting pending calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(ChannelError::Faulted(reason.to_string())));
        }
    }

    fn fault_error(&self) -> ChannelError {
        let reason = self
            .inner
            .calls
            .lock()
            .expect("mux lock")
            .fault
            .clone()
            .unwrap_or_else(|| "channel closed".to_string());
        ChannelError::Faulted(reason)
    }
}
