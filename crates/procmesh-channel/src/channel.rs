use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use procmesh_frame::{decode_frame, encode_frame, IpcFrame, DEFAULT_MAX_PAYLOAD};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::handshake::{run_handshake, HandshakeConfig};
use crate::mux::{CallMultiplexer, InboundService};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub handshake: HandshakeConfig,
    /// Maximum payload size for frames after the handshake.
    pub max_payload_size: usize,
    /// Frames that may queue behind the writer before senders wait.
    pub outbound_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            outbound_buffer: 64,
        }
    }
}

/// Lifecycle of one channel. `Closed` and `Faulted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    AwaitingPeerHandshake,
    Ready,
    Faulted,
    Closed,
}

impl ChannelState {
    fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Faulted | ChannelState::Closed)
    }
}

/// Owns one duplex byte stream to a peer process.
///
/// Construction runs the handshake; afterwards a single reader loop is the
/// only consumer of the stream and a writer task serializes all sends so
/// frame boundaries are never interleaved.
pub struct IpcChannel {
    mux: CallMultiplexer,
    state: Arc<Mutex<ChannelState>>,
    shutdown: CancellationToken,
}

impl IpcChannel {
    /// Run the handshake over `stream` and start the frame pump.
    ///
    /// `service` executes inbound calls; pass `None` for a client-only
    /// channel. A handshake mismatch or timeout returns an error and the
    /// stream is dropped.
    pub async fn establish<S>(
        stream: S,
        config: ChannelConfig,
        service: Option<Arc<dyn InboundService>>,
    ) -> Result<IpcChannel>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let state = Arc::new(Mutex::new(ChannelState::Connecting));
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);

        set_state(&state, ChannelState::AwaitingPeerHandshake);
        if let Err(err) = run_handshake(&mut reader, &mut writer, &mut buf, &config.handshake).await
        {
            set_state(&state, ChannelState::Faulted);
            tracing::warn!(error = %err, "handshake failed; channel faulted");
            return Err(err);
        }
        set_state(&state, ChannelState::Ready);
        tracing::debug!("channel ready");

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer);
        let mux = CallMultiplexer::new(outbound_tx, service);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_writer(
            writer,
            outbound_rx,
            mux.clone(),
            Arc::clone(&state),
            shutdown.clone(),
        ));
        tokio::spawn(run_reader(
            reader,
            buf,
            config.max_payload_size,
            mux.clone(),
            Arc::clone(&state),
            shutdown.clone(),
        ));

        Ok(IpcChannel {
            mux,
            state,
            shutdown,
        })
    }

    /// The multiplexer carrying calls over this channel.
    pub fn multiplexer(&self) -> CallMultiplexer {
        self.mux.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state lock")
    }

    /// Close the channel. Pending calls fail with a channel-fault error.
    pub fn close(&self) {
        set_state(&self.state, ChannelState::Closed);
        self.shutdown.cancel();
        self.mux.fault_all("channel closed");
    }

    /// Resolves once the channel has stopped (closed or faulted).
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

impl std::fmt::Debug for IpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcChannel")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        set_state(&self.state, ChannelState::Closed);
        self.shutdown.cancel();
        self.mux.fault_all("channel dropped");
    }
}

fn set_state(state: &Arc<Mutex<ChannelState>>, next: ChannelState) {
    let mut current = state.lock().expect("channel state lock");
    if !current.is_terminal() {
        *current = next;
    }
}

async fn run_writer<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<IpcFrame>,
    mux: CallMultiplexer,
    state: Arc<Mutex<ChannelState>>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut out = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        out.clear();
        let write = match encode_frame(&frame, &mut out) {
            Ok(()) => writer.write_all(&out).await.and(writer.flush().await),
            Err(err) => {
                tracing::error!(error = %err, kind = frame.kind(), "frame encode failed");
                set_state(&state, ChannelState::Faulted);
                shutdown.cancel();
                mux.fault_all("frame encode failed");
                break;
            }
        };

        if let Err(err) = write {
            tracing::warn!(error = %err, "stream write failed; channel faulted");
            set_state(&state, ChannelState::Faulted);
            shutdown.cancel();
            mux.fault_all("stream write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn run_reader<S>(
    mut reader: ReadHalf<S>,
    mut buf: BytesMut,
    max_payload: usize,
    mux: CallMultiplexer,
    state: Arc<Mutex<ChannelState>>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    enum Exit {
        Closed(&'static str),
        Faulted(String),
        Shutdown,
    }

    let exit = 'pump: loop {
        loop {
            match decode_frame(&mut buf, max_payload) {
                Ok(Some(frame)) => mux.dispatch(frame),
                Ok(None) => break,
                Err(err) => break 'pump Exit::Faulted(format!("frame decode failed: {err}")),
            }
        }

        buf.reserve(READ_CHUNK_SIZE);
        tokio::select! {
            _ = shutdown.cancelled() => break Exit::Shutdown,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break Exit::Closed("connection closed by peer"),
                Ok(_) => {}
                Err(err) => break Exit::Faulted(format!("stream read failed: {err}")),
            },
        }
    };

    match exit {
        Exit::Shutdown => {}
        Exit::Closed(reason) => {
            tracing::debug!(reason, "channel closed");
            set_state(&state, ChannelState::Closed);
            shutdown.cancel();
            mux.fault_all(reason);
        }
        Exit::Faulted(reason) => {
            tracing::warn!(reason, "channel faulted");
            set_state(&state, ChannelState::Faulted);
            shutdown.cancel();
            mux.fault_all(&reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use procmesh_frame::{CallResult, RemoteFault};

    use super::*;
    use crate::error::ChannelError;
    use crate::mux::InboundService;

    struct EchoService;

    #[async_trait]
    impl InboundService for EchoService {
        async fn handle_call(
            &self,
            _address: &str,
            method: &str,
            args: Bytes,
            cancel: CancellationToken,
        ) -> CallResult {
            match method {
                "echo" => CallResult::Ok(args),
                "hang" => {
                    cancel.cancelled().await;
                    CallResult::Err(RemoteFault::new("Cancelled", "stopped"))
                }
                "fail" => CallResult::Err(RemoteFault::new("TestError", "requested failure")),
                other => CallResult::Err(RemoteFault::new(
                    "EndpointNotFound",
                    format!("no method {other}"),
                )),
            }
        }
    }

    async fn connected_pair() -> (IpcChannel, IpcChannel) {
        let (left, right) = tokio::io::duplex(256 * 1024);
        let server = tokio::spawn(IpcChannel::establish(
            right,
            ChannelConfig::default(),
            Some(Arc::new(EchoService) as Arc<dyn InboundService>),
        ));
        let client = IpcChannel::establish(left, ChannelConfig::default(), None)
            .await
            .unwrap();
        (client, server.await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn establish_reaches_ready_on_both_sides() {
        let (client, server) = connected_pair().await;
        assert_eq!(client.state(), ChannelState::Ready);
        assert_eq!(server.state(), ChannelState::Ready);
    }

    #[tokio::test]
    async fn request_response_over_stream() {
        let (client, _server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let result = client
            .multiplexer()
            .invoke("/p/e", "echo", Bytes::from_static(b"over the wire"), &cancel)
            .await
            .unwrap();
        assert_eq!(result.as_ref(), b"over the wire");
    }

    #[tokio::test]
    async fn remote_failure_does_not_fault_channel() {
        let (client, _server) = connected_pair().await;
        let cancel = CancellationToken::new();
        let mux = client.multiplexer();

        let err = mux
            .invoke("/p/e", "fail", Bytes::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Remote(_)));
        assert_eq!(client.state(), ChannelState::Ready);

        // The channel is still usable afterwards.
        let result = mux
            .invoke("/p/e", "echo", Bytes::from_static(b"still alive"), &cancel)
            .await
            .unwrap();
        assert_eq!(result.as_ref(), b"still alive");
    }

    #[tokio::test]
    async fn concurrent_calls_no_cross_talk() {
        let (client, _server) = connected_pair().await;
        let mux = client.multiplexer();

        let mut invokers = Vec::new();
        for i in 0..100u32 {
            let mux = mux.clone();
            invokers.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let payload = format!("msg-{i}");
                let result = mux
                    .invoke("/p/e", "echo", Bytes::from(payload.clone()), &cancel)
                    .await
                    .unwrap();
                assert_eq!(result.as_ref(), payload.as_bytes());
            }));
        }
        for invoker in invokers {
            invoker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn cancellation_resolves_without_faulting_channel() {
        let (client, _server) = connected_pair().await;
        let mux = client.multiplexer();
        let cancel = CancellationToken::new();

        let invoker = {
            let mux = mux.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { mux.invoke("/p/e", "hang", Bytes::new(), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = invoker.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::Cancelled));
        assert_eq!(client.state(), ChannelState::Ready);

        let other = CancellationToken::new();
        let result = mux
            .invoke("/p/e", "echo", Bytes::from_static(b"after cancel"), &other)
            .await
            .unwrap();
        assert_eq!(result.as_ref(), b"after cancel");
    }

    #[tokio::test]
    async fn peer_close_faults_outstanding_calls() {
        let (client, server) = connected_pair().await;
        let mux = client.multiplexer();

        let mut invokers = Vec::new();
        for _ in 0..5 {
            let mux = mux.clone();
            invokers.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                mux.invoke("/p/e", "hang", Bytes::new(), &cancel).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        server.close();

        for invoker in invokers {
            let err = invoker.await.unwrap().unwrap_err();
            assert!(matches!(err, ChannelError::Faulted(_)));
        }
        client.closed().await;
        assert!(client.state().is_terminal());
    }

    #[tokio::test]
    async fn no_calls_after_bad_handshake() {
        let (left, right) = tokio::io::duplex(64 * 1024);

        // Peer that presents a wrong magic number.
        let rogue = tokio::spawn(async move {
            let (_rr, mut rw) = tokio::io::split(right);
            let mut out = BytesMut::new();
            encode_frame(
                &IpcFrame::HandshakeRequest { magic: 0xDEAD_BEEF },
                &mut out,
            )
            .unwrap();
            rw.write_all(&out).await.unwrap();
            rw.flush().await.unwrap();
        });

        let err = IpcChannel::establish(left, ChannelConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeMismatch { .. }));
        rogue.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (client, _server) = connected_pair().await;
        client.close();
        client.close();
        assert_eq!(client.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn drop_behaves_like_close() {
        let (client, server) = connected_pair().await;
        let mux = client.multiplexer();

        let invoker = {
            let mux = mux.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                mux.invoke("/p/e", "hang", Bytes::new(), &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(client);

        let err = invoker.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::Faulted(_)));

        let cancel = CancellationToken::new();
        let err = mux
            .invoke("/p/e", "echo", Bytes::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Faulted(_)));

        // The peer observes the teardown as a closed stream.
        server.closed().await;
        assert!(server.state().is_terminal());
    }
}
