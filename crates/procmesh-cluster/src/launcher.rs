use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::endpoint::EndpointFactory;
use crate::error::Result;
use crate::host::EndpointHost;
use crate::registry::EndpointRegistry;
use crate::types::ProcessCreationInfo;
use procmesh_channel::{ChannelConfig, InboundService, IpcChannel};

/// Byte stream a launcher hands back, erased so OS sockets and
/// in-process duplex pipes look the same to the broker.
pub trait IpcStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<S> IpcStream for S where S: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedDuplex = Box<dyn IpcStream>;

/// A launched subordinate: its stream, plus the OS child when one exists.
pub struct Launched {
    pub stream: BoxedDuplex,
    pub child: Option<tokio::process::Child>,
}

/// Starts subordinate processes and connects a duplex stream to each.
///
/// Implementations decide what a "process" is: an OS child connected
/// over a Unix socket, or an in-process host on a duplex pipe for tests.
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    async fn launch(&self, info: &ProcessCreationInfo) -> Result<Launched>;
}

/// Runs each "process" as a task inside the current process, connected
/// over an in-memory duplex pipe. The wire protocol is exercised in
/// full; only the OS process boundary is skipped.
pub struct LoopbackLauncher {
    factory: Arc<EndpointFactory>,
    config: ChannelConfig,
}

impl LoopbackLauncher {
    pub fn new(factory: Arc<EndpointFactory>, config: ChannelConfig) -> Self {
        Self { factory, config }
    }
}

#[async_trait]
impl ProcessLauncher for LoopbackLauncher {
    async fn launch(&self, info: &ProcessCreationInfo) -> Result<Launched> {
        let (broker_side, host_side) = tokio::io::duplex(256 * 1024);

        let registry = Arc::new(EndpointRegistry::new(&info.process_unique_id));
        let host = Arc::new(EndpointHost::new(registry, Arc::clone(&self.factory)));
        let config = self.config.clone();
        let process_id = info.process_unique_id.clone();
        tokio::spawn(async move {
            match IpcChannel::establish(host_side, config, Some(host as Arc<dyn InboundService>))
                .await
            {
                Ok(channel) => channel.closed().await,
                Err(err) => {
                    tracing::warn!(process_id, error = %err, "loopback host handshake failed");
                }
            }
        });

        Ok(Launched {
            stream: Box::new(broker_side),
            child: None,
        })
    }
}

#[cfg(unix)]
pub use os::OsProcessLauncher;

#[cfg(unix)]
mod os {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::process::Stdio;
    use std::time::Duration;

    use tokio::net::UnixListener;
    use tokio::process::Command;

    use super::*;
    use crate::error::ClusterError;
    use crate::types::TargetFrameworkKind;

    const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Spawns real OS children and accepts their connection on a Unix
    /// socket. One socket per launch, removed once the child connects.
    pub struct OsProcessLauncher {
        binaries: HashMap<TargetFrameworkKind, PathBuf>,
        socket_dir: PathBuf,
        accept_timeout: Duration,
    }

    impl OsProcessLauncher {
        pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
            Self {
                binaries: HashMap::new(),
                socket_dir: socket_dir.into(),
                accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            }
        }

        /// Register the host binary to exec for a target framework kind.
        pub fn register_binary(
            mut self,
            kind: TargetFrameworkKind,
            binary: impl Into<PathBuf>,
        ) -> Self {
            self.binaries.insert(kind, binary.into());
            self
        }

        pub fn accept_timeout(mut self, timeout: Duration) -> Self {
            self.accept_timeout = timeout;
            self
        }

        fn socket_path(&self, process_id: &str) -> PathBuf {
            let pid = std::process::id();
            self.socket_dir.join(format!("procmesh-{pid}-{process_id}.sock"))
        }
    }

    #[async_trait]
    impl ProcessLauncher for OsProcessLauncher {
        async fn launch(&self, info: &ProcessCreationInfo) -> Result<Launched> {
            let binary = self.binaries.get(&info.framework.kind).ok_or(
                ClusterError::TargetFrameworkUnsupported(info.framework.kind),
            )?;

            let socket = self.socket_path(&info.process_unique_id);
            // A stale socket from a previous run blocks the bind.
            let _ = std::fs::remove_file(&socket);
            let listener = UnixListener::bind(&socket).map_err(|source| {
                ClusterError::ProcessLaunchFailure {
                    process: info.process_unique_id.clone(),
                    source,
                }
            })?;

            let child = Command::new(binary)
                .arg("--socket")
                .arg(&socket)
                .arg("--process-id")
                .arg(&info.process_unique_id)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| ClusterError::ProcessLaunchFailure {
                    process: info.process_unique_id.clone(),
                    source,
                })?;
            tracing::info!(
                process_id = %info.process_unique_id,
                binary = %binary.display(),
                "subordinate process spawned"
            );

            let accept = tokio::time::timeout(self.accept_timeout, listener.accept()).await;
            let _ = std::fs::remove_file(&socket);
            let (stream, _addr) = match accept {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(source)) => {
                    return Err(ClusterError::ProcessLaunchFailure {
                        process: info.process_unique_id.clone(),
                        source,
                    });
                }
                Err(_elapsed) => {
                    return Err(ClusterError::ProcessLaunchFailure {
                        process: info.process_unique_id.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "subordinate did not connect before the accept timeout",
                        ),
                    });
                }
            };

            Ok(Launched {
                stream: Box::new(stream),
                child: Some(child),
            })
        }
    }
}
