use std::time::Duration;

use bytes::BytesMut;
use procmesh_frame::{
    decode_frame, encode_frame, IpcFrame, HANDSHAKE_REQUEST_MAGIC, HANDSHAKE_RESPONSE_MAGIC,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ChannelError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for the magic-number handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Bound on the whole exchange. Exceeding it is fatal to the channel.
    pub timeout: Duration,
    /// Maximum accepted frame payload during the handshake.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_handshake_payload: 16 * 1024,
        }
    }
}

/// Run the symmetric handshake over a freshly established stream.
///
/// Each side sends a `HandshakeRequest` carrying the well-known request
/// magic, validates the peer's request, replies with a `HandshakeResponse`
/// carrying the response magic, and validates the peer's response. Any
/// mismatch is fatal; there is no retry at this layer.
///
/// Bytes left in `buf` after a successful handshake belong to the frame
/// pump (the peer may have pipelined frames behind its response).
pub(crate) async fn run_handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut BytesMut,
    config: &HandshakeConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(config.timeout, exchange(reader, writer, buf, config))
        .await
        .map_err(|_| ChannelError::HandshakeTimeout(config.timeout))?
}

async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut BytesMut,
    config: &HandshakeConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send_frame(
        writer,
        &IpcFrame::HandshakeRequest {
            magic: HANDSHAKE_REQUEST_MAGIC,
        },
    )
    .await?;

    match read_frame(reader, buf, config.max_handshake_payload).await? {
        IpcFrame::HandshakeRequest { magic } if magic == HANDSHAKE_REQUEST_MAGIC => {}
        IpcFrame::HandshakeRequest { magic } => {
            return Err(ChannelError::HandshakeMismatch {
                expected: HANDSHAKE_REQUEST_MAGIC,
                actual: magic,
            });
        }
        other => {
            return Err(ChannelError::HandshakeFailed(format!(
                "expected HandshakeRequest, got {}",
                other.kind()
            )));
        }
    }

    send_frame(
        writer,
        &IpcFrame::HandshakeResponse {
            magic: HANDSHAKE_RESPONSE_MAGIC,
        },
    )
    .await?;

    match read_frame(reader, buf, config.max_handshake_payload).await? {
        IpcFrame::HandshakeResponse { magic } if magic == HANDSHAKE_RESPONSE_MAGIC => Ok(()),
        IpcFrame::HandshakeResponse { magic } => Err(ChannelError::HandshakeMismatch {
            expected: HANDSHAKE_RESPONSE_MAGIC,
            actual: magic,
        }),
        other => Err(ChannelError::HandshakeFailed(format!(
            "expected HandshakeResponse, got {}",
            other.kind()
        ))),
    }
}

async fn send_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &IpcFrame) -> Result<()> {
    let mut out = BytesMut::new();
    encode_frame(frame, &mut out)?;
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_payload: usize,
) -> Result<IpcFrame> {
    loop {
        if let Some(frame) = decode_frame(buf, max_payload)? {
            return Ok(frame);
        }

        buf.reserve(READ_CHUNK_SIZE);
        let read = reader.read_buf(buf).await?;
        if read == 0 {
            return Err(ChannelError::HandshakeFailed(
                "connection closed during handshake".to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn symmetric_handshake_succeeds() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (mut lr, mut lw) = tokio::io::split(left);
        let (mut rr, mut rw) = tokio::io::split(right);
        let config = HandshakeConfig::default();

        let peer = {
            let config = config.clone();
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                run_handshake(&mut rr, &mut rw, &mut buf, &config).await
            })
        };

        let mut buf = BytesMut::new();
        run_handshake(&mut lr, &mut lw, &mut buf, &config)
            .await
            .unwrap();
        peer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wrong_request_magic_is_fatal() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (mut lr, mut lw) = tokio::io::split(left);
        let (_rr, mut rw) = tokio::io::split(right);

        // Impersonate an incompatible build on the peer side.
        send_frame(&mut rw, &IpcFrame::HandshakeRequest { magic: 0xDEAD_BEEF })
            .await
            .unwrap();

        let mut buf = BytesMut::new();
        let err = run_handshake(&mut lr, &mut lw, &mut buf, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::HandshakeMismatch {
                expected: HANDSHAKE_REQUEST_MAGIC,
                actual: 0xDEAD_BEEF,
            }
        ));
    }

    #[tokio::test]
    async fn wrong_response_magic_is_fatal() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (mut lr, mut lw) = tokio::io::split(left);
        let (mut rr, mut rw) = tokio::io::split(right);

        let peer = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            // Valid request, then a corrupted response.
            let frame = read_frame(&mut rr, &mut buf, 16 * 1024).await.unwrap();
            assert!(matches!(frame, IpcFrame::HandshakeRequest { .. }));
            send_frame(
                &mut rw,
                &IpcFrame::HandshakeRequest {
                    magic: HANDSHAKE_REQUEST_MAGIC,
                },
            )
            .await
            .unwrap();
            send_frame(&mut rw, &IpcFrame::HandshakeResponse { magic: 0x0BAD_F00D })
                .await
                .unwrap();
            // Keep the stream open until the local side has sent its
            // response, otherwise its write fails before it can decode
            // the bad magic.
            let frame = read_frame(&mut rr, &mut buf, 16 * 1024).await.unwrap();
            assert!(matches!(frame, IpcFrame::HandshakeResponse { .. }));
        });

        let mut buf = BytesMut::new();
        let err = run_handshake(&mut lr, &mut lw, &mut buf, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::HandshakeMismatch {
                expected: HANDSHAKE_RESPONSE_MAGIC,
                actual: 0x0BAD_F00D,
            }
        ));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_frame_kind_fails_handshake() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (mut lr, mut lw) = tokio::io::split(left);
        let (_rr, mut rw) = tokio::io::split(right);

        send_frame(&mut rw, &IpcFrame::CancelRequest { correlation_id: 1 })
            .await
            .unwrap();

        let mut buf = BytesMut::new();
        let err = run_handshake(&mut lr, &mut lw, &mut buf, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (left, _right) = tokio::io::duplex(64 * 1024);
        let (mut lr, mut lw) = tokio::io::split(left);
        let config = HandshakeConfig {
            timeout: Duration::from_millis(25),
            ..HandshakeConfig::default()
        };

        let mut buf = BytesMut::new();
        let err = run_handshake(&mut lr, &mut lw, &mut buf, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeTimeout(_)));
    }

    #[tokio::test]
    async fn closed_stream_fails_handshake() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (mut lr, mut lw) = tokio::io::split(left);
        drop(right);

        let mut buf = BytesMut::new();
        let err = run_handshake(&mut lr, &mut lw, &mut buf, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::HandshakeFailed(_) | ChannelError::Io(_)
        ));
    }
}
