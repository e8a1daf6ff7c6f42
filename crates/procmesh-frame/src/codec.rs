use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Frame header: length (4) + type (1) = 5 bytes.
///
/// The length field counts the type byte plus the type-specific body.
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Magic number a peer must present in its `HandshakeRequest` ("PMRQ").
pub const HANDSHAKE_REQUEST_MAGIC: u32 = 0x504D_5251;

/// Magic number a peer must present in its `HandshakeResponse` ("PMRS").
pub const HANDSHAKE_RESPONSE_MAGIC: u32 = 0x504D_5253;

const TYPE_HANDSHAKE_REQUEST: u8 = 0x01;
const TYPE_HANDSHAKE_RESPONSE: u8 = 0x02;
const TYPE_CALL_REQUEST: u8 = 0x03;
const TYPE_CALL_RESPONSE: u8 = 0x04;
const TYPE_CANCEL_REQUEST: u8 = 0x05;

const STATUS_OK: u8 = 0x00;
const STATUS_FAULT: u8 = 0x01;

/// Description of an endpoint-side failure carried in a `CallResponse`.
///
/// Serialized as JSON in the response body so the caller can surface the
/// remote error's type and message without faulting the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    /// Remote error type name (e.g. `EndpointNotFound`).
    pub error_type: String,
    /// Human-readable description from the remote side.
    pub message: String,
}

impl RemoteFault {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

/// Outcome carried by a `CallResponse` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    /// Opaque serialized result bytes.
    Ok(Bytes),
    /// The endpoint failed; the channel stays healthy.
    Err(RemoteFault),
}

/// One protocol message unit.
#[derive(Debug, Clone, PartialEq)]
pub enum IpcFrame {
    /// First frame each side sends after stream establishment.
    HandshakeRequest { magic: u32 },
    /// Reply validating the peer's `HandshakeRequest`.
    HandshakeResponse { magic: u32 },
    /// An invocation addressed to `/processUniqueId/endpointId`.
    CallRequest {
        correlation_id: u64,
        address: String,
        method: String,
        args: Bytes,
    },
    /// Completion of the `CallRequest` with the same correlation id.
    CallResponse {
        correlation_id: u64,
        result: CallResult,
    },
    /// Best-effort request to stop a call still executing remotely.
    CancelRequest { correlation_id: u64 },
}

impl IpcFrame {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            IpcFrame::HandshakeRequest { .. } => "HandshakeRequest",
            IpcFrame::HandshakeResponse { .. } => "HandshakeResponse",
            IpcFrame::CallRequest { .. } => "CallRequest",
            IpcFrame::CallResponse { .. } => "CallResponse",
            IpcFrame::CancelRequest { .. } => "CancelRequest",
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬───────────────────────┐
/// │ Length     │ Type     │ Type-specific body    │
/// │ (4B LE)    │ (1B)     │ (Length - 1 bytes)    │
/// └────────────┴──────────┴───────────────────────┘
/// ```
pub fn encode_frame(frame: &IpcFrame, dst: &mut BytesMut) -> Result<()> {
    let mut body = BytesMut::new();
    let frame_type = match frame {
        IpcFrame::HandshakeRequest { magic } => {
            body.put_u32_le(*magic);
            TYPE_HANDSHAKE_REQUEST
        }
        IpcFrame::HandshakeResponse { magic } => {
            body.put_u32_le(*magic);
            TYPE_HANDSHAKE_RESPONSE
        }
        IpcFrame::CallRequest {
            correlation_id,
            address,
            method,
            args,
        } => {
            body.put_u64_le(*correlation_id);
            put_string(&mut body, address)?;
            put_string(&mut body, method)?;
            body.put_slice(args);
            TYPE_CALL_REQUEST
        }
        IpcFrame::CallResponse {
            correlation_id,
            result,
        } => {
            body.put_u64_le(*correlation_id);
            match result {
                CallResult::Ok(bytes) => {
                    body.put_u8(STATUS_OK);
                    body.put_slice(bytes);
                }
                CallResult::Err(fault) => {
                    body.put_u8(STATUS_FAULT);
                    body.put_slice(&serde_json::to_vec(fault)?);
                }
            }
            TYPE_CALL_RESPONSE
        }
        IpcFrame::CancelRequest { correlation_id } => {
            body.put_u64_le(*correlation_id);
            TYPE_CANCEL_REQUEST
        }
    };

    let payload_len = 1 + body.len();
    if payload_len > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: u32::MAX as usize,
        });
    }

    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u32_le(payload_len as u32);
    dst.put_u8(frame_type);
    dst.put_slice(&body);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<IpcFrame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let payload_len = u32::from_le_bytes(src[0..4].try_into().expect("4-byte slice")) as usize;
    if payload_len == 0 {
        return Err(FrameError::TruncatedPayload {
            frame: "header",
            len: 0,
        });
    }
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = 4 + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(4);
    let frame_type = src.get_u8();
    let mut body = src.split_to(payload_len - 1).freeze();

    let frame = match frame_type {
        TYPE_HANDSHAKE_REQUEST => IpcFrame::HandshakeRequest {
            magic: take_u32(&mut body, "HandshakeRequest")?,
        },
        TYPE_HANDSHAKE_RESPONSE => IpcFrame::HandshakeResponse {
            magic: take_u32(&mut body, "HandshakeResponse")?,
        },
        TYPE_CALL_REQUEST => {
            let correlation_id = take_u64(&mut body, "CallRequest")?;
            let address = take_string(&mut body, "address")?;
            let method = take_string(&mut body, "method")?;
            IpcFrame::CallRequest {
                correlation_id,
                address,
                method,
                args: body,
            }
        }
        TYPE_CALL_RESPONSE => {
            let correlation_id = take_u64(&mut body, "CallResponse")?;
            if body.is_empty() {
                return Err(FrameError::TruncatedPayload {
                    frame: "CallResponse",
                    len: 0,
                });
            }
            let status = body.get_u8();
            let result = match status {
                STATUS_OK => CallResult::Ok(body),
                STATUS_FAULT => CallResult::Err(serde_json::from_slice(&body)?),
                other => return Err(FrameError::UnknownResponseStatus(other)),
            };
            IpcFrame::CallResponse {
                correlation_id,
                result,
            }
        }
        TYPE_CANCEL_REQUEST => IpcFrame::CancelRequest {
            correlation_id: take_u64(&mut body, "CancelRequest")?,
        },
        other => return Err(FrameError::UnknownFrameType(other)),
    };

    Ok(Some(frame))
}

fn put_string(dst: &mut BytesMut, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: value.len(),
            max: u16::MAX as usize,
        });
    }
    dst.put_u16_le(value.len() as u16);
    dst.put_slice(value.as_bytes());
    Ok(())
}

fn take_u32(body: &mut Bytes, frame: &'static str) -> Result<u32> {
    if body.len() < 4 {
        return Err(FrameError::TruncatedPayload {
            frame,
            len: body.len(),
        });
    }
    Ok(body.get_u32_le())
}

fn take_u64(body: &mut Bytes, frame: &'static str) -> Result<u64> {
    if body.len() < 8 {
        return Err(FrameError::TruncatedPayload {
            frame,
            len: body.len(),
        });
    }
    Ok(body.get_u64_le())
}

fn take_string(body: &mut Bytes, field: &'static str) -> Result<String> {
    if body.len() < 2 {
        return Err(FrameError::TruncatedPayload {
            frame: field,
            len: body.len(),
        });
    }
    let len = body.get_u16_le() as usize;
    if body.len() < len {
        return Err(FrameError::TruncatedPayload {
            frame: field,
            len: body.len(),
        });
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8 { field })
}
