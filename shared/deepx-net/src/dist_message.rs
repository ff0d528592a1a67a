//! The wire protocol's tagged message union and its length-prefixed
//! framing.
//!
//! Grounded on the original's `dist_message.h`: every message is written
//! as a `u32` type tag followed by its own fields via the same
//! `OutStream`/`InStream` contract everything else in the workspace uses;
//! the outer frame (`BeginMessage`/`EndMessage`) wraps that body in a
//! 4-byte little-endian length prefix so a reader can tell when a message
//! is fully buffered before attempting to decode it.

use byteorder::{ByteOrder, LittleEndian};

use deepx_core::error::SerializationError;
use deepx_core::stream::{InStream, OutStream, Result};

/// Inbound buffers are rejected past this size -- a `NetworkError`, not a
/// `ProtocolError` (the message might otherwise be well-formed).
pub const MAX_BUF_BYTES: usize = 10 * 1024 * 1024;

/// Length of the frame's length prefix itself.
pub const FRAME_HEADER_LEN: usize = 4;

macro_rules! message_tags {
    ($($tag:literal => $name:ident),+ $(,)?) => {
        $(pub const $name: u32 = $tag;)+
    };
}

message_tags! {
    1 => ECHO_REQUEST,
    2 => ECHO_RESPONSE,
    3 => HEART_BEAT_NOTIFY,
    11 => FILE_REQUEST,
    12 => FILE_RESPONSE,
    13 => FILE_FINISH_NOTIFY,
    14 => PULL_REQUEST,
    15 => PULL_RESPONSE,
    16 => PUSH_NOTIFY,
    17 => MODEL_SAVE_REQUEST,
    18 => MODEL_SAVE_RESPONSE,
    19 => TERMINATION_NOTIFY,
    31 => USER_REQUEST,
    32 => USER_RESPONSE,
    33 => USER_NOTIFY,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DistMessage {
    EchoRequest { buf: Vec<u8> },
    EchoResponse { buf: Vec<u8> },
    HeartBeatNotify,
    FileRequest,
    FileResponse { epoch: i32, file: String },
    FileFinishNotify { file: String, loss: f64, loss_weight: f64 },
    /// `buf` holds a serialised `PullRequest`; `deepx-model` owns the
    /// actual (de)serialisation, so the net layer only moves bytes.
    PullRequest { buf: Vec<u8> },
    /// `buf` holds a serialised `TensorMap`.
    PullResponse { buf: Vec<u8> },
    /// `buf` holds a serialised gradient `TensorMap`.
    PushNotify { buf: Vec<u8> },
    ModelSaveRequest { epoch: i32, timestamp: String, kv_protocol_version: i32 },
    ModelSaveResponse,
    TerminationNotify,
    UserRequest { rpc_type: i32, buf: Vec<u8> },
    UserResponse { rpc_type: i32, buf: Vec<u8> },
    UserNotify { rpc_type: i32, buf: Vec<u8> },
}

impl DistMessage {
    pub fn tag(&self) -> u32 {
        match self {
            DistMessage::EchoRequest { .. } => ECHO_REQUEST,
            DistMessage::EchoResponse { .. } => ECHO_RESPONSE,
            DistMessage::HeartBeatNotify => HEART_BEAT_NOTIFY,
            DistMessage::FileRequest => FILE_REQUEST,
            DistMessage::FileResponse { .. } => FILE_RESPONSE,
            DistMessage::FileFinishNotify { .. } => FILE_FINISH_NOTIFY,
            DistMessage::PullRequest { .. } => PULL_REQUEST,
            DistMessage::PullResponse { .. } => PULL_RESPONSE,
            DistMessage::PushNotify { .. } => PUSH_NOTIFY,
            DistMessage::ModelSaveRequest { .. } => MODEL_SAVE_REQUEST,
            DistMessage::ModelSaveResponse => MODEL_SAVE_RESPONSE,
            DistMessage::TerminationNotify => TERMINATION_NOTIFY,
            DistMessage::UserRequest { .. } => USER_REQUEST,
            DistMessage::UserResponse { .. } => USER_RESPONSE,
            DistMessage::UserNotify { .. } => USER_NOTIFY,
        }
    }

    /// Whether this tag is one of the request kinds that must elicit
    /// exactly one response message (§4.9).
    pub fn requires_response(&self) -> bool {
        matches!(
            self,
            DistMessage::EchoRequest { .. }
                | DistMessage::FileRequest
                | DistMessage::PullRequest { .. }
                | DistMessage::ModelSaveRequest { .. }
                | DistMessage::UserRequest { .. }
        )
    }

    pub fn write_body(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u32_(self.tag())?;
        match self {
            DistMessage::EchoRequest { buf } | DistMessage::EchoResponse { buf } => os.write_bytes(buf),
            DistMessage::HeartBeatNotify
            | DistMessage::FileRequest
            | DistMessage::ModelSaveResponse
            | DistMessage::TerminationNotify => Ok(()),
            DistMessage::FileResponse { epoch, file } => {
                os.write_i32_(*epoch)?;
                os.write_str_(file)
            }
            DistMessage::FileFinishNotify { file, loss, loss_weight } => {
                os.write_str_(file)?;
                os.write_f64_(*loss)?;
                os.write_f64_(*loss_weight)
            }
            DistMessage::PullRequest { buf }
            | DistMessage::PullResponse { buf }
            | DistMessage::PushNotify { buf } => os.write_bytes(buf),
            DistMessage::ModelSaveRequest { epoch, timestamp, kv_protocol_version } => {
                os.write_i32_(*epoch)?;
                os.write_str_(timestamp)?;
                os.write_i32_(*kv_protocol_version)
            }
            DistMessage::UserRequest { rpc_type, buf }
            | DistMessage::UserResponse { rpc_type, buf }
            | DistMessage::UserNotify { rpc_type, buf } => {
                os.write_i32_(*rpc_type)?;
                os.write_bytes(buf)
            }
        }
    }

    pub fn read_body(is: &mut InStream<'_>) -> Result<Self> {
        let tag = is.read_u32_()?;
        Ok(match tag {
            ECHO_REQUEST => DistMessage::EchoRequest { buf: is.read_bytes()? },
            ECHO_RESPONSE => DistMessage::EchoResponse { buf: is.read_bytes()? },
            HEART_BEAT_NOTIFY => DistMessage::HeartBeatNotify,
            FILE_REQUEST => DistMessage::FileRequest,
            FILE_RESPONSE => DistMessage::FileResponse {
                epoch: is.read_i32_()?,
                file: is.read_string()?,
            },
            FILE_FINISH_NOTIFY => DistMessage::FileFinishNotify {
                file: is.read_string()?,
                loss: is.read_f64_()?,
                loss_weight: is.read_f64_()?,
            },
            PULL_REQUEST => DistMessage::PullRequest { buf: is.read_bytes()? },
            PULL_RESPONSE => DistMessage::PullResponse { buf: is.read_bytes()? },
            PUSH_NOTIFY => DistMessage::PushNotify { buf: is.read_bytes()? },
            MODEL_SAVE_REQUEST => DistMessage::ModelSaveRequest {
                epoch: is.read_i32_()?,
                timestamp: is.read_string()?,
                kv_protocol_version: is.read_i32_()?,
            },
            MODEL_SAVE_RESPONSE => DistMessage::ModelSaveResponse,
            TERMINATION_NOTIFY => DistMessage::TerminationNotify,
            USER_REQUEST => DistMessage::UserRequest {
                rpc_type: is.read_i32_()?,
                buf: is.read_bytes()?,
            },
            USER_RESPONSE => DistMessage::UserResponse {
                rpc_type: is.read_i32_()?,
                buf: is.read_bytes()?,
            },
            USER_NOTIFY => DistMessage::UserNotify {
                rpc_type: is.read_i32_()?,
                buf: is.read_bytes()?,
            },
            _ => return Err(SerializationError::Corrupt("unknown message tag")),
        })
    }

    /// `BeginMessage`/`EndMessage`: serialises the body, then prefixes it
    /// with its own length.
    pub fn write_framed(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        self.write_body(&mut body)?;
        if body.len() > MAX_BUF_BYTES {
            return Err(SerializationError::Corrupt("message exceeds MAX_BUF_BYTES"));
        }
        out.write_u32_(body.len() as u32)?;
        out.extend_from_slice(&body);
        Ok(())
    }
}

/// Result of attempting to decode one framed message from the front of an
/// inbound buffer, mirroring `TryReadMessage`'s 0/1/-2 tri-state.
pub enum FrameStatus {
    /// A full message decoded; `consumed` bytes (header + body) should be
    /// dropped from the front of the buffer.
    Complete { message: DistMessage, consumed: usize },
    /// Not enough bytes buffered yet.
    Incomplete,
    /// The length prefix exceeds `MAX_BUF_BYTES`, or the body failed to
    /// decode -- the connection must be closed.
    DecodeError,
}

/// Attempts to decode one framed message from the front of `buf`. Never
/// consumes more than `FRAME_HEADER_LEN` bytes unless a full message is
/// present.
pub fn try_read_message(buf: &[u8]) -> FrameStatus {
    if buf.len() < FRAME_HEADER_LEN {
        return FrameStatus::Incomplete;
    }
    let len = LittleEndian::read_u32(&buf[..FRAME_HEADER_LEN]) as usize;
    if len > MAX_BUF_BYTES {
        return FrameStatus::DecodeError;
    }
    let total = FRAME_HEADER_LEN + len;
    if buf.len() < total {
        return FrameStatus::Incomplete;
    }
    let mut is = InStream::new(&buf[FRAME_HEADER_LEN..total]);
    match DistMessage::read_body(&mut is) {
        Ok(message) => FrameStatus::Complete { message, consumed: total },
        Err(_) => FrameStatus::DecodeError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn echo_request_round_trips_through_framing() {
        let msg = DistMessage::EchoRequest { buf: b"abc".to_vec() };
        let mut out = Vec::new();
        msg.write_framed(&mut out).unwrap();

        match try_read_message(&out) {
            FrameStatus::Complete { message, consumed } => {
                assert_eq!(consumed, out.len());
                assert_eq!(message.tag(), ECHO_REQUEST);
                match message {
                    DistMessage::EchoRequest { buf } => assert_eq!(buf, b"abc"),
                    _ => panic!("wrong variant"),
                }
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn incomplete_buffer_reports_incomplete() {
        let msg = DistMessage::HeartBeatNotify;
        let mut out = Vec::new();
        msg.write_framed(&mut out).unwrap();
        assert!(matches!(try_read_message(&out[..out.len() - 1]), FrameStatus::Incomplete));
    }

    #[test]
    fn oversized_length_prefix_is_decode_error() {
        let mut out = Vec::new();
        out.extend_from_slice(&((MAX_BUF_BYTES + 1) as u32).to_le_bytes());
        assert!(matches!(try_read_message(&out), FrameStatus::DecodeError));
    }

    #[test]
    fn requires_response_matches_request_tags() {
        assert!(DistMessage::EchoRequest { buf: vec![] }.requires_response());
        assert!(DistMessage::FileRequest.requires_response());
        assert!(!DistMessage::HeartBeatNotify.requires_response());
        assert!(!DistMessage::EchoResponse { buf: vec![] }.requires_response());
    }

    #[test]
    fn user_request_round_trips_rpc_type() {
        let msg = DistMessage::UserRequest { rpc_type: 7, buf: vec![1, 2, 3] };
        let mut out = Vec::new();
        msg.write_framed(&mut out).unwrap();
        match try_read_message(&out) {
            FrameStatus::Complete { message: DistMessage::UserRequest { rpc_type, buf }, .. } => {
                assert_eq!(rpc_type, 7);
                assert_eq!(buf, vec![1, 2, 3]);
            }
            _ => panic!("expected Complete UserRequest"),
        }
    }
}
