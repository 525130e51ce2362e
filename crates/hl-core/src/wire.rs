//! Length-prefixed frame codec for the session byte stream.
//!
//! Uses `rkyv` for validated deserialization of payloads. The wire format is:
//!
//! ```text
//! ┌────────────────┬────────────┬──────────────────────────┐
//! │ body length    │ msg_type   │ rkyv-serialized payload  │
//! │ u32 LE         │ u8         │ variable (may be empty)  │
//! └────────────────┴────────────┴──────────────────────────┘
//! ```
//!
//! The body length counts `msg_type` plus payload. A session is an ordered
//! sequence of `Batch` frames, one `EndOfStream` frame from the producer, and
//! exactly one `Summary` frame back from the consumer.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HlError;
use crate::types::{Batch, Summary};

/// Default upper bound for one frame body (10 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Size of the length prefix.
const LEN_PREFIX: usize = 4;

/// Frame discriminant, the first byte of every body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Batch = 1,
    EndOfStream = 2,
    Summary = 3,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Batch),
            2 => Some(Self::EndOfStream),
            3 => Some(Self::Summary),
            _ => None,
        }
    }
}

/// Copy payload into an aligned buffer and decode with rkyv.
macro_rules! decode_rkyv {
    ($T:ty, $payload:expr) => {{
        let mut a = rkyv::util::AlignedVec::<16>::with_capacity($payload.len());
        a.extend_from_slice($payload);
        rkyv::from_bytes::<$T, rkyv::rancor::Error>(&a)
            .map_err(|e| HlError::Codec(format!("decode {}: {e}", stringify!($T))))
    }};
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Batch(Batch),
    /// Producer will send no more batches.
    EndOfStream,
    Summary(Summary),
}

impl Frame {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Batch(_) => MessageType::Batch,
            Self::EndOfStream => MessageType::EndOfStream,
            Self::Summary(_) => MessageType::Summary,
        }
    }

    /// Encode into a body: `[msg_type] ++ [rkyv payload]`.
    pub fn encode(&self) -> Result<Vec<u8>, HlError> {
        fn with_type(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
            let mut buf = Vec::with_capacity(1 + payload.len());
            buf.push(msg_type as u8);
            buf.extend_from_slice(payload);
            buf
        }

        type E = rkyv::rancor::Error;
        let codec_err = |e: E| HlError::Codec(format!("encode {:?}: {e}", self.message_type()));
        match self {
            Self::Batch(b) => Ok(with_type(MessageType::Batch, &rkyv::to_bytes::<E>(b).map_err(codec_err)?)),
            Self::EndOfStream => Ok(with_type(MessageType::EndOfStream, &[])),
            Self::Summary(s) => Ok(with_type(MessageType::Summary, &rkyv::to_bytes::<E>(s).map_err(codec_err)?)),
        }
    }

    /// Decode a body produced by [`encode`](Self::encode).
    pub fn decode(body: &[u8]) -> Result<Self, HlError> {
        let (&tag, payload) = body.split_first().ok_or_else(|| HlError::Codec("empty frame".into()))?;
        let msg_type = MessageType::from_u8(tag).ok_or_else(|| HlError::Codec(format!("unknown message type {tag}")))?;

        match msg_type {
            MessageType::Batch => {
                let batch: Batch = decode_rkyv!(Batch, payload)?;
                if batch.is_empty() {
                    return Err(HlError::Codec("received empty batch".into()));
                }
                Ok(Self::Batch(batch))
            }
            MessageType::EndOfStream => {
                if !payload.is_empty() {
                    return Err(HlError::Codec("end-of-stream frame carries a payload".into()));
                }
                Ok(Self::EndOfStream)
            }
            MessageType::Summary => Ok(Self::Summary(decode_rkyv!(Summary, payload)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// FramedStream
// ---------------------------------------------------------------------------

/// Frame reader/writer over any ordered, reliable byte stream.
pub struct FramedStream<S> {
    io: S,
    max_frame_len: usize,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, max_frame_len: usize) -> Self {
        Self { io, max_frame_len }
    }

    /// Encode and write one frame, then flush.
    ///
    /// Encoding and size checks happen before any byte is written, so a
    /// `Codec` error leaves the stream untouched.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), HlError> {
        let body = frame.encode()?;
        if body.len() > self.max_frame_len {
            return Err(HlError::Codec(format!(
                "frame of {} bytes exceeds limit of {}",
                body.len(),
                self.max_frame_len
            )));
        }

        let mut buf = Vec::with_capacity(LEN_PREFIX + body.len());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);

        self.io.write_all(&buf).await.map_err(|e| HlError::TransportFailure(format!("write: {e}")))?;
        self.io.flush().await.map_err(|e| HlError::TransportFailure(format!("flush: {e}")))
    }

    /// Read one frame. Returns `Ok(None)` on a clean EOF at a frame boundary;
    /// EOF anywhere inside a frame, prefix included, is a transport failure.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, HlError> {
        let mut prefix = [0u8; LEN_PREFIX];
        let mut filled = 0;
        while filled < LEN_PREFIX {
            let n = match self.io.read(&mut prefix[filled..]).await {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(HlError::TransportFailure(format!("read: {e}"))),
            };
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(HlError::TransportFailure(format!("connection closed after {filled} prefix byte(s)")));
            }
            filled += n;
        }

        let len = u32::from_le_bytes(prefix) as usize;
        if len == 0 || len > self.max_frame_len {
            return Err(HlError::Codec(format!("invalid frame length {len} (limit {})", self.max_frame_len)));
        }

        let mut body = vec![0u8; len];
        self.io.read_exact(&mut body).await.map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => HlError::TransportFailure("connection closed mid-frame".into()),
            _ => HlError::TransportFailure(format!("read: {e}")),
        })?;

        Frame::decode(&body).map(Some)
    }

    /// Shut down the write half, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), HlError> {
        self.io.shutdown().await.map_err(|e| HlError::TransportFailure(format!("shutdown: {e}")))
    }
}
