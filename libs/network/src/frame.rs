//! Wire frames and length-prefixed framing.
//!
//! ```text
//! dialer:   [0x01 0x01] [len u32 BE][bincode Frame] [len][Frame] ...
//! acceptor:             [len u32 BE][bincode Frame] [len][Frame] ...
//! ```
//!
//! The two-byte preface is written once by the dialing side so that a
//! listener sharing its port with another protocol can tell the two apart
//! by peeking.

use crate::message::Cnss;
use crate::{Result, TransportError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// First bytes on every gateway connection
pub const PREFACE: [u8; 2] = [0x01, 0x01];

/// Default upper bound of a single frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Everything that travels on a connection after the preface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Hello {
        meta: Bytes,
        client_id: Option<u64>,
    },
    Welcome {
        client_id: u64,
    },
    Reject {
        reason: String,
    },
    Heartbeat,
    Register {
        stream_id: u64,
        method: String,
    },
    Request {
        stream_id: u64,
        request_id: u64,
        method: String,
        data: Bytes,
        custom: Bytes,
    },
    Response {
        stream_id: u64,
        request_id: u64,
        data: Bytes,
        custom: Bytes,
        error: Option<String>,
    },
    Publish {
        stream_id: u64,
        message_id: u64,
        topic: String,
        data: Bytes,
        custom: Bytes,
        cnss: Cnss,
    },
    Ack {
        stream_id: u64,
        message_id: u64,
        error: Option<String>,
    },
    Open {
        stream_id: u64,
        peer: String,
        meta: Bytes,
    },
    Opened {
        stream_id: u64,
        error: Option<String>,
    },
    Raw {
        stream_id: u64,
        data: Bytes,
    },
    Close {
        stream_id: u64,
    },
    Goaway,
}

impl Frame {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Welcome { .. } => "welcome",
            Frame::Reject { .. } => "reject",
            Frame::Heartbeat => "heartbeat",
            Frame::Register { .. } => "register",
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
            Frame::Publish { .. } => "publish",
            Frame::Ack { .. } => "ack",
            Frame::Open { .. } => "open",
            Frame::Opened { .. } => "opened",
            Frame::Raw { .. } => "raw",
            Frame::Close { .. } => "close",
            Frame::Goaway => "goaway",
        }
    }
}

pub(crate) async fn write_preface<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&PREFACE).await?;
    Ok(())
}

pub(crate) async fn read_preface<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut preface = [0u8; 2];
    reader.read_exact(&mut preface).await?;
    if preface != PREFACE {
        return Err(TransportError::protocol(format!(
            "unexpected preface {:02x}{:02x}",
            preface[0], preface[1]
        )));
    }
    Ok(())
}

/// Write one length-prefixed frame and flush
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let body = bincode::serialize(frame)?;
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream between frames
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<Frame>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_frame_size {
        return Err(TransportError::protocol(format!(
            "frame size {} exceeds maximum {}",
            len, max_frame_size
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}
