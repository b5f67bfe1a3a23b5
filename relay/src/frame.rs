//! Length-prefixed framing shared by the server and the client.
//!
//! Wire format: `[4-byte big-endian length][payload]`. The payload is an opaque
//! byte blob. A frame carrying the single byte `0x00` is the disconnect
//! sentinel a client sends before leaving.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Payload of the disconnect sentinel frame.
pub const DISCONNECT_SENTINEL: [u8; 1] = [0x00];

/// Largest payload a single frame can describe.
pub const MAX_PAYLOAD_LEN: u32 = u32::MAX;

// Upper bound on the buffer reserved up front from an untrusted header; the
// rest grows as bytes actually arrive.
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => FrameError::ConnectionClosed,
            _ => FrameError::Io(err),
        }
    }
}

/// A validated frame, header included, ready to be written to any number of
/// peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(Vec<u8>);

impl EncodedFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }
}

/// Encodes `payload` into a frame.
///
/// Empty payloads are rejected: a zero length on the wire means "disconnect",
/// and ordinary messages must never look like one.
pub fn encode(payload: &[u8]) -> Result<EncodedFrame, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::InvalidFrame("payload is empty".to_string()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| {
        FrameError::InvalidFrame(format!(
            "payload of {} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit",
            payload.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(EncodedFrame(buf))
}

/// The sentinel frame announcing a voluntary disconnect.
pub fn encode_disconnect() -> EncodedFrame {
    let mut buf = Vec::with_capacity(HEADER_LEN + DISCONNECT_SENTINEL.len());
    buf.extend_from_slice(&(DISCONNECT_SENTINEL.len() as u32).to_be_bytes());
    buf.extend_from_slice(&DISCONNECT_SENTINEL);
    EncodedFrame(buf)
}

/// Returns true when a decoded payload means the peer is leaving.
///
/// An empty payload counts as well, since no well-formed sender produces one.
pub fn is_disconnect(payload: &[u8]) -> bool {
    payload.is_empty() || payload == DISCONNECT_SENTINEL
}

/// Reads one complete frame and returns its payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    read_frame_limited(reader, MAX_PAYLOAD_LEN).await
}

/// Reads one complete frame, rejecting headers that announce more than
/// `max_len` payload bytes.
///
/// The stream closing before the whole frame arrives is reported as
/// [`FrameError::ConnectionClosed`]; a partial frame is never returned.
pub async fn read_frame_limited<R>(reader: &mut R, max_len: u32) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let len = u32::from_be_bytes(header);
    if len > max_len {
        return Err(FrameError::InvalidFrame(format!(
            "frame of {len} bytes exceeds the {max_len} byte limit"
        )));
    }

    let len = len as usize;
    let mut payload = Vec::with_capacity(len.min(INITIAL_PAYLOAD_CAPACITY));
    let read = (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut payload)
        .await?;
    if read != len {
        return Err(FrameError::ConnectionClosed);
    }

    Ok(payload)
}

/// Encodes and writes one frame, then flushes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(payload)?;
    write_encoded(writer, &frame).await
}

pub async fn write_encoded<W>(writer: &mut W, frame: &EncodedFrame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_disconnect<W>(writer: &mut W) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_encoded(writer, &encode_disconnect()).await
}
