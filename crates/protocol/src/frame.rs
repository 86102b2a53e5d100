//! Frame codec: `[4-byte little-endian length][JSON payload]`

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Size of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound on a single handshake frame payload (64KB)
///
/// A peer declaring a larger frame is rejected before any buffer is allocated.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame truncated: stream ended before {expected} bytes were read")]
    Truncated { expected: usize },

    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Trailing data after frame: {0} bytes")]
    TrailingData(usize),

    #[error("Malformed frame payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Encode a message into a complete frame
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Bytes, FrameError> {
    let payload = serde_json::to_vec(message)?;
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32_le(len);
    buf.put_slice(&payload);

    trace!("Encoded frame: {} payload bytes", payload.len());

    Ok(buf.freeze())
}

/// Decode a message from a buffer holding exactly one frame
pub fn decode_frame<T: DeserializeOwned>(data: &[u8], max_len: usize) -> Result<T, FrameError> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated {
            expected: FRAME_HEADER_LEN,
        });
    }

    let mut header = [0u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&data[..FRAME_HEADER_LEN]);
    let len = declared_len(header, max_len)?;

    let body = &data[FRAME_HEADER_LEN..];
    if body.len() < len {
        return Err(FrameError::Truncated { expected: len });
    }
    if body.len() > len {
        return Err(FrameError::TrailingData(body.len() - len));
    }

    Ok(serde_json::from_slice(body)?)
}

/// Write one frame and flush
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame's raw payload, bounded by `max_len`
pub async fn read_raw_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_exactly(reader, &mut header).await?;
    let len = declared_len(header, max_len)?;

    let mut payload = vec![0u8; len];
    read_exactly(reader, &mut payload).await?;

    trace!("Read frame: {} payload bytes", len);

    Ok(payload)
}

/// Read one frame and decode its JSON payload
pub async fn read_frame<T, R>(reader: &mut R, max_len: usize) -> Result<T, FrameError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin + ?Sized,
{
    let payload = read_raw_frame(reader, max_len).await?;
    Ok(serde_json::from_slice(&payload)?)
}

fn declared_len(header: [u8; FRAME_HEADER_LEN], max_len: usize) -> Result<usize, FrameError> {
    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge {
            size: len,
            max: max_len,
        });
    }
    Ok(len)
}

async fn read_exactly<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated {
            expected: buf.len(),
        }),
        Err(e) => Err(FrameError::Io(e)),
    }
}
