//! Frame encoding and decoding.
//!
//! Every envelope travels as one length-prefixed frame:
//! ```text
//! ┌───────────────┬──────────────────────┐
//! │ Frame length  │ Envelope bytes       │
//! │ 8 bytes       │ `length` bytes       │
//! │ uint64 BE     │                      │
//! └───────────────┴──────────────────────┘
//! ```
//!
//! Reads consume exactly one frame and never buffer across calls, so a
//! connection can alternate strictly between writing a request and reading
//! its response.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

/// Size of the frame length prefix in bytes.
pub const FRAME_LENGTH_SIZE: usize = 8;

/// Default maximum accepted frame body (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Prefix `payload` with its 8-byte big-endian length.
///
/// # Example
///
/// ```
/// use minirpc::protocol::{encode_frame, FRAME_LENGTH_SIZE};
///
/// let frame = encode_frame(b"hello");
/// assert_eq!(frame.len(), FRAME_LENGTH_SIZE + 5);
/// assert_eq!(&frame[..FRAME_LENGTH_SIZE], &5u64.to_be_bytes());
/// ```
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_LENGTH_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Read exactly one frame body from `reader`.
///
/// Fails with [`RpcError::ShortRead`] if the stream ends before the length
/// prefix or the body is complete, and with [`RpcError::FrameTooLarge`] if the
/// declared length exceeds `max_frame_size` (checked before allocating).
pub async fn read_frame<R>(reader: &mut R, max_frame_size: u64) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    read_frame_or_eof(reader, max_frame_size)
        .await?
        .ok_or(RpcError::ShortRead)
}

/// Like [`read_frame`], but a stream that ends before the first byte of the
/// length prefix yields `Ok(None)`.
///
/// A stream that ends anywhere later is still [`RpcError::ShortRead`].
pub async fn read_frame_or_eof<R>(reader: &mut R, max_frame_size: u64) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; FRAME_LENGTH_SIZE];
    let mut filled = 0;
    while filled < FRAME_LENGTH_SIZE {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(RpcError::ShortRead)
            };
        }
        filled += n;
    }

    let len = u64::from_be_bytes(len_buf);
    if len > max_frame_size {
        return Err(RpcError::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(map_read_error)?;
    Ok(Some(Bytes::from(body)))
}

/// Write `payload` as one frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

fn map_read_error(e: std::io::Error) -> RpcError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RpcError::ShortRead
    } else {
        RpcError::Io(e)
    }
}
