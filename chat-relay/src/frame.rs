//! Length-prefixed framing over a raw byte stream.
//!
//! Every frame is an 8 byte little-endian `u64` length followed by exactly that
//! many payload bytes:
//!
//! ```text
//! [len: u64 LE][payload: len bytes]
//! ```
//!
//! Readers always consume the full prefix before touching the payload and only
//! hand back a payload once all of its bytes have arrived, so higher layers
//! never observe a partial frame.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix on the wire.
pub const LENGTH_PREFIX_LEN: usize = 8;

/// Upper bound on buffer space reserved ahead of payload bytes actually received.
const READ_RESERVE_LIMIT: usize = 64 * 1024;

/// Builds the wire representation of one frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Writes `payload` as a single frame and flushes the writer.
///
/// Prefix and payload go out in one `write_all`, so a failure part-way leaves
/// the stream unusable rather than silently desynchronised.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}

/// Reads one frame and returns its payload.
///
/// A stream that ends anywhere inside a frame, including before the first
/// prefix byte, yields [`io::ErrorKind::UnexpectedEof`].
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    read_frame_limited(reader, None).await
}

/// Like [`read_frame`], but rejects frames whose declared length exceeds
/// `max_len` with [`io::ErrorKind::InvalidData`] before reading the payload.
pub async fn read_frame_limited<R>(reader: &mut R, max_len: Option<u64>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    reader.read_exact(&mut prefix).await?;
    let len = u64::from_le_bytes(prefix);

    if let Some(max_len) = max_len {
        if len > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit of {max_len}"),
            ));
        }
    }

    // The prefix is untrusted; grow the buffer as bytes arrive instead of
    // allocating `len` up front.
    let reserve = usize::try_from(len).map_or(READ_RESERVE_LIMIT, |len| len.min(READ_RESERVE_LIMIT));
    let mut payload = Vec::with_capacity(reserve);
    let read = (&mut *reader).take(len).read_to_end(&mut payload).await?;

    if (read as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream closed after {read} of {len} payload bytes"),
        ));
    }

    Ok(payload)
}
