//! Length-prefixed framing of [`Envelope`]s over a byte stream.
//!
//! Each frame is a 4-byte big-endian payload length followed by the JSON
//! encoding of one envelope.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_SIZE};
use crate::error::FrameError;
use crate::protocol::Envelope;

/// Encode an envelope into a complete frame.
pub fn encode_frame(envelope: &Envelope) -> Result<BytesMut, FrameError> {
    let payload = envelope.to_bytes().map_err(FrameError::Encode)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf)
}

/// Write one framed envelope and flush.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(envelope)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed envelope.
///
/// Not cancel-safe: dropping the future mid-frame loses stream alignment, so
/// callers that race it against timers must keep the future pinned.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Closed)
        }
        Err(e) => return Err(FrameError::Io(e)),
    };

    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Envelope::from_bytes(&payload).map_err(FrameError::Decode)
}
