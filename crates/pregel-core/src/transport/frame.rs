//! Length-prefixed JSON frames
//!
//! ```text
//! ┌────────────────┬──────────────────────────┐
//! │ len: u16 (LE)  │ body: len bytes of JSON  │
//! └────────────────┴──────────────────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::PregelError;

/// Largest body a frame can carry
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Serialize `message` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), PregelError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(PregelError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(2 + body.len());
    frame.extend_from_slice(&(body.len() as u16).to_le_bytes());
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and deserialize it
///
/// Returns `Ok(None)` when the peer closed the connection cleanly at a frame
/// boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, PregelError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 2];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u16::from_le_bytes(header) as usize;
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| PregelError::transport_error(format!("truncated frame: {}", e)))?;

    Ok(Some(serde_json::from_slice(&body)?))
}
