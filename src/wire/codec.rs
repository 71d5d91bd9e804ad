//! Frame codec for the pubsub transport: a 4-byte big-endian length prefix
//! followed by a JSON-encoded frame body, with a hard size ceiling.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("transport i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the frame ceiling")]
    FrameTooLarge(usize),
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Write one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` signals an orderly close at a frame boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(WireError::Io(err)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Presence, Stanza};

    #[tokio::test]
    async fn frames_survive_the_wire_and_eof_is_orderly() {
        let stanza = Stanza::Presence(Presence {
            from: None,
            to: Some("example.org".parse().unwrap()),
        });
        let mut buf = Vec::new();
        write_frame(&mut buf, &stanza).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded: Option<Stanza> = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded, Some(stanza));
        let eof: Option<Stanza> = read_frame(&mut cursor).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES as u32 + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result: Result<Option<Stanza>, _> = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(WireError::FrameTooLarge(_))));
    }
}
