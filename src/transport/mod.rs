//! Unix-domain-socket transport for CSI messages.
//!
//! [`client::CsiClient`] and [`server::CsiServer`] exchange [`CsiMessage`]
//! values as length-prefixed JSON frames over the socket the orchestrator
//! supplies at startup:
//!
//! ```text
//! [len: u32 (big-endian)][json payload]
//! ```

pub mod client;
pub mod server;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CsiError;
use crate::message::CsiMessage;

/// Upper bound for a single frame.
pub(crate) const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one frame; `None` on a cleanly closed connection.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, CsiError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CsiError::transport(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CsiError::Transport(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(CsiError::transport)?;
    Ok(Some(payload))
}

/// Write one frame.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), CsiError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(CsiError::Transport(format!(
            "frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit",
            payload.len()
        )));
    }
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .map_err(CsiError::transport)?;
    writer.write_all(payload).await.map_err(CsiError::transport)?;
    writer.flush().await.map_err(CsiError::transport)?;
    Ok(())
}

pub(crate) fn encode(message: &CsiMessage) -> Result<Vec<u8>, CsiError> {
    serde_json::to_vec(message).map_err(CsiError::internal)
}

pub(crate) fn decode(payload: &[u8]) -> Result<CsiMessage, CsiError> {
    serde_json::from_slice(payload)
        .map_err(|e| CsiError::Transport(format!("malformed message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        let first = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(first, b"hello");
        let second = read_frame(&mut b).await.unwrap().unwrap();
        assert!(second.is_empty());

        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let bogus = (u32::MAX).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &bogus).await.unwrap();
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let payload = encode(&CsiMessage::Probe).unwrap();
        assert!(matches!(decode(&payload).unwrap(), CsiMessage::Probe));
        assert!(decode(b"not json").is_err());
    }
}
