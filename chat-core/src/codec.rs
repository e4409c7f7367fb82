//! Length-prefixed JSON framing: a 4-byte big-endian payload length
//! followed by that many bytes of UTF-8 JSON.

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use chat_common::constants::{HEADER_SIZE, MAX_FRAME_SIZE};
use chat_common::error::ChatError;

/// Serializes `msg` to its wire form: header + JSON payload.
pub fn encode(msg: &impl Serialize) -> Result<Vec<u8>, ChatError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ChatError::FrameTooLarge {
            max: MAX_FRAME_SIZE,
            actual: payload.len(),
        });
    }
    let mut framed = Vec::with_capacity(HEADER_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

/// Writes one encoded frame to `writer`, flushing so partial frames are
/// never left buffered across an await point.
pub async fn write_frame<W>(writer: &mut W, msg: &impl Serialize) -> Result<(), ChatError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let framed = encode(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one frame's payload bytes from `reader`.
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary;
/// returns `Err` if the stream closes mid-frame, the declared length
/// exceeds [`MAX_FRAME_SIZE`], or the I/O itself fails.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ChatError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ChatError::FrameTooLarge {
            max: MAX_FRAME_SIZE,
            actual: len,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Pure, allocation-free frame extraction from an in-memory buffer.
/// Used for property tests exercising arbitrary fragmentation without a
/// real socket. Returns the payload and how many bytes of `buf` it
/// consumed, or `None` if `buf` does not yet hold a full frame.
pub fn try_extract_frame(buf: &[u8]) -> Result<Option<(&[u8], usize)>, ChatError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ChatError::FrameTooLarge {
            max: MAX_FRAME_SIZE,
            actual: len,
        });
    }
    let total = HEADER_SIZE + len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((&buf[HEADER_SIZE..total], total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_common::protocol::ServerMessage;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_encode_and_extract() {
        let msg = ServerMessage::System {
            message: "hello".into(),
        };
        let framed = encode(&msg).unwrap();
        let (payload, consumed) = try_extract_frame(&framed).unwrap().unwrap();
        assert_eq!(consumed, framed.len());
        let decoded: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(decoded["type"], "system");
        assert_eq!(decoded["message"], "hello");
    }

    #[test]
    fn extract_returns_none_on_partial_header() {
        assert!(try_extract_frame(&[0, 0]).unwrap().is_none());
    }

    #[test]
    fn extract_returns_none_on_partial_payload() {
        let msg = ServerMessage::System {
            message: "hello".into(),
        };
        let framed = encode(&msg).unwrap();
        assert!(try_extract_frame(&framed[..framed.len() - 1])
            .unwrap()
            .is_none());
    }

    #[test]
    fn extract_rejects_oversized_declared_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        let err = try_extract_frame(&buf).unwrap_err();
        assert!(matches!(err, ChatError::FrameTooLarge { .. }));
    }

    #[test]
    fn extract_handles_concatenated_frames_in_one_buffer() {
        let a = encode(&ServerMessage::System { message: "a".into() }).unwrap();
        let b = encode(&ServerMessage::System { message: "b".into() }).unwrap();
        let mut combined = a.clone();
        combined.extend_from_slice(&b);

        let (first, n1) = try_extract_frame(&combined).unwrap().unwrap();
        let first: serde_json::Value = serde_json::from_slice(first).unwrap();
        assert_eq!(first["message"], "a");

        let (second, n2) = try_extract_frame(&combined[n1..]).unwrap().unwrap();
        let second: serde_json::Value = serde_json::from_slice(second).unwrap();
        assert_eq!(second["message"], "b");
        assert_eq!(n1 + n2, combined.len());
    }

    #[tokio::test]
    async fn read_frame_reassembles_across_fragmented_reads() {
        let msg = ServerMessage::System {
            message: "fragmented".into(),
        };
        let framed = encode(&msg).unwrap();
        let mut reader = Cursor::new(framed.clone());
        let payload = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(payload, framed[HEADER_SIZE..]);
    }

    #[tokio::test]
    async fn read_frame_returns_none_at_clean_eof() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_frame_errors_on_truncated_stream() {
        let msg = ServerMessage::System {
            message: "oops".into(),
        };
        let framed = encode(&msg).unwrap();
        let mut reader = Cursor::new(framed[..framed.len() - 2].to_vec());
        assert!(read_frame(&mut reader).await.is_err());
    }
}
