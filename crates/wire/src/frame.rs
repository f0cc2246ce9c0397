//! Length-prefixed JSON framing over arbitrary byte streams.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Default upper bound on a single frame payload.
pub const MAX_FRAME_BYTES: usize = 2_000_000;

/// Upper bound on the ASCII length header (excluding the newline).
pub const MAX_HEADER_BYTES: usize = 64;

/// Everything that can go wrong while reading or writing a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream closed")]
    Eof,
    #[error("invalid frame header")]
    InvalidHeader,
    #[error("frame of {got} bytes exceeds the {limit}-byte limit")]
    TooLarge { got: usize, limit: usize },
    #[error("stream closed mid-frame")]
    Truncated,
    #[error("frame payload is not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write one frame: ASCII decimal payload length, `\n`, then the payload.
pub async fn write_frame<W>(writer: &mut W, value: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(value)?;
    let mut buf = Vec::with_capacity(payload.len() + 12);
    buf.extend_from_slice(payload.len().to_string().as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(&payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    trace!(bytes = payload.len(), "frame written");
    Ok(())
}

/// Read one frame, returning `Ok(None)` for a legal zero-length payload
/// (a null frame — callers keep reading).
///
/// The header is rejected once it exceeds [`MAX_HEADER_BYTES`] without a
/// newline, or when it contains anything but ASCII digits and surrounding
/// whitespace.  The payload length must not exceed `max_bytes`.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Value>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header: Vec<u8> = Vec::with_capacity(16);
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            return Err(FrameError::Eof);
        }
        if byte[0] == b'\n' {
            break;
        }
        header.push(byte[0]);
        if header.len() > MAX_HEADER_BYTES {
            return Err(FrameError::InvalidHeader);
        }
    }

    let text = std::str::from_utf8(&header)
        .map_err(|_| FrameError::InvalidHeader)?
        .trim();
    let length: usize = if text.is_empty() {
        0
    } else if text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse().map_err(|_| FrameError::InvalidHeader)?
    } else {
        return Err(FrameError::InvalidHeader);
    };

    if length > max_bytes {
        return Err(FrameError::TooLarge { got: length, limit: max_bytes });
    }
    if length == 0 {
        return Ok(None);
    }

    let mut payload = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        let n = reader.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(FrameError::Truncated);
        }
        filled += n;
    }
    trace!(bytes = length, "frame read");
    Ok(Some(serde_json::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_round_trip_in_order() -> anyhow::Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        let sent = vec![
            json!({"type": "exec_request", "code": "print('héllo')"}),
            json!({"ok": true}),
            json!({"type": "tool_request", "id": "abc", "name": "t", "arguments": {}}),
        ];
        for value in &sent {
            write_frame(&mut tx, value).await?;
        }
        for value in &sent {
            let got = read_frame(&mut rx, MAX_FRAME_BYTES).await?;
            assert_eq!(got.as_ref(), Some(value));
        }
        Ok(())
    }

    #[tokio::test]
    async fn zero_length_payload_is_null() -> anyhow::Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(b"0\n").await?;
        assert!(read_frame(&mut rx, MAX_FRAME_BYTES).await?.is_none());
        // An empty header line counts as zero as well.
        tx.write_all(b"\n").await?;
        assert!(read_frame(&mut rx, MAX_FRAME_BYTES).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn closed_stream_is_eof() {
        let (tx, mut rx) = tokio::io::duplex(1024);
        drop(tx);
        assert!(matches!(
            read_frame(&mut rx, MAX_FRAME_BYTES).await,
            Err(FrameError::Eof)
        ));
    }

    #[tokio::test]
    async fn non_digit_header_is_rejected() -> anyhow::Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(b"12x\n{}").await?;
        assert!(matches!(
            read_frame(&mut rx, MAX_FRAME_BYTES).await,
            Err(FrameError::InvalidHeader)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn oversize_header_is_rejected() -> anyhow::Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(&[b'1'; MAX_HEADER_BYTES + 1]).await?;
        assert!(matches!(
            read_frame(&mut rx, MAX_FRAME_BYTES).await,
            Err(FrameError::InvalidHeader)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn oversize_payload_is_rejected() -> anyhow::Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(b"11\nhello world").await?;
        let err = read_frame(&mut rx, 10).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { got: 11, limit: 10 }));
        Ok(())
    }

    #[tokio::test]
    async fn truncated_payload_is_detected() -> anyhow::Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(b"10\n{\"ok\"").await?;
        drop(tx);
        assert!(matches!(
            read_frame(&mut rx, MAX_FRAME_BYTES).await,
            Err(FrameError::Truncated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn bad_json_payload_is_detected() -> anyhow::Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(b"5\nhello").await?;
        assert!(matches!(
            read_frame(&mut rx, MAX_FRAME_BYTES).await,
            Err(FrameError::BadJson(_))
        ));
        Ok(())
    }
}
