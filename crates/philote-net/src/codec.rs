// philote-net::codec — frame codec for the `/philote/discipline/1` call
// protocol. Every call runs on its own byte stream and every frame on that
// stream travels as:
//
//   [u32 big-endian length][bincode payload]
//
// Bincode keeps `Vec<f64>` chunk payloads at 8 bytes per value with no
// per-element tagging.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use philote_types::Status;

use crate::rpc::{Message, Method};

/// Protocol identifier, logged when a server starts.
pub const PHILOTE_PROTOCOL: &str = "/philote/discipline/1";

/// Version carried in every `Open` frame. A server refuses calls whose
/// version it does not speak.
pub const PROTOCOL_VERSION: u16 = 1;

// ── Frames ────────────────────────────────────────────────────────────────────

/// One unit on a call stream.
///
/// Client → server: `Open`, then any number of `Message`s, then `HalfClose`
/// (or `Cancel`). Server → client: any number of `Message`s, then exactly one
/// `Close` carrying the final status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame of every call.
    Open {
        version: u16,
        method: Method,
        /// Deadline the client applies to the call, `0` for none. The server
        /// bounds its handler by the same value.
        timeout_ms: u64,
    },
    Message(Message),
    /// The client has sent its last message.
    HalfClose,
    /// The client abandons the call.
    Cancel,
    /// Final server status. Nothing follows it.
    Close(Status),
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Message(_) => "message",
            Self::HalfClose => "half-close",
            Self::Cancel => "cancel",
            Self::Close(_) => "close",
        }
    }
}

// ── Frame I/O ─────────────────────────────────────────────────────────────────

/// Read the next frame. `Ok(None)` means the peer closed the stream cleanly
/// on a frame boundary.
pub async fn read_frame<T>(io: &mut T, max_bytes: usize) -> io::Result<Option<Frame>>
where
    T: AsyncRead + Unpin + ?Sized,
{
    let Some(buf) = read_length_prefixed(io, max_bytes).await? else {
        return Ok(None);
    };
    let (frame, _) = bincode::serde::decode_from_slice(&buf, bincode::config::standard())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(Some(frame))
}

/// Encode and write one frame, flushing afterwards.
pub async fn write_frame<T>(io: &mut T, frame: &Frame) -> io::Result<()>
where
    T: AsyncWrite + Unpin + ?Sized,
{
    let buf = bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    write_length_prefixed(io, &buf).await
}

// ── Wire Helpers ──────────────────────────────────────────────────────────────

/// Read a `[u32 BE length][payload]` frame. EOF before the first length byte
/// yields `None`; EOF anywhere later is an error.
async fn read_length_prefixed<T>(io: &mut T, max_bytes: usize) -> io::Result<Option<Vec<u8>>>
where
    T: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    let first = io.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    io.read_exact(&mut len_buf[first..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {max_bytes})"),
        ));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Write a `[u32 BE length][payload]` frame.
async fn write_length_prefixed<T>(io: &mut T, data: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(data.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("payload exceeds u32::MAX: {} bytes", data.len()),
        )
    })?;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use philote_types::{Chunk, StatusCode, VariableType};
    use std::io::Cursor;

    const MAX: usize = 1024 * 1024;

    #[tokio::test]
    async fn frames_survive_the_wire_in_order() {
        let chunk = Chunk {
            name: "f".into(),
            input_name: Some("x".into()),
            start: 0,
            end: 2,
            kind: VariableType::Partial,
            data: vec![1.5, -2.0, 3.25],
        };
        let sent = vec![
            Frame::Open { version: PROTOCOL_VERSION, method: Method::ComputeGradient, timeout_ms: 500 },
            Frame::Message(Message::Chunk(chunk)),
            Frame::HalfClose,
            Frame::Close(Status::invalid_argument("Variable not found: z")),
        ];

        let mut buf = Vec::new();
        for frame in &sent {
            write_frame(&mut buf, frame).await.unwrap();
        }

        let mut cursor = Cursor::new(buf);
        let mut received = Vec::new();
        while let Some(frame) = read_frame(&mut cursor, MAX).await.unwrap() {
            received.push(frame);
        }
        assert_eq!(received, sent);
        match &received[3] {
            Frame::Close(status) => assert_eq!(status.code, StatusCode::InvalidArgument),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_eof_is_not_an_error() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor, MAX).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::HalfClose).await.unwrap();
        write_frame(&mut buf, &Frame::Message(Message::Empty)).await.unwrap();
        buf.truncate(buf.len() - 1);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor, MAX).await.unwrap(), Some(Frame::HalfClose));
        let err = read_frame(&mut cursor, MAX).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(2048u32).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("too large"));
    }
}
