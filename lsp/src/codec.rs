//! JSON-RPC framing codec.
//!
//! Every message on the wire is `Content-Length: N\r\n\r\n{json}` where `N`
//! is the UTF-8 byte length of the body. [`encode`] produces one frame,
//! [`FrameReader`] decodes frames from an async reader and [`FrameWriter`]
//! writes them to an async writer.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{RpcError, RpcResult};

/// Upper bound on a single frame body. Completion lists can be large, but
/// anything past this is a corrupt header rather than a real message.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Serialize `msg` as compact JSON and prefix it with its header block.
pub fn encode(msg: &serde_json::Value) -> RpcResult<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary. EOF anywhere else,
    /// a missing or unparsable `Content-Length`, and a body that is not JSON
    /// are all [`RpcError::Protocol`].
    pub async fn read_frame(&mut self) -> RpcResult<Option<serde_json::Value>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(RpcError::protocol(format!(
                "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            RpcError::protocol(format!(
                "stream ended inside a {content_length} byte body: {e}"
            ))
        })?;

        let value = serde_json::from_slice(&body)
            .map_err(|e| RpcError::protocol(format!("malformed JSON body: {e}")))?;
        Ok(Some(value))
    }

    async fn read_headers(&mut self) -> RpcResult<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(RpcError::protocol("unexpected EOF while reading headers"));
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(RpcError::protocol(format!(
                    "header line without ':' separator: {trimmed:?}"
                )));
            };
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let len = value.trim().parse().map_err(|_| {
                    RpcError::protocol(format!("invalid Content-Length value: {value:?}"))
                })?;
                content_length = Some(len);
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(RpcError::protocol("missing Content-Length header")),
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and flush it.
    ///
    /// Header and body go out in a single `write_all` so that a frame is
    /// never split around a partially failed write.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> RpcResult<()> {
        let frame = encode(msg)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) -> RpcResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode_all(raw: &[u8]) -> Vec<RpcResult<Option<serde_json::Value>>> {
        let mut reader = FrameReader::new(raw);
        let mut out = Vec::new();
        loop {
            let next = reader.read_frame().await;
            let done = !matches!(next, Ok(Some(_)));
            out.push(next);
            if done {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn writer_output_decodes_to_same_completion_reply() {
        let reply = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 4,
            "result": { "isIncomplete": false, "items": [{ "label": "operator=", "kind": 2 }] }
        });

        let mut wire = Vec::new();
        FrameWriter::new(&mut wire).write_frame(&reply).await.unwrap();

        let decoded = FrameReader::new(wire.as_slice()).read_frame().await.unwrap();
        assert_eq!(decoded, Some(reply));
    }

    #[tokio::test]
    async fn back_to_back_frames_then_clean_eof() {
        let init = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}});
        let push = serde_json::json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {"type": 3, "message": "ready"}});
        let mut wire = encode(&init).unwrap();
        wire.extend(encode(&push).unwrap());

        let frames = decode_all(&wire).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].as_ref().unwrap().as_ref(), Some(&init));
        assert_eq!(frames[1].as_ref().unwrap().as_ref(), Some(&push));
        assert!(matches!(frames[2], Ok(None)));
    }

    #[test]
    fn encode_uses_compact_json() {
        let exit = serde_json::json!({"jsonrpc": "2.0", "method": "exit"});
        let wire = String::from_utf8(encode(&exit).unwrap()).unwrap();
        assert_eq!(
            wire,
            "Content-Length: 33\r\n\r\n{\"jsonrpc\":\"2.0\",\"method\":\"exit\"}"
        );
    }

    #[test]
    fn encode_length_is_utf8_bytes() {
        // "~S" and "é" mix one- and two-byte characters.
        let msg = serde_json::json!({"label": "~S", "detail": "é"});
        let wire = encode(&msg).unwrap();
        let body_len = serde_json::to_vec(&msg).unwrap().len();
        let header = format!("Content-Length: {body_len}\r\n\r\n");
        assert!(wire.starts_with(header.as_bytes()));
        assert_eq!(wire.len(), header.len() + body_len);
    }

    #[tokio::test]
    async fn empty_stream_is_clean_eof() {
        assert!(matches!(decode_all(b"").await.as_slice(), [Ok(None)]));
    }

    #[tokio::test]
    async fn header_block_without_length_is_protocol_error() {
        let frames = decode_all(b"Content-Type: application/vscode-jsonrpc\r\n\r\n{}").await;
        assert!(matches!(
            frames.as_slice(),
            [Err(RpcError::Protocol(msg))] if msg.contains("Content-Length")
        ));
    }

    #[tokio::test]
    async fn header_line_without_colon_is_protocol_error() {
        let frames = decode_all(b"Content-Length 2\r\n\r\n{}").await;
        assert!(matches!(frames.as_slice(), [Err(RpcError::Protocol(_))]));
    }

    #[tokio::test]
    async fn truncated_input_is_protocol_error() {
        for raw in [
            &b"Content-Length: 10\r\n"[..],
            &b"Content-Length: 64\r\n\r\n{\"id\":1"[..],
        ] {
            let frames = decode_all(raw).await;
            assert!(
                matches!(frames.as_slice(), [Err(RpcError::Protocol(_))]),
                "{:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[tokio::test]
    async fn length_over_limit_is_rejected_before_reading_body() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let frames = decode_all(raw.as_bytes()).await;
        assert!(matches!(
            frames.as_slice(),
            [Err(RpcError::Protocol(msg))] if msg.contains("exceeds")
        ));
    }

    #[tokio::test]
    async fn non_numeric_length_and_non_json_body_are_rejected() {
        let bad_length = decode_all(b"Content-Length: twelve\r\n\r\n").await;
        assert!(matches!(bad_length.as_slice(), [Err(RpcError::Protocol(_))]));

        let bad_body = decode_all(b"Content-Length: 5\r\n\r\nhello").await;
        assert!(matches!(
            bad_body.as_slice(),
            [Err(RpcError::Protocol(msg))] if msg.contains("JSON")
        ));
    }

    #[tokio::test]
    async fn lowercase_length_among_other_headers() {
        let body = r#"{"jsonrpc":"2.0","id":9,"result":null}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len(),
        );
        let frame = FrameReader::new(raw.as_bytes()).read_frame().await.unwrap().unwrap();
        assert_eq!(frame["id"], 9);
    }

    #[tokio::test]
    async fn body_boundary_respects_byte_length() {
        let first = r#"{"label":"~S"}"#;
        let second = r#"{"label":"é"}"#;
        let raw = format!(
            "Content-Length: {}\r\n\r\n{first}Content-Length: {}\r\n\r\n{second}",
            first.len(),
            second.len()
        );

        let frames = decode_all(raw.as_bytes()).await;
        assert_eq!(frames[0].as_ref().unwrap().as_ref().unwrap()["label"], "~S");
        assert_eq!(frames[1].as_ref().unwrap().as_ref().unwrap()["label"], "é");
    }

    #[tokio::test]
    async fn frame_arriving_in_small_chunks() {
        let (ours, mut theirs) = tokio::io::duplex(8);
        let msg = serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": ["x", "yy", "~S"]});
        let wire = encode(&msg).unwrap();

        let feeder = tokio::spawn(async move {
            for chunk in wire.chunks(5) {
                theirs.write_all(chunk).await.unwrap();
            }
        });

        let mut reader = FrameReader::new(ours);
        assert_eq!(reader.read_frame().await.unwrap(), Some(msg));
        feeder.await.unwrap();
    }
}
