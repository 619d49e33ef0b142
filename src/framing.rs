//! `Content-Length` framing over the server's stdio streams.
//!
//! The protocol client and server exchange JSON-RPC messages framed as
//! `Content-Length: N\r\n\r\n{json}`. [`MessageReader`] and [`MessageWriter`]
//! are the two halves of that codec over arbitrary async streams.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (4 MiB).
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("framing i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("headers ended without a Content-Length")]
    MissingContentLength,
    #[error("unparseable Content-Length value {0:?}")]
    InvalidContentLength(String),
    #[error("frame body of {0} bytes exceeds the {MAX_BODY_BYTES} byte limit")]
    BodyTooLarge(usize),
    #[error("stream ended mid-headers")]
    TruncatedHeaders,
    #[error("frame body is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),
}

/// Reads framed JSON-RPC messages from the server's output stream.
pub struct MessageReader<R> {
    stream: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read the next message. `Ok(None)` means the stream closed cleanly
    /// between frames.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let Some(body_len) = self.read_headers().await? else {
            return Ok(None);
        };

        if body_len > MAX_BODY_BYTES {
            return Err(FrameError::BodyTooLarge(body_len));
        }

        let mut body = vec![0u8; body_len];
        self.stream.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Consume header lines up to the blank separator, returning the body
    /// length. `Ok(None)` only when EOF arrives before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut body_len = None;
        let mut line = String::new();
        let mut mid_headers = false;

        loop {
            line.clear();
            if self.stream.read_line(&mut line).await? == 0 {
                // EOF between frames is a clean close; EOF after a partial
                // header block is not.
                return if mid_headers {
                    Err(FrameError::TruncatedHeaders)
                } else {
                    Ok(None)
                };
            }
            mid_headers = true;

            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }

            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            // Parsed case-insensitively; servers are not uniform here.
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                body_len = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?,
                );
            }
        }

        body_len.map(Some).ok_or(FrameError::MissingContentLength)
    }
}

/// Writes framed JSON-RPC messages to the server's input stream.
pub struct MessageWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    pub async fn write_message(&mut self, message: &serde_json::Value) -> Result<(), FrameError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.stream.write_all(header.as_bytes()).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_one(bytes: &[u8]) -> Result<Option<serde_json::Value>, FrameError> {
        MessageReader::new(bytes).read_message().await
    }

    #[tokio::test]
    async fn writes_are_readable() {
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialized",
            "params": {}
        });

        let mut buf = Vec::new();
        MessageWriter::new(&mut buf)
            .write_message(&message)
            .await
            .unwrap();

        let mut reader = MessageReader::new(buf.as_slice());
        assert_eq!(reader.read_message().await.unwrap().unwrap(), message);
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn consecutive_frames_read_in_order() {
        let mut buf = Vec::new();
        let mut writer = MessageWriter::new(&mut buf);
        for id in 1..=3 {
            writer
                .write_message(&serde_json::json!({"jsonrpc": "2.0", "id": id}))
                .await
                .unwrap();
        }

        let mut reader = MessageReader::new(buf.as_slice());
        for id in 1..=3 {
            let frame = reader.read_message().await.unwrap().unwrap();
            assert_eq!(frame["id"], id);
        }
    }

    #[tokio::test]
    async fn eof_between_frames_is_clean_close() {
        assert!(read_one(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_headers_is_an_error() {
        let err = read_one(b"Content-Length: 10\r\n").await.unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeaders));
    }

    #[tokio::test]
    async fn missing_content_length_is_an_error() {
        let err = read_one(b"Content-Type: application/vscode-jsonrpc\r\n\r\n{}")
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::MissingContentLength));
    }

    #[tokio::test]
    async fn unparseable_content_length_is_an_error() {
        let err = read_one(b"Content-Length: lots\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength(v) if v == "lots"));
    }

    #[tokio::test]
    async fn oversize_body_is_rejected_before_allocation() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_BODY_BYTES + 1);
        let err = read_one(header.as_bytes()).await.unwrap_err();
        assert!(matches!(err, FrameError::BodyTooLarge(_)));
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive_and_extras_are_skipped() {
        let body = r#"{"jsonrpc":"2.0","id":7}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let result = read_one(frame.as_bytes()).await.unwrap().unwrap();
        assert_eq!(result["id"], 7);
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        let err = read_one(b"Content-Length: 64\r\n\r\n{\"jsonrpc\"")
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn non_json_body_is_an_error() {
        let frame = b"Content-Length: 9\r\n\r\nnot json!";
        let err = read_one(frame).await.unwrap_err();
        assert!(matches!(err, FrameError::Body(_)));
    }

    #[tokio::test]
    async fn content_length_counts_bytes_not_chars() {
        // "é" is two bytes; a wrong char count would truncate the body.
        let body = r#"{"k":"é"}"#;
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let result = read_one(frame.as_bytes()).await.unwrap().unwrap();
        assert_eq!(result["k"], "é");

        let mut buf = Vec::new();
        MessageWriter::new(&mut buf)
            .write_message(&serde_json::json!({"k": "é"}))
            .await
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));
    }
}
