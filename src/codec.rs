//! Framing codec for the cmake server wire format.
//!
//! cmake server mode brackets every JSON payload between the literal lines
//! `[== "CMake Server" ==[` and `]== "CMake Server" ==]`. There is no
//! length header; the delimiters alone bound each frame, so partial reads
//! are reassembled line by line. This module provides [`FrameReader`] and
//! [`FrameWriter`] for async reading and writing of framed messages.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ClientError, Result};

pub(crate) const FRAME_OPEN: &str = "[== \"CMake Server\" ==[";
pub(crate) const FRAME_CLOSE: &str = "]== \"CMake Server\" ==]";

/// Maximum frame body size (16 MiB) to prevent unbounded memory allocation.
/// Large code models for big projects fit comfortably below this.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads delimiter-framed JSON messages from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read one line, refusing to buffer more than the frame cap. A
    /// delimiter-less sender cannot make a single `read_line` allocate
    /// without bound.
    async fn read_capped_line(&mut self, line: &mut String) -> Result<usize> {
        let mut limited = (&mut self.reader).take(MAX_FRAME_BYTES as u64 + 1);
        let bytes_read = limited.read_line(line).await?;
        if line.len() > MAX_FRAME_BYTES {
            return Err(ClientError::Protocol(format!(
                "line exceeds maximum frame size of {MAX_FRAME_BYTES} bytes"
            )));
        }
        Ok(bytes_read)
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF between frames (clean shutdown).
    /// Returns `Err` on EOF inside a frame, an unexpected line outside a
    /// frame, an oversized line or body, or an unparsable JSON payload.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let mut line = String::new();

        // Seek the opening delimiter, tolerating blank separator lines.
        loop {
            line.clear();
            let bytes_read = self.read_capped_line(&mut line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == FRAME_OPEN {
                break;
            }
            return Err(ClientError::Protocol(format!(
                "expected frame delimiter, got {trimmed:?}"
            )));
        }

        // Accumulate body lines until the closing delimiter.
        let mut body = String::new();
        loop {
            line.clear();
            let bytes_read = self.read_capped_line(&mut line).await?;
            if bytes_read == 0 {
                return Err(ClientError::Protocol(
                    "unexpected EOF inside frame".to_string(),
                ));
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed == FRAME_CLOSE {
                break;
            }
            if body.len() + trimmed.len() > MAX_FRAME_BYTES {
                return Err(ClientError::Protocol(format!(
                    "frame exceeds maximum of {MAX_FRAME_BYTES} bytes"
                )));
            }
            body.push_str(trimmed);
            body.push('\n');
        }

        let value = serde_json::from_str(&body)?;
        Ok(Some(value))
    }
}

/// Writes delimiter-framed JSON messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one message, bracketed by the frame delimiters, and flush.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(msg)?;
        let frame = format!("\n{FRAME_OPEN}\n{body}\n{FRAME_CLOSE}\n");
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
