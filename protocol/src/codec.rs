//! Length-prefixed frame codec
//!
//! Each frame is a u32 big-endian byte count followed by the bincode
//! encoding of a [`Frame`]. A `ROWS` response is written as a header frame,
//! one frame per row, and an end-of-rows terminator. The terminator is only
//! sent once every row made it out; a stream cut short ends without one.

use ksync_core::{SyncError, SyncResult, DEFAULT_MAX_FRAME_BYTES};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::message::{Command, Frame, Response};

/// Reads frames from an async byte stream
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
            buf: Vec::new(),
        }
    }

    /// Next frame, or `None` if the stream ended cleanly between frames
    pub async fn read_frame(&mut self) -> SyncResult<Option<Frame>> {
        let mut len_buf = [0u8; 4];
        if self.inner.read(&mut len_buf[..1]).await? == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut len_buf[1..]).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_bytes {
            return Err(SyncError::FrameTooLarge {
                size: len,
                max: self.max_frame_bytes,
            });
        }

        self.buf.resize(len, 0);
        self.inner.read_exact(&mut self.buf).await?;
        let frame = Frame::from_bytes(&self.buf)?;
        trace!("Read {} frame ({} bytes)", frame.frame_type(), len);
        Ok(Some(frame))
    }

    async fn expect_frame(&mut self) -> SyncResult<Frame> {
        self.read_frame().await?.ok_or_else(|| {
            SyncError::IoError("stream ended in the middle of a response".into())
        })
    }

    /// Next command, or `None` at end of stream
    pub async fn read_command(&mut self) -> SyncResult<Option<Command>> {
        match self.read_frame().await? {
            None => Ok(None),
            Some(Frame::Command(command)) => Ok(Some(command)),
            Some(other) => Err(SyncError::UnexpectedResponse(format!(
                "expected a command, got {}",
                other.frame_type()
            ))),
        }
    }

    /// Next response, reassembling row streams. An error frame from the peer
    /// becomes [`SyncError::RemoteError`].
    pub async fn read_response(&mut self) -> SyncResult<Response> {
        let response = match self.expect_frame().await? {
            Frame::Ok => Response::Ok,
            Frame::Protocol(version) => Response::Protocol(version),
            Frame::HashAlgorithm(algorithm) => Response::HashAlgorithm(algorithm),
            Frame::Schema(schema) => Response::Schema(schema),
            Frame::Snapshot(token) => Response::Snapshot(token),
            Frame::Hash {
                prev_key,
                last_key,
                hash,
            } => Response::Hash {
                prev_key,
                last_key,
                hash,
            },
            Frame::RowsHeader { prev_key, last_key } => {
                let mut rows = Vec::new();
                loop {
                    match self.expect_frame().await? {
                        Frame::Row(row) => rows.push(row),
                        Frame::EndOfRows => break,
                        Frame::Error { kind, message } => {
                            return Err(SyncError::RemoteError { kind, message })
                        }
                        other => {
                            return Err(SyncError::UnexpectedResponse(format!(
                                "{} inside a row stream",
                                other.frame_type()
                            )))
                        }
                    }
                }
                Response::Rows {
                    prev_key,
                    last_key,
                    rows,
                }
            }
            Frame::Error { kind, message } => return Err(SyncError::RemoteError { kind, message }),
            other => {
                return Err(SyncError::UnexpectedResponse(format!(
                    "expected a response, got {}",
                    other.frame_type()
                )))
            }
        };
        Ok(response)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to an async byte stream
pub struct FrameWriter<W> {
    inner: W,
    max_frame_bytes: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(inner: W, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Append one length-prefixed frame to `out`
    fn encode_frame(&self, frame: &Frame, out: &mut Vec<u8>) -> SyncResult<()> {
        let bytes = frame.to_bytes()?;
        if bytes.len() > self.max_frame_bytes {
            return Err(SyncError::FrameTooLarge {
                size: bytes.len(),
                max: self.max_frame_bytes,
            });
        }
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&bytes);
        trace!("Encoded {} frame ({} bytes)", frame.frame_type(), bytes.len());
        Ok(())
    }

    fn encode_response(&self, response: &Response, out: &mut Vec<u8>) -> SyncResult<()> {
        match response {
            Response::Ok => self.encode_frame(&Frame::Ok, out),
            Response::Protocol(version) => self.encode_frame(&Frame::Protocol(*version), out),
            Response::HashAlgorithm(algorithm) => {
                self.encode_frame(&Frame::HashAlgorithm(*algorithm), out)
            }
            Response::Schema(schema) => self.encode_frame(&Frame::Schema(schema.clone()), out),
            Response::Snapshot(token) => self.encode_frame(&Frame::Snapshot(token.clone()), out),
            Response::Hash {
                prev_key,
                last_key,
                hash,
            } => self.encode_frame(
                &Frame::Hash {
                    prev_key: prev_key.clone(),
                    last_key: last_key.clone(),
                    hash: *hash,
                },
                out,
            ),
            Response::Rows {
                prev_key,
                last_key,
                rows,
            } => {
                self.encode_frame(
                    &Frame::RowsHeader {
                        prev_key: prev_key.clone(),
                        last_key: last_key.clone(),
                    },
                    out,
                )?;
                for row in rows {
                    self.encode_frame(&Frame::Row(row.clone()), out)?;
                }
                self.encode_frame(&Frame::EndOfRows, out)
            }
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> SyncResult<()> {
        let mut buf = Vec::new();
        self.encode_frame(frame, &mut buf)?;
        self.inner.write_all(&buf).await?;
        Ok(())
    }

    pub async fn write_command(&mut self, command: &Command) -> SyncResult<()> {
        self.write_frame(&Frame::Command(command.clone())).await?;
        self.flush().await
    }

    pub async fn write_response(&mut self, response: &Response) -> SyncResult<()> {
        self.write_responses(std::slice::from_ref(response)).await
    }

    /// Write the answer to one command. Every frame is encoded before any byte
    /// is written, so a response that can't be sent leaves nothing on the
    /// stream and a partial row stream never looks complete to the peer.
    pub async fn write_responses(&mut self, responses: &[Response]) -> SyncResult<()> {
        let mut buf = Vec::new();
        for response in responses {
            self.encode_response(response, &mut buf)?;
        }
        self.inner.write_all(&buf).await?;
        Ok(())
    }

    /// Report a fatal error to the peer
    pub async fn write_error(&mut self, err: &SyncError) -> SyncResult<()> {
        self.write_frame(&Frame::error(err)).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> SyncResult<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_core::{ErrorKind, Hash, Key, Row};

    #[tokio::test]
    async fn test_rows_response_streams_and_reassembles() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        let response = Response::Rows {
            prev_key: Key::from_texts(&["2"]),
            last_key: Key::from_texts(&["4"]),
            rows: vec![Row::from_optional(&[Some("4"), None, Some("foo")])],
        };
        writer.write_response(&response).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_response().await.unwrap(), response);
    }

    #[tokio::test]
    async fn test_row_stream_frames_on_the_wire() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        writer
            .write_response(&Response::end_of_table(Key::from_texts(&["100"])))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        assert!(matches!(
            reader.read_frame().await.unwrap(),
            Some(Frame::RowsHeader { .. })
        ));
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::EndOfRows));
    }

    #[tokio::test]
    async fn test_error_frame_becomes_remote_error() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        writer
            .write_error(&SyncError::TableNotFound("nosuchtbl".into()))
            .await
            .unwrap();

        match reader.read_response().await {
            Err(SyncError::RemoteError { kind, message }) => {
                assert_eq!(kind, ErrorKind::TableNotFound);
                assert!(message.contains("nosuchtbl"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clean_eof_and_commands() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        let command = Command::Hash {
            prev_key: Key::unbounded(),
            last_key: Key::from_texts(&["2"]),
            hash: Hash::ZERO,
        };
        writer.write_command(&command).await.unwrap();
        drop(writer);

        assert_eq!(reader.read_command().await.unwrap(), Some(command));
        assert_eq!(reader.read_command().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::with_limit(b, 16);

        writer.write_frame(&Frame::Command(Command::Open("a_rather_long_table_name".into())))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        assert!(matches!(
            reader.read_frame().await,
            Err(SyncError::FrameTooLarge { max: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_row_writes_nothing() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let mut writer = FrameWriter::with_limit(a, 1024);
        let mut reader = FrameReader::new(b);

        let body = "x".repeat(2000);
        let response = Response::Rows {
            prev_key: Key::unbounded(),
            last_key: Key::unbounded(),
            rows: vec![
                Row::from_optional(&[Some("1"), Some("small")]),
                Row::from_optional(&[Some("2"), Some(body.as_str())]),
                Row::from_optional(&[Some("3"), Some("small")]),
            ],
        };
        assert!(matches!(
            writer.write_response(&response).await,
            Err(SyncError::FrameTooLarge { max: 1024, .. })
        ));
        drop(writer);

        // no header, no rows and above all no terminator
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_responses_to_one_command_fail_together() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let mut writer = FrameWriter::with_limit(a, 1024);
        let mut reader = FrameReader::new(b);

        let body = "x".repeat(2000);
        let responses = vec![
            Response::Rows {
                prev_key: Key::unbounded(),
                last_key: Key::from_texts(&["1"]),
                rows: vec![Row::from_optional(&[Some("1"), Some("small")])],
            },
            Response::Rows {
                prev_key: Key::from_texts(&["1"]),
                last_key: Key::from_texts(&["2"]),
                rows: vec![Row::from_optional(&[Some("2"), Some(body.as_str())])],
            },
        ];
        assert!(writer.write_responses(&responses).await.is_err());
        writer.write_error(&SyncError::FrameTooLarge { size: 2000, max: 1024 })
            .await
            .unwrap();

        match reader.read_response().await {
            Err(SyncError::RemoteError { kind, .. }) => assert_eq!(kind, ErrorKind::Wire),
            other => panic!("unexpected {:?}", other),
        }
    }
}
