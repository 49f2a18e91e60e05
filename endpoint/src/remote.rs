//! Client side of the wire protocol

use async_trait::async_trait;
use ksync_core::{SyncResult, DEFAULT_MAX_FRAME_BYTES};
use ksync_engine::Peer;
use ksync_protocol::{Command, FrameReader, FrameWriter, Response};
use tokio::io::{AsyncRead, AsyncWrite};

/// An endpoint reached over a pair of byte streams
pub struct RemoteEndpoint<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R, W> RemoteEndpoint<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_limit(reader, writer, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(reader: R, writer: W, max_frame_bytes: usize) -> Self {
        Self {
            reader: FrameReader::with_limit(reader, max_frame_bytes),
            writer: FrameWriter::with_limit(writer, max_frame_bytes),
        }
    }
}

#[async_trait]
impl<R, W> Peer for RemoteEndpoint<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request(&mut self, command: Command) -> SyncResult<Vec<Response>> {
        let may_follow_up = matches!(command, Command::Hash { .. });
        self.writer.write_command(&command).await?;

        let first = self.reader.read_response().await?;
        // a single row sent in answer to HASH is always followed by the next
        // challenge or the end of the table
        let follow_up = may_follow_up
            && matches!(&first, Response::Rows { last_key, .. } if !last_key.is_unbounded());

        let mut responses = vec![first];
        if follow_up {
            responses.push(self.reader.read_response().await?);
        }
        Ok(responses)
    }
}
