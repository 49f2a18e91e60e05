//! Serving a session over a byte stream

use ksync_core::{Database, EndpointConfig, SyncError, SyncResult};
use ksync_protocol::{FrameReader, FrameWriter};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info, warn};

use crate::session::Session;

/// Read commands from `reader` and answer them on `writer` until the peer
/// hangs up, sends `QUIT`, or an error ends the session.
///
/// All responses to one command are encoded and flushed together before
/// the next command is read, so a reply that can't be sent leaves nothing
/// behind on the stream. Any error, including one hit while writing, is
/// reported to the peer as an error frame and then returned.
pub async fn serve<D, R, W>(
    session: &mut Session<D>,
    reader: R,
    writer: W,
    config: &EndpointConfig,
) -> SyncResult<()>
where
    D: Database,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FrameReader::with_limit(reader, config.max_frame_bytes);
    let mut writer = FrameWriter::with_limit(writer, config.max_frame_bytes);
    info!("{}: session started", session.name());

    loop {
        let command = match reader.read_command().await {
            Ok(Some(command)) => command,
            Ok(None) => {
                info!("{}: peer hung up", session.name());
                return Ok(());
            }
            Err(e) => return fail(&mut writer, session.name(), e).await,
        };

        let responses = match session.handle(command) {
            Ok(responses) => responses,
            Err(e) => return fail(&mut writer, session.name(), e).await,
        };
        if let Err(e) = writer.write_responses(&responses).await {
            return fail(&mut writer, session.name(), e).await;
        }
        if let Err(e) = writer.flush().await {
            return fail(&mut writer, session.name(), e).await;
        }

        if session.is_closed() {
            info!("{}: session finished", session.name());
            return Ok(());
        }
    }
}

async fn fail<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    name: &str,
    err: SyncError,
) -> SyncResult<()> {
    error!("{}: {}", name, err);
    if let Err(e) = writer.write_error(&err).await {
        warn!("{}: could not report error to peer: {}", name, e);
    }
    Err(err)
}
