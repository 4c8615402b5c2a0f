use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWriteExt, BufReader};

use crate::logger::Logger;
use crate::session::protocol::{self, Input};
use crate::session::registry::{SessionId, SessionRegistry, SharedWriter};

/// How a session's read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent `/exit`
    Exit,
    /// Client closed the stream after joining
    EndOfStream,
    /// Client closed the stream before choosing a name
    NeverJoined,
}

/// Runs one client from the banner to the final `left the chat` notice.
///
/// The session must already hold a registry slot (`try_register`). Whatever
/// ends the loop, the departure runs exactly once and the write half is
/// shut down afterwards.
pub async fn handle_session<R>(
    id: SessionId,
    addr: SocketAddr,
    reader: R,
    writer: SharedWriter,
    registry: Arc<SessionRegistry>,
    max_line_length: usize,
    logger: Logger,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    match run_session(id, addr, &mut reader, &writer, &registry, max_line_length, &logger).await {
        Ok(end) => logger.debug(&format!("Session {} ({}) ended: {:?}", id, addr, end)),
        Err(e) => logger.warn(&format!("❌ Session error with {}: {}", addr, e)),
    }

    registry.depart(id).await;

    let mut w = writer.lock().await;
    if let Err(e) = w.shutdown().await {
        logger.debug(&format!("Closing {} failed: {}", addr, e));
    }
    logger.info(&format!("🧼 {} connection closed.", addr));
}

async fn run_session<R>(
    id: SessionId,
    addr: SocketAddr,
    reader: &mut R,
    writer: &SharedWriter,
    registry: &SessionRegistry,
    max_line_length: usize,
    logger: &Logger,
) -> io::Result<SessionEnd>
where
    R: AsyncBufRead + Unpin,
{
    let journal = registry.journal().clone();

    // NEGOTIATING_NAME
    send(writer, protocol::BANNER.as_bytes()).await?;
    let mut name = match negotiate_name(id, reader, writer, registry, max_line_length).await? {
        Some(name) => name,
        None => return Ok(SessionEnd::NeverJoined),
    };

    let connected = protocol::connected_line(&journal.format_timestamp(), &addr, &name);
    logger.info(protocol::strip_line_ending(&connected));
    journal.append_log(&connected);

    // REPLAYING_HISTORY
    let replayed = registry.activate(id).await?;
    logger.debug(&format!("Replayed {} history lines to {}", replayed, addr));
    registry
        .broadcast(&protocol::joined_notice(&journal.format_timestamp(), &name))
        .await;

    // ACTIVE
    loop {
        let raw = match protocol::read_frame(reader, max_line_length).await? {
            Some(raw) => raw,
            None => {
                let notice = protocol::disconnected_notice(&journal.format_timestamp(), &name);
                logger.info(protocol::strip_line_ending(&notice));
                journal.append_log(&notice);
                return Ok(SessionEnd::EndOfStream);
            }
        };

        match Input::parse(&raw) {
            Input::Exit => return Ok(SessionEnd::Exit),
            Input::Blank => continue,
            Input::Rename => {
                let previous = name.clone();
                name = match negotiate_name(id, reader, writer, registry, max_line_length).await? {
                    Some(name) => name,
                    None => {
                        let notice =
                            protocol::disconnected_notice(&journal.format_timestamp(), &previous);
                        logger.info(protocol::strip_line_ending(&notice));
                        journal.append_log(&notice);
                        return Ok(SessionEnd::EndOfStream);
                    }
                };
                let notice =
                    protocol::renamed_notice(&journal.format_timestamp(), &previous, &name);
                logger.info(protocol::strip_line_ending(&notice));
                registry.broadcast(&notice).await;
            }
            Input::Message(text) => {
                let line = protocol::chat_line(&journal.format_timestamp(), &name, &text);
                logger.info(&format!("📨 {}", protocol::strip_line_ending(&line)));
                registry.broadcast(&line).await;
            }
        }
    }
}

/// Prompts for a name and stores it. `None` if the client hung up first.
async fn negotiate_name<R>(
    id: SessionId,
    reader: &mut R,
    writer: &SharedWriter,
    registry: &SessionRegistry,
    max_line_length: usize,
) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    send(writer, protocol::PROMPT.as_bytes()).await?;
    let Some(raw) = protocol::read_frame(reader, max_line_length).await? else {
        return Ok(None);
    };
    let name = protocol::display_name(&raw);
    registry.rename(id, &name).await;
    Ok(Some(name))
}

async fn send(writer: &SharedWriter, data: &[u8]) -> io::Result<()> {
    let mut w = writer.lock().await;
    w.write_all(data).await?;
    w.flush().await
}
