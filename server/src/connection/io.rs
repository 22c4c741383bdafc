use super::errors::ConnectionError;
use crate::stream_context::SessionId;
use futures::future::FutureExt;
use ingest_rtmp::chunk_io::Packet;
use ingest_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Runs the server side of the handshake.  Returns the bytes that arrived after it, which
/// already belong to the chunk stream, or `None` if the client hung up first.
pub async fn perform_handshake<S>(stream: &mut S) -> Result<Option<Vec<u8>>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = Handshake::new(PeerType::Server);
    let mut buffer = [0; 4096];

    loop {
        let bytes_read = stream.read(&mut buffer).await?;
        if bytes_read == 0 {
            return Ok(None);
        }

        match handshake.process_bytes(&buffer[..bytes_read])? {
            HandshakeProcessResult::InProgress { response_bytes } => {
                stream.write_all(&response_bytes).await?;
            }

            HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            } => {
                stream.write_all(&response_bytes).await?;
                tracing::debug!(variant = ?handshake.variant(), "Handshake completed");
                return Ok(Some(remaining_bytes));
            }
        }
    }
}

/// Writes packets to the socket in the order they were queued.  Everything already waiting is
/// written before the next flush so a busy connection doesn't pay a syscall per chunk.
pub async fn connection_writer<W>(
    session_id: SessionId,
    mut stream: W,
    mut packets: mpsc::Receiver<Packet>,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let mut send_queue = VecDeque::new();

    while let Some(packet) = packets.recv().await {
        send_queue.push_back(packet);
        while let Some(Some(packet)) = packets.recv().now_or_never() {
            send_queue.push_back(packet);
        }

        for packet in send_queue.drain(..) {
            stream.write_all(&packet.bytes).await?;
        }

        stream.flush().await?;
    }

    tracing::debug!(session = session_id, "Writer disconnected");
    stream.shutdown().await?;
    Ok(())
}
