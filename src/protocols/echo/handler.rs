//! Echo protocol handler for the Tokio runtime.

use bytes::BytesMut;
use std::io::{self, Write};
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::parser::{next_chunk, Chunk};

/// Per-connection read buffer size.
pub const BUFFER_SIZE: usize = 1024;

/// Maximum bytes echoed per chunk: one byte of the buffer stays reserved,
/// so long lines come back in 1023-byte pieces.
pub const MAX_CHUNK: usize = BUFFER_SIZE - 1;

/// Why a session stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// Peer closed its side of the stream.
    Closed,
    /// Reading from the peer failed.
    ReadFailed(io::Error),
    /// Echoing to the peer failed or was cut short.
    WriteFailed(io::Error),
}

/// One accepted connection, owned by exactly one task.
///
/// Consumed by [`Session::run`]; the stream halves are dropped (and the
/// socket closed) when it returns.
pub struct Session<R, W> {
    reader: R,
    writer: W,
    verbose: bool,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, verbose: bool) -> Self {
        Self {
            reader,
            writer,
            verbose,
        }
    }

    /// Read, log and echo chunks until end of stream or an I/O error.
    ///
    /// In verbose mode every chunk is written to `log` and flushed before
    /// it is echoed.
    pub async fn run<L: Write>(mut self, log: &mut L) -> SessionEnd {
        let mut chunk = BytesMut::with_capacity(BUFFER_SIZE);

        loop {
            match read_chunk(&mut self.reader, &mut chunk).await {
                Ok(0) => return SessionEnd::Closed,
                Ok(_) => {}
                Err(e) => return SessionEnd::ReadFailed(e),
            }

            if self.verbose {
                if let Err(e) = log_received(log, &chunk) {
                    warn!(error = %e, "Failed to log received data");
                }
            }

            // write_all reports a zero-length write as WriteZero
            if let Err(e) = self.writer.write_all(&chunk).await {
                return SessionEnd::WriteFailed(e);
            }
            if let Err(e) = self.writer.flush().await {
                return SessionEnd::WriteFailed(e);
            }
        }
    }
}

/// Collect the next chunk into `buf`, replacing its contents.
///
/// A chunk ends after the first `\n` or at [`MAX_CHUNK`] bytes. At end
/// of stream whatever was collected is returned, so `Ok(0)` means the
/// peer is done.
pub async fn read_chunk<R>(reader: &mut R, buf: &mut BytesMut) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }

        let (taken, complete) = match next_chunk(available, buf.len(), MAX_CHUNK) {
            Chunk::Complete(n) => (n, true),
            Chunk::Partial(n) => (n, false),
        };
        buf.extend_from_slice(&available[..taken]);
        reader.consume(taken);

        if complete {
            break;
        }
    }

    Ok(buf.len())
}

/// Write `Received: <chunk>` as one write so concurrent sessions don't interleave.
fn log_received<L: Write>(log: &mut L, chunk: &[u8]) -> io::Result<()> {
    const PREFIX: &[u8] = b"Received: ";

    let mut line = Vec::with_capacity(PREFIX.len() + chunk.len());
    line.extend_from_slice(PREFIX);
    line.extend_from_slice(chunk);
    log.write_all(&line)?;
    log.flush()
}

/// Handle an echo protocol connection.
///
/// Received chunks are written to `log` when `verbose` is set. The outcome
/// is only logged; nothing is reported back to the acceptor.
pub async fn handle_connection<L: Write>(
    stream: TcpStream,
    peer: SocketAddr,
    verbose: bool,
    mut log: L,
) {
    let (reader, writer) = stream.into_split();
    let session = Session::new(
        BufReader::with_capacity(BUFFER_SIZE, reader),
        writer,
        verbose,
    );

    match session.run(&mut log).await {
        SessionEnd::Closed => debug!(peer = %peer, "Connection closed by client"),
        SessionEnd::ReadFailed(e) => debug!(peer = %peer, error = %e, "Read failed"),
        SessionEnd::WriteFailed(e) => debug!(peer = %peer, error = %e, "Write failed"),
    }
}
