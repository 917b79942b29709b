//! Outbound writer task.
//!
//! Receives [`Message`]s from a tokio [`mpsc`] channel, frames each one with
//! [`FrameCodec`], and writes the NDJSON line to the peer's input stream.
//! All outbound traffic of a connection funnels through this single task, so
//! lines from concurrent callers never interleave.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::codec::FrameCodec;
use crate::rpc::message::Message;
use crate::{AppError, Result};

/// Upper bound on flushing queued frames after a close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Writer task: frames outbound messages and writes them to `sink`.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (connection close), after writing any frames
///   already queued, or
/// - `msg_rx` is closed (all senders dropped).
///
/// The sink is dropped on exit, which closes the peer's input stream.
///
/// # Errors
///
/// - [`AppError::Framing`] if a message cannot be serialised.
/// - [`AppError::Transport`]`("write failed: …")` if the write or flush fails
///   (e.g. the agent process has exited).
pub async fn run_writer<W>(
    conn: String,
    sink: W,
    mut msg_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut sink = sink;
    let mut framer = Framer::default();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(conn, "writer: cancellation received, flushing queued frames");
                let flush = drain_queued(&conn, &mut framer, &mut sink, &mut msg_rx);
                if tokio::time::timeout(DRAIN_TIMEOUT, flush).await.is_err() {
                    warn!(conn, "writer: peer stopped reading, queued frames dropped");
                }
                break;
            }

            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    debug!(conn, "writer: message channel closed, stopping");
                    break;
                };
                framer.write(&conn, &mut sink, msg).await?;
            }
        }
    }

    // Best-effort: let the peer observe EOF promptly.
    if let Err(e) = sink.shutdown().await {
        debug!(conn, error = %e, "writer: shutdown of sink failed");
    }
    Ok(())
}

/// Write whatever was queued before the close; stops at the first failure.
async fn drain_queued<W>(
    conn: &str,
    framer: &mut Framer,
    sink: &mut W,
    msg_rx: &mut mpsc::Receiver<Message>,
) where
    W: AsyncWrite + Unpin + Send,
{
    msg_rx.close();
    let mut flushed = 0usize;
    while let Ok(msg) = msg_rx.try_recv() {
        if let Err(err) = framer.write(conn, sink, msg).await {
            debug!(conn, %err, flushed, "writer: flush of queued frames stopped");
            return;
        }
        flushed += 1;
    }
    if flushed > 0 {
        debug!(conn, flushed, "writer: queued frames flushed");
    }
}

#[derive(Default)]
struct Framer {
    codec: FrameCodec,
    buf: BytesMut,
}

impl Framer {
    async fn write<W>(&mut self, conn: &str, sink: &mut W, msg: Message) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let kind = msg.kind();
        self.codec.encode(msg, &mut self.buf)?;
        let frame = self.buf.split();

        sink.write_all(&frame).await.map_err(|e| {
            warn!(conn, error = %e, "writer: write failed");
            AppError::Transport(format!("write failed: {e}"))
        })?;
        sink.flush().await.map_err(|e| {
            warn!(conn, error = %e, "writer: flush failed");
            AppError::Transport(format!("write failed: {e}"))
        })?;

        debug!(conn, ?kind, bytes = frame.len(), "writer: frame sent");
        Ok(())
    }
}
