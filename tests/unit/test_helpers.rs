//! Shared helpers for in-process connection tests.

use std::future::Future;
use std::time::Duration;

use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::io::{ReadHalf, WriteHalf};

use agent_harness::rpc::message::Message;
use agent_harness::rpc::{Connection, HandlerTable};

const PIPE_BYTES: usize = 64 * 1024;

/// Two connections wired back to back.
pub fn connected_pair(client: HandlerTable, agent: HandlerTable) -> (Connection, Connection) {
    let (client_io, agent_io) = duplex(PIPE_BYTES);
    let (client_read, client_write) = split(client_io);
    let (agent_read, agent_write) = split(agent_io);
    (
        Connection::spawn("client", client_read, client_write, client),
        Connection::spawn("agent", agent_read, agent_write, agent),
    )
}

/// A connection whose peer is driven by hand, one raw line at a time.
pub struct RawPeer {
    lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    write: WriteHalf<DuplexStream>,
}

impl RawPeer {
    /// Next frame the connection wrote, parsed.
    pub async fn next_message(&mut self) -> Message {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("peer read timed out")
            .expect("peer read failed")
            .expect("connection closed its outbound stream");
        Message::from_line(&line).expect("connection wrote a malformed frame")
    }

    /// Write one raw line (a newline is appended).
    pub async fn send_line(&mut self, line: &str) {
        self.write
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("peer write failed");
        self.write.flush().await.expect("peer flush failed");
    }

    /// Write raw bytes without a terminator.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.write.write_all(bytes).await.expect("peer write failed");
        self.write.flush().await.expect("peer flush failed");
    }
}

/// A connection serving `handlers`, with a hand-driven peer.
pub fn raw_pair(handlers: HandlerTable) -> (Connection, RawPeer) {
    let (conn_io, peer_io) = duplex(PIPE_BYTES);
    let (conn_read, conn_write) = split(conn_io);
    let (peer_read, peer_write) = split(peer_io);
    let conn = Connection::spawn("under-test", conn_read, conn_write, handlers);
    let peer = RawPeer {
        lines: BufReader::new(peer_read).lines(),
        write: peer_write,
    };
    (conn, peer)
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
