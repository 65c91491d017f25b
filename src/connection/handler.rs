//! Connection Handler Module
//!
//! This module serves one client connection: it reads command lines, runs
//! them through the [`CommandHandler`], and writes one reply per line.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Registered: live count +1, entry in the ClientRegistry
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Running                 │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Pause gate wait         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read one line           │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute, send reply     │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │                    │
//!        ▼                    ▼
//! 4. Closed (EOF, marker,   Cancelled (registry sweep)
//!    broken connection)
//!        │                    │
//!        └─────────┬──────────┘
//!                  ▼
//! 5. Deregistered: entry removed, live count -1, exactly once
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a BytesMut buffer and are split into lines.
//! A line longer than [`MAX_LINE_LEN`] is thrown away up to its newline and
//! answered with `ill-formed command`; the connection stays open.

use crate::commands::{Cancelled, CommandHandler};
use crate::connection::registry::ClientId;
use crate::protocol::{Reply, EOF_MARKER, MAX_LINE_LEN};
use crate::server::ServerContext;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// How a handler left the `Running` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer disconnected, sent the end-of-input marker, or the connection broke
    Closed,
    /// The control path cancelled the client
    Cancelled,
}

/// One unit of client input taken from the read buffer.
#[derive(Debug)]
enum Line {
    Command(Bytes),
    Oversized,
    EndOfSession,
}

/// Registration of a live handler. Dropping it is the handler's cleanup:
/// the registry entry is removed and the live count decremented, once.
struct Session {
    ctx: Arc<ServerContext>,
    id: ClientId,
    addr: SocketAddr,
}

impl Session {
    /// Registers a new handler, or returns `None` if the server is shutting down.
    fn open(ctx: &Arc<ServerContext>, addr: SocketAddr) -> Option<(Self, CancellationToken)> {
        ctx.coordinator().enter();
        match ctx.registry().register(addr) {
            Some((id, cancel)) => {
                trace!(client = %addr, id = %id, "Client registered");
                let session = Self {
                    ctx: Arc::clone(ctx),
                    id,
                    addr,
                };
                Some((session, cancel))
            }
            None => {
                ctx.coordinator().exit();
                None
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ctx.registry().deregister(self.id);
        self.ctx.coordinator().exit();
        trace!(client = %self.addr, id = %self.id, "Client deregistered");
    }
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, line framing, and reply sending
/// for one connected client.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Set while skipping the rest of an oversized line
    discarding: bool,

    /// The command handler (shares the store)
    command_handler: CommandHandler,

    /// Shared server state: pause gate and statistics
    ctx: Arc<ServerContext>,

    /// Fired by the registry to cancel this client
    cancel: CancellationToken,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The TCP stream for this connection
    /// * `addr` - The client's socket address
    /// * `ctx` - Shared server context
    /// * `cancel` - This client's cancellation token from the registry
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: Arc<ServerContext>,
        cancel: CancellationToken,
    ) -> Self {
        ctx.stats().connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            discarding: false,
            command_handler: CommandHandler::new(Arc::clone(ctx.store())),
            ctx,
            cancel,
        }
    }

    /// Runs the connection until the peer leaves or the client is cancelled.
    ///
    /// Cancellation preempts whatever the handler is awaiting: the pause gate,
    /// a socket read, a batch file, or a reply write.
    pub async fn run(mut self) -> SessionEnd {
        info!(client = %self.addr, "Client connected");

        let cancel = self.cancel.clone();
        let end = tokio::select! {
            biased;
            _ = cancel.cancelled() => SessionEnd::Cancelled,
            result = self.main_loop() => match result {
                Ok(()) => SessionEnd::Closed,
                Err(ConnectionError::Cancelled(_)) => SessionEnd::Cancelled,
                Err(ConnectionError::IoError(io_err))
                    if matches!(
                        io_err.kind(),
                        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
                    ) =>
                {
                    debug!(client = %self.addr, error = %io_err, "Connection dropped by client");
                    SessionEnd::Closed
                }
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "Connection error");
                    SessionEnd::Closed
                }
            },
        };

        match end {
            SessionEnd::Closed => info!(client = %self.addr, "Client disconnected"),
            SessionEnd::Cancelled => info!(client = %self.addr, "Client cancelled"),
        }

        self.ctx.stats().connection_closed();
        end
    }

    /// The wait-read-execute-respond loop.
    ///
    /// Returns `Ok` once the peer has finished sending. An unterminated last
    /// line is still executed and answered.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let mut at_eof = false;

        loop {
            while let Some(line) = self.next_line(at_eof) {
                self.ctx.gate().wait().await;

                let reply = match line {
                    Line::EndOfSession => {
                        debug!(client = %self.addr, "End-of-input marker received");
                        return Ok(());
                    }
                    Line::Oversized => {
                        warn!(client = %self.addr, max = MAX_LINE_LEN, "Command line too long");
                        Reply::IllFormed
                    }
                    Line::Command(bytes) => {
                        let text = String::from_utf8_lossy(&bytes);
                        self.command_handler.execute(&text, &self.cancel).await?
                    }
                };

                self.ctx.stats().command_processed();
                self.send_reply(&reply).await?;
            }

            if at_eof {
                debug!(client = %self.addr, "Client finished sending");
                return Ok(());
            }

            // Need more data - read from the socket
            at_eof = !self.read_more_data().await?;
        }
    }

    /// Takes the next complete line out of the buffer, if there is one.
    ///
    /// Once the peer has stopped sending (`at_eof`), whatever is left in the
    /// buffer counts as a final line.
    fn next_line(&mut self, at_eof: bool) -> Option<Line> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line = self.buffer.split_to(pos + 1);
                if std::mem::take(&mut self.discarding) || pos > MAX_LINE_LEN {
                    return Some(Line::Oversized);
                }
                if line.first() == Some(&EOF_MARKER) {
                    return Some(Line::EndOfSession);
                }
                line.truncate(pos);
                trace!(
                    client = %self.addr,
                    len = pos,
                    remaining = self.buffer.len(),
                    "Parsed command line"
                );
                Some(Line::Command(line.freeze()))
            }
            None => {
                if self.discarding || self.buffer.len() > MAX_LINE_LEN {
                    self.buffer.clear();
                    if at_eof {
                        self.discarding = false;
                        return Some(Line::Oversized);
                    }
                    self.discarding = true;
                    None
                } else if self.buffer.first() == Some(&EOF_MARKER) {
                    self.buffer.clear();
                    Some(Line::EndOfSession)
                } else if at_eof && !self.buffer.is_empty() {
                    Some(Line::Command(self.buffer.split().freeze()))
                } else {
                    None
                }
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    ///
    /// Returns `false` when the peer has closed its sending side.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            // Connection closed by client
            return Ok(false);
        }

        self.ctx.stats().bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(true)
    }

    /// Sends a reply line to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let line = reply.to_line();
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        self.ctx.stats().bytes_written(line.len());
        trace!(client = %self.addr, bytes = line.len(), "Sent reply");
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The client was cancelled in the middle of a batch file
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Serves a freshly accepted connection from registration to cleanup.
///
/// If the server is already shutting down the connection is dropped without
/// being registered.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: Arc<ServerContext>) {
    let Some((session, cancel)) = Session::open(&ctx, addr) else {
        debug!(client = %addr, "Server shutting down, refusing connection");
        return;
    };

    let handler = ConnectionHandler::new(stream, addr, Arc::clone(&ctx), cancel);
    let end = handler.run().await;
    drop(session);

    trace!(client = %addr, end = ?end, "Handler finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::spawn_listener;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    type Client = BufReader<TcpStream>;

    async fn create_test_server() -> (SocketAddr, Arc<ServerContext>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = Arc::new(ServerContext::new());
        spawn_listener(listener, Arc::clone(&ctx));
        (addr, ctx)
    }

    async fn connect(addr: SocketAddr) -> Client {
        BufReader::new(TcpStream::connect(addr).await.unwrap())
    }

    async fn request(client: &mut Client, line: &str) -> String {
        client.get_mut().write_all(line.as_bytes()).await.unwrap();
        let mut reply = String::new();
        timeout(Duration::from_secs(2), client.read_line(&mut reply))
            .await
            .expect("reply timed out")
            .unwrap();
        reply
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    async fn assert_closed(client: &mut Client) {
        let mut rest = Vec::new();
        let n = timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .expect("connection was not closed")
            .unwrap_or(0);
        assert_eq!(n, 0, "unexpected data: {:?}", rest);
    }

    #[tokio::test]
    async fn test_add_query_delete() {
        let (addr, _) = create_test_server().await;
        let mut client = connect(addr).await;

        assert_eq!(request(&mut client, "a alice 30\n").await, "added\n");
        assert_eq!(request(&mut client, "a bob 25\n").await, "added\n");
        assert_eq!(request(&mut client, "d alice\n").await, "removed\n");
        assert_eq!(request(&mut client, "q alice\n").await, "not found\n");
        assert_eq!(request(&mut client, "q bob\n").await, "25\n");
        assert_eq!(request(&mut client, "d alice\n").await, "not in database\n");
        assert_eq!(request(&mut client, "nonsense\n").await, "ill-formed command\n");
        assert_eq!(request(&mut client, "\n").await, "ill-formed command\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (addr, _) = create_test_server().await;
        let mut client = connect(addr).await;

        client
            .get_mut()
            .write_all(b"a k1 v1\na k2 v2\r\nq k1\nq k2\n")
            .await
            .unwrap();

        let mut replies = Vec::new();
        for _ in 0..4 {
            let mut line = String::new();
            client.read_line(&mut line).await.unwrap();
            replies.push(line);
        }
        assert_eq!(replies, vec!["added\n", "added\n", "v1\n", "v2\n"]);
    }

    #[tokio::test]
    async fn test_concurrent_insert_one_winner() {
        let (addr, _) = create_test_server().await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;

        let (r1, r2) = tokio::join!(
            request(&mut first, "a x 1\n"),
            request(&mut second, "a x 2\n")
        );

        let mut replies = vec![r1.clone(), r2];
        replies.sort();
        assert_eq!(replies, vec!["added\n", "already in database\n"]);

        let expected = if r1 == "added\n" { "1\n" } else { "2\n" };
        assert_eq!(request(&mut first, "q x\n").await, expected);
        assert_eq!(request(&mut second, "q x\n").await, expected);
    }

    #[tokio::test]
    async fn test_eof_marker_closes_only_that_session() {
        let (addr, ctx) = create_test_server().await;
        let mut leaving = connect(addr).await;
        let mut staying = connect(addr).await;

        assert_eq!(request(&mut leaving, "a shared 1\n").await, "added\n");
        leaving.get_mut().write_all(&[EOF_MARKER, b'\n']).await.unwrap();
        assert_closed(&mut leaving).await;

        wait_until(|| ctx.registry().len() == 1).await;
        assert_eq!(request(&mut staying, "q shared\n").await, "1\n");
        assert_eq!(ctx.store().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_line_keeps_connection() {
        let (addr, _) = create_test_server().await;
        let mut client = connect(addr).await;

        let long = format!("a {} v\n", "k".repeat(MAX_LINE_LEN * 3));
        assert_eq!(request(&mut client, &long).await, "ill-formed command\n");
        assert_eq!(request(&mut client, "a k v\n").await, "added\n");
    }

    #[tokio::test]
    async fn test_pause_holds_replies_until_release() {
        let (addr, ctx) = create_test_server().await;
        let mut client = connect(addr).await;
        assert_eq!(request(&mut client, "a k v\n").await, "added\n");

        ctx.gate().stop();
        client.get_mut().write_all(b"q k\n").await.unwrap();

        let mut reply = String::new();
        let early = timeout(Duration::from_millis(200), client.read_line(&mut reply)).await;
        assert!(early.is_err(), "reply arrived while paused: {:?}", reply);

        ctx.gate().release();
        timeout(Duration::from_secs(2), client.read_line(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "v\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_in_flight_completes_while_paused() {
        let (addr, ctx) = create_test_server().await;
        let mut client = connect(addr).await;

        let fifo = std::env::temp_dir().join(format!("treekv-fifo-{}", std::process::id()));
        let _ = std::fs::remove_file(&fifo);
        let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(status.success());

        // The batch blocks on the fifo until a writer shows up
        let command = format!("f {}\n", fifo.display());
        client.get_mut().write_all(command.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        ctx.gate().stop();
        let writer = {
            let fifo = fifo.clone();
            tokio::task::spawn_blocking(move || std::fs::write(fifo, "a mid 1\n"))
        };
        writer.await.unwrap().unwrap();

        // Started before the stop, so it finishes and replies while stopped
        let mut reply = String::new();
        timeout(Duration::from_secs(2), client.read_line(&mut reply))
            .await
            .expect("in-flight command did not complete")
            .unwrap();
        assert_eq!(reply, "file processed\n");
        assert!(ctx.gate().is_stopped());
        assert_eq!(ctx.store().query("mid"), Some("1".into()));

        // The next command waits for the release
        client.get_mut().write_all(b"q mid\n").await.unwrap();
        reply.clear();
        let early = timeout(Duration::from_millis(200), client.read_line(&mut reply)).await;
        assert!(early.is_err(), "reply arrived while paused: {:?}", reply);

        ctx.gate().release();
        timeout(Duration::from_secs(2), client.read_line(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "1\n");

        std::fs::remove_file(&fifo).unwrap();
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_answered() {
        let (addr, ctx) = create_test_server().await;
        let mut client = connect(addr).await;

        client.get_mut().write_all(b"a k v").await.unwrap();
        client.get_mut().shutdown().await.unwrap();

        let mut reply = String::new();
        timeout(Duration::from_secs(2), client.read_line(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "added\n");
        assert_closed(&mut client).await;

        assert_eq!(ctx.store().query("k"), Some("v".into()));
        wait_until(|| ctx.registry().is_empty()).await;
    }

    #[tokio::test]
    async fn test_oversized_last_line_at_eof() {
        let (addr, ctx) = create_test_server().await;
        let mut client = connect(addr).await;

        let long = format!("a k {}", "v".repeat(MAX_LINE_LEN * 2));
        client.get_mut().write_all(long.as_bytes()).await.unwrap();
        client.get_mut().shutdown().await.unwrap();

        let mut reply = String::new();
        timeout(Duration::from_secs(2), client.read_line(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "ill-formed command\n");
        assert_closed(&mut client).await;
        assert!(ctx.store().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_then_drain() {
        let (addr, ctx) = create_test_server().await;
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(connect(addr).await);
        }
        wait_until(|| ctx.registry().len() == 3).await;
        assert_eq!(ctx.coordinator().live(), 3);

        ctx.registry().close();
        assert_eq!(ctx.registry().cancel_all(), 3);
        timeout(Duration::from_secs(2), ctx.coordinator().drain())
            .await
            .unwrap();

        assert_eq!(ctx.coordinator().live(), 0);
        assert!(ctx.registry().is_empty());
        for client in &mut clients {
            assert_closed(client).await;
        }
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_handler() {
        let (addr, ctx) = create_test_server().await;
        let mut client = connect(addr).await;
        wait_until(|| ctx.registry().len() == 1).await;

        ctx.gate().stop();
        client.get_mut().write_all(b"q k\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        ctx.registry().cancel_all();
        timeout(Duration::from_secs(2), ctx.coordinator().drain())
            .await
            .unwrap();
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_refused_once_registry_closed() {
        let (addr, ctx) = create_test_server().await;
        ctx.registry().close();

        let mut client = connect(addr).await;
        assert_closed(&mut client).await;
        assert_eq!(ctx.coordinator().live(), 0);
        assert_eq!(ctx.stats().connections_accepted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, ctx) = create_test_server().await;
        let stats = ctx.stats();

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = connect(addr).await;
        wait_until(|| stats.active_connections.load(Ordering::Relaxed) == 1).await;
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);

        request(&mut client, "q nothing\n").await;
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        // Close connection
        drop(client);
        wait_until(|| stats.active_connections.load(Ordering::Relaxed) == 0).await;
        wait_until(|| ctx.registry().is_empty()).await;
    }
}
