//! Test helpers for sensor nodes.
//!
//! [`FakeCoordinator`] is a loopback TCP server speaking the node wire
//! protocol. It accepts one connection at a time, records every inbound
//! frame, and can push directives, raw bytes or a dropped connection at the
//! node under test.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use vsn_proto::{encode_frame, FrameDecoder, NodeReport, ServerDirective};

/// Default wait used by the `next_*` helpers.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

enum Command {
    /// Write bytes to the current connection as-is.
    Write(Bytes),
    /// Close the current connection.
    Drop,
}

/// Loopback server standing in for the coordinating server.
pub struct FakeCoordinator {
    addr: SocketAddr,
    frames_rx: mpsc::UnboundedReceiver<Bytes>,
    commands_tx: mpsc::UnboundedSender<Command>,
    connections: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeCoordinator {
    /// Bind to an ephemeral loopback port and start accepting.
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    accept_result = listener.accept() => match accept_result {
                        Ok((stream, _)) => stream,
                        Err(_) => break,
                    },
                    _ = &mut shutdown_rx => break,
                };

                conn_clone.fetch_add(1, Ordering::SeqCst);

                let shutdown =
                    serve_connection(stream, &mut commands_rx, &frames_tx, &mut shutdown_rx).await;
                if shutdown {
                    break;
                }
            }
        });

        Ok(Self {
            addr,
            frames_rx,
            commands_tx,
            connections,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.connection_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.connection_count() >= count
    }

    /// Next inbound frame payload, waiting up to `timeout`.
    pub async fn next_frame_within(&mut self, timeout: Duration) -> Option<Bytes> {
        tokio::time::timeout(timeout, self.frames_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next inbound frame payload.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.next_frame_within(DEFAULT_WAIT).await
    }

    /// Next inbound frame, decoded as a report.
    pub async fn next_report(&mut self) -> Option<NodeReport> {
        let frame = self.next_frame().await?;
        NodeReport::decode(&frame).ok()
    }

    /// Send a directive to the connected node.
    pub fn send_directive(&self, directive: &ServerDirective) {
        self.send_payload(&directive.encode());
    }

    /// Send an arbitrary payload as one frame.
    pub fn send_payload(&self, payload: &[u8]) {
        if let Ok(frame) = encode_frame(payload) {
            self.send_raw(frame);
        }
    }

    /// Write bytes without framing them.
    pub fn send_raw(&self, bytes: impl Into<Bytes>) {
        let _ = self.commands_tx.send(Command::Write(bytes.into()));
    }

    /// Close the current connection; the listener keeps accepting.
    pub fn drop_connection(&self) {
        let _ = self.commands_tx.send(Command::Drop);
    }
}

impl Drop for FakeCoordinator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Serve one connection. Returns true when the coordinator is shutting down.
async fn serve_connection(
    mut stream: TcpStream,
    commands_rx: &mut mpsc::UnboundedReceiver<Command>,
    frames_tx: &mpsc::UnboundedSender<Bytes>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    let mut decoder = FrameDecoder::new(usize::MAX >> 1);
    let mut buf = vec![0u8; 8192];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return false,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                while let Ok(Some(frame)) = decoder.decode_next() {
                    let _ = frames_tx.send(frame);
                }
            }
            command = commands_rx.recv() => {
                match command {
                    Some(Command::Write(bytes)) => {
                        if stream.write_all(&bytes).await.is_err() {
                            return false;
                        }
                        let _ = stream.flush().await;
                    }
                    Some(Command::Drop) => return false,
                    None => return true,
                }
            }
            _ = &mut *shutdown_rx => return true,
        }
    }
}

/// A loopback address with nothing listening on it.
pub async fn unused_addr() -> io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    listener.local_addr()
}
