//! Connection task: socket I/O, frame reassembly and reconnects.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use vsn_proto::{FrameDecoder, ServerDirective};

use super::{ConnectionState, TransportConfig, TransportError, TransportEvent};

const READ_BUF_LEN: usize = 4096;

/// Why an established connection stopped serving.
enum ServeOutcome {
    /// The handle closed the transport or the consumer went away.
    Closed,
    /// Socket error, EOF or protocol violation.
    Lost(String),
}

/// Initial connection attempt. Failure is fatal to the caller.
pub(super) async fn establish(
    config: &TransportConfig,
    state_tx: &watch::Sender<ConnectionState>,
) -> Result<TcpStream, TransportError> {
    let addr = config.addr();
    info!(addr = %addr, "Connecting to server");

    state_tx.send_replace(ConnectionState::Connecting);

    match try_connect(config).await {
        Ok(stream) => {
            state_tx.send_replace(ConnectionState::Connected);
            info!(addr = %addr, "Connected to server");
            Ok(stream)
        }
        Err(source) => {
            state_tx.send_replace(ConnectionState::Disconnected);
            Err(TransportError::ConnectionEstablishmentFailed { addr, source })
        }
    }
}

async fn try_connect(config: &TransportConfig) -> std::io::Result<TcpStream> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr()))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Owns the socket and the connection state for the transport's lifetime.
pub(super) struct ConnectionTask {
    config: TransportConfig,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::Receiver<Bytes>,
    event_tx: mpsc::Sender<TransportEvent>,
    close_rx: watch::Receiver<bool>,
}

impl ConnectionTask {
    pub(super) fn new(
        config: TransportConfig,
        state_tx: watch::Sender<ConnectionState>,
        outbound_rx: mpsc::Receiver<Bytes>,
        event_tx: mpsc::Sender<TransportEvent>,
        close_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            state_tx,
            outbound_rx,
            event_tx,
            close_rx,
        }
    }

    /// Serve `stream`, then keep reconnecting until closed.
    pub(super) async fn run(mut self, stream: TcpStream) {
        let mut stream = stream;

        loop {
            if !self.emit(TransportEvent::Connected).await {
                break;
            }

            let reason = match self.serve(stream).await {
                ServeOutcome::Closed => break,
                ServeOutcome::Lost(reason) => reason,
            };

            self.set_state(ConnectionState::Disconnected);
            warn!(addr = %self.config.addr(), reason = %reason, "Disconnected from server");
            self.discard_pending();

            if !self.emit(TransportEvent::Disconnected { reason }).await {
                break;
            }

            stream = match self.reconnect().await {
                Some(stream) => stream,
                None => break,
            };
        }

        self.set_state(ConnectionState::Disconnected);
        info!(addr = %self.config.addr(), "Transport closed");
    }

    async fn serve(&mut self, mut stream: TcpStream) -> ServeOutcome {
        let (mut reader, mut writer) = stream.split();
        let mut decoder = FrameDecoder::new(self.config.max_inbound_frame_len);
        let mut buf = [0u8; READ_BUF_LEN];

        loop {
            tokio::select! {
                biased;

                changed = self.close_rx.changed() => {
                    if changed.is_err() || *self.close_rx.borrow() {
                        let _ = writer.shutdown().await;
                        return ServeOutcome::Closed;
                    }
                }

                frame = self.outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        return ServeOutcome::Closed;
                    };
                    if let Err(e) = writer.write_all(&frame).await {
                        return ServeOutcome::Lost(format!("write failed: {e}"));
                    }
                }

                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            if decoder.buffered_len() > 0 {
                                debug!(
                                    buffered = decoder.buffered_len(),
                                    "Connection closed mid-frame"
                                );
                            }
                            return ServeOutcome::Lost("connection closed by server".to_string());
                        }
                        Ok(n) => n,
                        Err(e) => return ServeOutcome::Lost(format!("read failed: {e}")),
                    };

                    decoder.extend(&buf[..n]);
                    loop {
                        match decoder.decode_next() {
                            Ok(Some(frame)) => {
                                if !self.dispatch(&frame).await {
                                    return ServeOutcome::Closed;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => return ServeOutcome::Lost(e.to_string()),
                        }
                    }
                }
            }
        }
    }

    /// Decode one inbound frame. Malformed frames are dropped.
    async fn dispatch(&mut self, frame: &[u8]) -> bool {
        match ServerDirective::decode(frame) {
            Ok(directive) => self.emit(TransportEvent::Packet(directive)).await,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "Dropping malformed packet");
                true
            }
        }
    }

    /// Retry until connected; `None` once the transport is closed.
    async fn reconnect(&mut self) -> Option<TcpStream> {
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            let delay = self.config.backoff.delay(attempt);

            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );

            if !self.emit(TransportEvent::Reconnecting { attempt }).await {
                return None;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_closed(&mut self.close_rx) => return None,
            }

            self.set_state(ConnectionState::Connecting);

            match try_connect(&self.config).await {
                Ok(stream) => {
                    self.set_state(ConnectionState::Connected);
                    info!(addr = %self.config.addr(), attempt, "Reconnected to server");
                    return Some(stream);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    debug!(addr = %self.config.addr(), attempt, error = %e, "Reconnect failed");
                }
            }
        }
    }

    /// Frames queued for a connection that no longer exists are stale.
    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded frames queued before disconnect");
        }
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }
}

async fn wait_closed(close_rx: &mut watch::Receiver<bool>) {
    loop {
        if *close_rx.borrow() {
            return;
        }
        // Every handle dropped counts as closed.
        if close_rx.changed().await.is_err() {
            return;
        }
    }
}
