//! Framed transport - the node's single connection to the coordinating server.
//!
//! The transport:
//! - Owns exactly one outbound TCP connection to `(host, port)`
//! - Frames every message with a 4-byte big-endian length prefix
//! - Decodes inbound frames into [`ServerDirective`]s and delivers them as
//!   [`TransportEvent`]s
//! - Reconnects with backoff after an established connection is lost
//!
//! ## Connection State
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!       ▲                         │                  │
//!       └────────── failure ──────┘◀── error/EOF ────┘
//! ```
//!
//! A failed *initial* connection is fatal ([`TransportError::ConnectionEstablishmentFailed`]);
//! losing an established connection is retried forever.
//!
//! The connection runs as one task on the caller's runtime. Everything else
//! talks to it through channels: [`TransportHandle::send`] enqueues outbound
//! frames without blocking, and the event receiver returned by
//! [`Transport::connect`] yields connection and packet events in order.

mod backoff;
mod connection;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use vsn_proto::{encode_frame, ServerDirective, DEFAULT_MAX_FRAME_LEN};

pub use backoff::BackoffPolicy;

// =============================================================================
// Configuration
// =============================================================================

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server host name or IP address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Backoff between reconnect attempts after a lost connection.
    pub backoff: BackoffPolicy,

    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,

    /// Largest inbound frame accepted before the connection is dropped.
    pub max_inbound_frame_len: usize,

    /// Largest outbound payload (image frames included).
    pub max_outbound_frame_len: usize,

    /// Outbound frames buffered ahead of the socket.
    pub outbound_queue: usize,

    /// Events buffered ahead of the consumer.
    pub event_queue: usize,
}

impl TransportConfig {
    /// Configuration with defaults for everything but the address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            max_inbound_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_outbound_frame_len: 16 * 1024 * 1024,
            outbound_queue: 32,
            event_queue: 64,
        }
    }

    /// `host:port` string used for connecting and logging.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// State, Events and Errors
// =============================================================================

/// Connection state, owned by the transport task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and streaming.
    Connected,
}

/// Events delivered to the transport's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection was established.
    Connected,

    /// A complete directive arrived from the server.
    Packet(ServerDirective),

    /// The established connection was lost.
    Disconnected { reason: String },

    /// A reconnect attempt is about to start.
    Reconnecting { attempt: u32 },
}

/// Fatal transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The initial connection could not be established.
    #[error("connection establishment failed: {addr}: {source}")]
    ConnectionEstablishmentFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a send that did not reach the socket buffer.
///
/// All variants mean the message was dropped; none of them block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The transport is not currently connected.
    #[error("not connected")]
    NotConnected,

    /// The outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,

    /// The payload exceeds the outbound frame limit.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },
}

// =============================================================================
// Transport
// =============================================================================

/// Builder for the node's server connection.
pub struct Transport {
    config: TransportConfig,
}

impl Transport {
    /// Create a transport for the given configuration.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Establish the initial connection and start the connection task.
    ///
    /// Returns the handle for sending and the event stream. Must be called
    /// from within a tokio runtime.
    pub async fn connect(
        self,
    ) -> Result<(TransportHandle, mpsc::Receiver<TransportEvent>), TransportError> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        // Room for at least one report and its image.
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(2));
        let (event_tx, event_rx) = mpsc::channel(self.config.event_queue.max(1));
        let (close_tx, close_rx) = watch::channel(false);

        let stream = connection::establish(&self.config, &state_tx).await?;

        let handle = TransportHandle {
            outbound_tx,
            state_rx,
            close_tx: Arc::new(close_tx),
            max_outbound_frame_len: self.config.max_outbound_frame_len,
        };

        let task = connection::ConnectionTask::new(
            self.config,
            state_tx,
            outbound_rx,
            event_tx,
            close_rx,
        );
        tokio::spawn(task.run(stream));

        Ok((handle, event_rx))
    }
}

/// Handle for sending frames and observing the connection.
#[derive(Clone)]
pub struct TransportHandle {
    outbound_tx: mpsc::Sender<Bytes>,
    state_rx: watch::Receiver<ConnectionState>,
    close_tx: Arc<watch::Sender<bool>>,
    max_outbound_frame_len: usize,
}

impl TransportHandle {
    /// Frame `payload` and hand it to the connection.
    ///
    /// Never waits for a reconnect: while not connected the message is
    /// dropped and [`SendError::NotConnected`] returned.
    pub fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        self.ensure_connected()?;
        let frame = self.frame(payload)?;

        self.outbound_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::NotConnected,
        })
    }

    /// Frame two payloads and queue them back to back.
    ///
    /// Either both frames are queued or neither is. Used for a report and
    /// the image that must follow it.
    pub fn send_pair(&self, first: &[u8], second: &[u8]) -> Result<(), SendError> {
        self.ensure_connected()?;
        let frames = [self.frame(first)?, self.frame(second)?];

        let permits = self.outbound_tx.try_reserve_many(frames.len()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => SendError::NotConnected,
        })?;
        for (permit, frame) in permits.zip(frames) {
            permit.send(frame);
        }
        Ok(())
    }

    /// Largest payload [`TransportHandle::send`] accepts.
    pub fn max_outbound_frame_len(&self) -> usize {
        self.max_outbound_frame_len
    }

    fn ensure_connected(&self) -> Result<(), SendError> {
        if *self.state_rx.borrow() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        Ok(())
    }

    fn frame(&self, payload: &[u8]) -> Result<Bytes, SendError> {
        let too_large = SendError::FrameTooLarge {
            len: payload.len(),
            max: self.max_outbound_frame_len,
        };
        if payload.len() > self.max_outbound_frame_len {
            return Err(too_large);
        }
        encode_frame(payload).map_err(|_| too_large)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    /// Whether [`TransportHandle::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }
}

// =============================================================================
// Tests
// =============================================================================
