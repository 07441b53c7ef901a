//! Node orchestrator - the sensor node's control loop.
//!
//! On every tick the orchestrator:
//! 1. Flushes stale camera frames while the node is idle
//! 2. Reads the active-pixel fraction from the image source
//! 3. Updates the activity controller
//! 4. Captures an encoded frame when the server asked for images
//! 5. Sends a [`NodeReport`], queued together with that frame if there is one
//! 6. Schedules the next tick after the controller's *current* interval
//!
//! A report only carries `send_image` when its image is queued right behind
//! it. If capture fails the report goes out with `send_image` cleared.
//!
//! Directives from the server update the neighbor activation and the
//! image-send behavior. Ticks continue while disconnected; reports sent
//! during the gap are dropped by the transport.

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use vsn_proto::{ImageType, NodeReport, ServerDirective};

use crate::activity::{ActivityConfig, ActivityController};
use crate::image_source::{ImageSource, ImageSourceError};
use crate::transport::{
    SendError, Transport, TransportConfig, TransportError, TransportEvent, TransportHandle,
};

/// Per-node settings for the control loop.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
    /// Identifier sent in every report.
    pub node_id: u32,

    /// Image type used until a directive overrides it.
    pub image_type: ImageType,

    /// Whether to send images until a directive overrides it.
    pub send_image: bool,

    /// Frames flushed on idle ticks.
    pub burst_frames: u32,
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The report, and its image when `report.send_image` is set, reached the transport.
    Sent { report: NodeReport, image_sent: bool },

    /// The transport dropped the report together with any image.
    Dropped { report: NodeReport, reason: SendError },

    /// The image source failed; no report this tick.
    Skipped(ImageSourceError),
}

/// Counters kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub reports_sent: u64,
    pub reports_dropped: u64,
    pub images_sent: u64,
    pub source_failures: u64,
}

/// Control loop owning the activity state and the transport handle.
pub struct NodeOrchestrator<S: ImageSource> {
    settings: NodeSettings,
    activity: ActivityController,
    image_source: S,
    transport: TransportHandle,
    send_image: bool,
    image_type: ImageType,
    last_tick_at: Option<Instant>,
    stats: TickStats,
}

impl<S: ImageSource> NodeOrchestrator<S> {
    /// Create an orchestrator around an established transport.
    pub fn new(
        settings: NodeSettings,
        activity: ActivityConfig,
        image_source: S,
        transport: TransportHandle,
    ) -> Self {
        Self {
            send_image: settings.send_image,
            image_type: settings.image_type,
            settings,
            activity: ActivityController::new(activity),
            image_source,
            transport,
            last_tick_at: None,
            stats: TickStats::default(),
        }
    }

    pub fn activity(&self) -> &ActivityController {
        &self.activity
    }

    /// Whether an image frame follows the next report.
    pub fn send_image(&self) -> bool {
        self.send_image
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn image_source(&self) -> &S {
        &self.image_source
    }

    /// Run one control tick.
    pub async fn tick(&mut self) -> TickOutcome {
        let started = Instant::now();
        if let Some(previous) = self.last_tick_at.replace(started) {
            debug!(
                since_previous_ms = started.duration_since(previous).as_millis() as u64,
                "Tick started"
            );
        }
        self.stats.ticks += 1;

        let percentage = match self.read_activity().await {
            Ok(percentage) => percentage,
            Err(e) => {
                warn!(error = %e, "Image source failed, skipping report");
                self.stats.source_failures += 1;
                return TickOutcome::Skipped(e);
            }
        };
        self.activity.update_from_local_reading(percentage);
        let measured = Instant::now();

        debug!(state = %self.activity, "Activity updated");

        let image = if self.send_image {
            self.capture_frame().await
        } else {
            None
        };
        let captured = Instant::now();

        let report = NodeReport {
            node_id: self.settings.node_id,
            active_pixel_percentage: percentage,
            activation_level: self.activity.activation_level(),
            send_image: image.is_some(),
        };

        let encoded = report.encode();
        let sent = match &image {
            Some(frame) => self.transport.send_pair(&encoded, frame),
            None => self.transport.send(&encoded),
        };
        if let Err(reason) = sent {
            self.stats.reports_dropped += 1;
            debug!(reason = %reason, with_image = image.is_some(), "Report dropped");
            return TickOutcome::Dropped { report, reason };
        }

        self.stats.reports_sent += 1;
        let image_sent = image.is_some();
        if image_sent {
            self.stats.images_sent += 1;
        }
        let finished = Instant::now();

        debug!(
            measure_ms = measured.duration_since(started).as_secs_f64() * 1000.0,
            image_ms = captured.duration_since(measured).as_secs_f64() * 1000.0,
            send_ms = finished.duration_since(captured).as_secs_f64() * 1000.0,
            "Tick finished"
        );

        TickOutcome::Sent { report, image_sent }
    }

    async fn read_activity(&mut self) -> Result<f32, ImageSourceError> {
        if self.activity.is_below_threshold() && self.settings.burst_frames > 0 {
            self.image_source
                .grab_frames(self.settings.burst_frames)
                .await?;
        }

        let percentage = self
            .image_source
            .capture_percentage_of_active_pixels()
            .await?;
        if !percentage.is_finite() {
            return Err(ImageSourceError::InvalidReading(percentage));
        }
        Ok(percentage.clamp(0.0, 1.0))
    }

    /// Encoded frame for this tick's report, if one can be sent.
    async fn capture_frame(&mut self) -> Option<Bytes> {
        let frame = match self.image_source.capture_encoded_frame(self.image_type).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    error = %e,
                    image_type = %self.image_type,
                    "Image capture failed, reporting without image"
                );
                return None;
            }
        };

        let max = self.transport.max_outbound_frame_len();
        if frame.len() > max {
            warn!(
                len = frame.len(),
                max,
                "Image frame exceeds outbound limit, reporting without image"
            );
            return None;
        }

        Some(frame)
    }

    /// Apply a directive from the server.
    pub fn apply_directive(&mut self, directive: ServerDirective) {
        debug!(
            neighbor_activation = directive.neighbor_activation_level,
            image_type = %directive.image_type,
            send_image = directive.send_image,
            "Received directive"
        );

        self.activity
            .update_from_neighbor_report(directive.neighbor_activation_level);
        self.send_image = directive.send_image;
        self.image_type = directive.image_type;
    }

    /// React to a transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Packet(directive) => self.apply_directive(directive),
            TransportEvent::Connected => {
                info!(node_id = self.settings.node_id, "Server connection up");
            }
            TransportEvent::Disconnected { reason } => {
                warn!(
                    node_id = self.settings.node_id,
                    reason = %reason,
                    "Server connection lost, continuing locally"
                );
            }
            TransportEvent::Reconnecting { attempt } => {
                debug!(attempt, "Waiting for reconnect");
            }
        }
    }

    /// Run until shutdown or until the transport stops.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> TickStats {
        info!(
            node_id = self.settings.node_id,
            interval_ms = self.activity.sample_interval().as_millis() as u64,
            "Starting control loop"
        );

        let mut next_tick = tokio::time::Instant::now() + self.activity.sample_interval();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {
                    let started = tokio::time::Instant::now();
                    self.tick().await;
                    next_tick = started + self.activity.sample_interval();
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            info!("Transport stopped");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Control loop shutting down");
                        break;
                    }
                }
            }
        }

        self.transport.close();

        info!(
            ticks = self.stats.ticks,
            reports_sent = self.stats.reports_sent,
            reports_dropped = self.stats.reports_dropped,
            images_sent = self.stats.images_sent,
            "Control loop stopped"
        );

        self.stats
    }
}

/// Connect to the server and run the control loop until shutdown.
///
/// Fails only when the initial connection cannot be established.
pub async fn run_node<S: ImageSource>(
    settings: NodeSettings,
    activity: ActivityConfig,
    transport: TransportConfig,
    image_source: S,
    shutdown: watch::Receiver<bool>,
) -> Result<TickStats, TransportError> {
    let (handle, events) = Transport::new(transport).connect().await?;
    let orchestrator = NodeOrchestrator::new(settings, activity, image_source, handle);
    Ok(orchestrator.run(events, shutdown).await)
}
