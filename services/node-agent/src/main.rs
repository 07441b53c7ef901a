//! Visual Sensor Network Node
//!
//! Connects to the coordinating server, reports motion activity on an
//! adaptive schedule and forwards images when the server asks for them.
//!
//! ## Architecture
//!
//! - **Transport**: Persistent framed TCP connection, reconnecting on loss
//! - **Activity Controller**: Turns motion readings into a sampling interval
//! - **Orchestrator**: Single control loop driving ticks and directives
//!
//! Everything runs on one current-thread runtime.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vsn_node_agent::{run_node, Config, SyntheticImageSource};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting sensor node");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        node_id = config.node_id,
        node_name = config.node_name.as_deref().unwrap_or("<none>"),
        server = %format!("{}:{}", config.server_host, config.server_port),
        image_type = %config.image_type,
        send_image = config.send_image,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let node = run_node(
        config.node_settings(),
        config.activity.clone(),
        config.transport_config(),
        SyntheticImageSource::new(),
        shutdown_rx,
    );
    tokio::pin!(node);

    let result = tokio::select! {
        result = &mut node => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            node.await
        }
    };

    match result {
        Ok(stats) => {
            info!(
                ticks = stats.ticks,
                reports_sent = stats.reports_sent,
                "Sensor node shutdown complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Cannot start without a server connection");
            Err(e.into())
        }
    }
}
