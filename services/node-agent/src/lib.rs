//! Visual Sensor Network Node Library
//!
//! A sensor node keeps a persistent connection to the coordinating server,
//! reports how much motion its camera sees, and adapts its sampling rate to
//! its own activity and to the activity its neighbors report.
//!
//! ## Architecture
//!
//! ```text
//! timer ─▶ ImageSource ─▶ ActivityController ─▶ NodeReport ─▶ Transport ─▶ server
//! server ─▶ Transport ─▶ ServerDirective ─▶ NodeOrchestrator ─▶ ActivityController
//! ```
//!
//! ## Modules
//!
//! - `activity`: Activation state and the activation-to-interval curve
//! - `transport`: Framed TCP connection with reconnect
//! - `node`: The control loop tying the pieces together
//! - `image_source`: Camera interface and a synthetic source
//! - `identity`: Node number resolution from host names
//! - `config`: Environment-based configuration

pub mod activity;
pub mod config;
pub mod identity;
pub mod image_source;
pub mod node;
pub mod transport;

// Re-export commonly used types
pub use activity::{ActivityConfig, ActivityController};
pub use config::{Config, ConfigError};
pub use image_source::{ImageSource, ImageSourceError, SyntheticImageSource};
pub use node::{run_node, NodeOrchestrator, NodeSettings, TickOutcome, TickStats};
pub use transport::{
    BackoffPolicy, ConnectionState, SendError, Transport, TransportConfig, TransportError,
    TransportEvent, TransportHandle,
};
