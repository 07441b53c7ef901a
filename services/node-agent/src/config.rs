//! Configuration for the sensor node.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use vsn_proto::ImageType;

use crate::activity::ActivityConfig;
use crate::identity;
use crate::node::NodeSettings;
use crate::transport::{BackoffPolicy, TransportConfig};

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// Values parse individually but contradict each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Sensor node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordinating server host or IP.
    pub server_host: String,

    /// Coordinating server port.
    pub server_port: u16,

    /// Name the node number was derived from, if any.
    pub node_name: Option<String>,

    /// Numeric node identifier sent in every report.
    pub node_id: u32,

    /// Image type sent until the server asks for another.
    pub image_type: ImageType,

    /// Whether to send images before the server says otherwise.
    pub send_image: bool,

    /// Frames flushed from the camera on ticks below the activation threshold.
    pub burst_frames: u32,

    /// Reconnect backoff after a lost connection.
    pub reconnect_backoff: BackoffPolicy,

    /// Activation-to-interval curve.
    pub activity: ActivityConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_host = lookup("VSN_SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let server_port = parse_var(&lookup, "VSN_SERVER_PORT")?.unwrap_or(50001);

        let node_name = lookup("VSN_NODE_NAME").or_else(identity::local_hostname);
        let node_id = match parse_var(&lookup, "VSN_NODE_ID")? {
            Some(id) => id,
            None => node_name
                .as_deref()
                .map(identity::resolve_node_number)
                .unwrap_or(identity::DEFAULT_NODE_NUMBER),
        };

        let image_type = parse_var(&lookup, "VSN_IMAGE_TYPE")?.unwrap_or_default();
        let send_image = parse_var(&lookup, "VSN_SEND_IMAGE")?.unwrap_or(false);
        let burst_frames = parse_var(&lookup, "VSN_BURST_FRAMES")?.unwrap_or(5);

        let defaults = BackoffPolicy::default();
        let reconnect_backoff = BackoffPolicy {
            base: parse_millis(&lookup, "VSN_RECONNECT_BASE_MS")?.unwrap_or(defaults.base),
            max: parse_millis(&lookup, "VSN_RECONNECT_MAX_MS")?.unwrap_or(defaults.max),
            jitter: defaults.jitter,
        };

        let defaults = ActivityConfig::default();
        let activity = ActivityConfig {
            activation_gain: parse_var(&lookup, "VSN_ACTIVATION_GAIN")?
                .unwrap_or(defaults.activation_gain),
            threshold: parse_var(&lookup, "VSN_ACTIVATION_THRESHOLD")?
                .unwrap_or(defaults.threshold),
            saturation: parse_var(&lookup, "VSN_ACTIVATION_SATURATION")?
                .unwrap_or(defaults.saturation),
            min_interval: parse_millis(&lookup, "VSN_MIN_INTERVAL_MS")?
                .unwrap_or(defaults.min_interval),
            max_interval: parse_millis(&lookup, "VSN_MAX_INTERVAL_MS")?
                .unwrap_or(defaults.max_interval),
        };

        let config = Self {
            server_host,
            server_port,
            node_name,
            node_id,
            image_type,
            send_image,
            burst_frames,
            reconnect_backoff,
            activity,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let activity = &self.activity;

        if activity.min_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "minimum sample interval must be positive".to_string(),
            ));
        }
        if activity.min_interval > activity.max_interval {
            return Err(ConfigError::Inconsistent(format!(
                "minimum sample interval {}ms exceeds maximum {}ms",
                activity.min_interval.as_millis(),
                activity.max_interval.as_millis()
            )));
        }
        if !(activity.threshold.is_finite() && activity.threshold >= 0.0) {
            return Err(ConfigError::Inconsistent(
                "activation threshold must be a non-negative number".to_string(),
            ));
        }
        if !(activity.saturation.is_finite() && activity.saturation > activity.threshold) {
            return Err(ConfigError::Inconsistent(
                "activation saturation must exceed the threshold".to_string(),
            ));
        }
        if !(activity.activation_gain.is_finite() && activity.activation_gain >= 0.0) {
            return Err(ConfigError::Inconsistent(
                "activation gain must be a non-negative number".to_string(),
            ));
        }
        if self.reconnect_backoff.base > self.reconnect_backoff.max {
            return Err(ConfigError::Inconsistent(
                "reconnect base delay exceeds maximum".to_string(),
            ));
        }

        Ok(())
    }

    /// Transport settings derived from this configuration.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            backoff: self.reconnect_backoff.clone(),
            ..TransportConfig::new(self.server_host.clone(), self.server_port)
        }
    }

    /// Control-loop settings derived from this configuration.
    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings {
            node_id: self.node_id,
            image_type: self.image_type,
            send_image: self.send_image,
            burst_frames: self.burst_frames,
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };

    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value,
            reason: e.to_string(),
        })
}

fn parse_millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<u64, F>(lookup, var)?.map(Duration::from_millis))
}
