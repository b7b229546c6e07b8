//! Configuration model for gateways and routers.
//!
//! Supports loading from YAML files, YAML strings, and the `config` crate
//! builder with `ISOLINK_*` environment variable overrides. All durations are
//! configured in whole seconds.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Configuration for one pooled channel gateway.
///
/// # Examples
///
/// ```no_run
/// use isolink_core::config::GatewayConfig;
///
/// let config = GatewayConfig::from_file("gateway.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Name the gateway registers itself under
    pub name: String,

    /// Queue namespace label, carried in log fields
    pub space: String,

    /// Name of the inbound (request) queue
    pub in_queue: String,

    /// Name of the outbound (response) queue
    pub out_queue: String,

    /// Bound of both queues
    pub queue_capacity: usize,

    /// Re-raise connection failures to direct-path callers
    pub handle_connection_errors: bool,

    /// Maximum concurrently borrowed channels
    pub max_connections: usize,

    /// Connect attempts per exchange before giving up
    pub max_connect_attempts: u32,

    /// Pause between failed connect attempts
    pub reconnect_pause_secs: u64,

    /// Inbound queue poll timeout for the dispatcher loop
    pub poll_timeout_secs: u64,

    /// How long `stop` waits for in-flight exchanges
    pub shutdown_grace_secs: u64,

    /// Disconnect the channel after every exchange
    pub single_shot: bool,

    /// Fields copied from each request into its response
    pub handback_fields: Vec<u32>,

    /// The transport this gateway drives
    pub channel: ChannelConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "gateway".to_string(),
            space: "default".to_string(),
            in_queue: "send".to_string(),
            out_queue: "receive".to_string(),
            queue_capacity: 1000,
            handle_connection_errors: false,
            max_connections: 1,
            max_connect_attempts: 15,
            reconnect_pause_secs: 1,
            poll_timeout_secs: 5,
            shutdown_grace_secs: 30,
            single_shot: true,
            handback_fields: Vec::new(),
            channel: ChannelConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let config = Self::from_yaml(&contents)?;
        debug!(path = %path.display(), name = %config.name, "gateway configuration loaded");
        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration through the `config` crate, which layers the file
    /// under `ISOLINK_*` environment variable overrides
    /// (e.g. `ISOLINK_CHANNEL__PORT=7000`).
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("ISOLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let config: Self = config.try_deserialize().map_err(|e| ConfigError::InvalidFormat {
            reason: e.to_string(),
        })?;
        debug!(
            path = %path.display(),
            name = %config.name,
            "gateway configuration loaded with environment overrides"
        );
        Ok(config)
    }

    /// Validates the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::missing_field("name").into());
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid_value("queue_capacity", "must be at least 1").into());
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid_value("max_connections", "must be at least 1").into());
        }
        if self.max_connect_attempts == 0 {
            return Err(
                ConfigError::invalid_value("max_connect_attempts", "must be at least 1").into(),
            );
        }
        if self.poll_timeout_secs == 0 {
            return Err(
                ConfigError::invalid_value("poll_timeout_secs", "must be at least 1").into(),
            );
        }
        self.channel.validate()
    }

    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_secs(self.reconnect_pause_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Description of one transport channel: which implementation to build and
/// how to configure it. The `kind`, `codec`, and `connector` strings are
/// resolved against the channel factory at pool-fill time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Channel implementation identifier
    pub kind: String,

    pub host: String,
    pub port: u16,

    /// Wire codec identifier
    pub codec: String,

    /// Optional fixed header sent before every payload, as a hex string
    pub header: Option<String>,

    /// Socket factory identifier
    pub connector: String,

    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,

    /// Upper bound on a single inbound frame
    pub max_frame_size: usize,

    /// Enable TCP keepalive on new sockets
    pub keepalive: bool,

    /// Filters applied around each send and receive, in declared order
    pub filters: Vec<FilterSpec>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: "tcp".to_string(),
            host: String::new(),
            port: 0,
            codec: "json".to_string(),
            header: None,
            connector: "tcp".to_string(),
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            write_timeout_secs: 10,
            max_frame_size: 1024 * 1024,
            keepalive: true,
            filters: Vec::new(),
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(ConfigError::missing_field("channel.kind").into());
        }
        if self.host.is_empty() {
            return Err(ConfigError::missing_field("channel.host").into());
        }
        if self.port == 0 {
            return Err(ConfigError::invalid_value("channel.port", "must be non-zero").into());
        }
        if self.max_frame_size == 0 {
            return Err(
                ConfigError::invalid_value("channel.max_frame_size", "must be non-zero").into(),
            );
        }
        if let Some(header) = &self.header {
            let valid = header.len() % 2 == 0
                && !header.is_empty()
                && header.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(ConfigError::invalid_value(
                    "channel.header",
                    "must be an even-length hex string",
                )
                .into());
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// One filter in a channel's filter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// Filter implementation identifier
    pub kind: String,

    pub direction: FilterDirection,

    /// Field numbers, for filters that operate on fields
    pub fields: Vec<u32>,

    /// MTIs, for filters that operate on message types
    pub mtis: Vec<String>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            kind: String::new(),
            direction: FilterDirection::Both,
            fields: Vec::new(),
            mtis: Vec::new(),
        }
    }
}

/// Which traffic direction a filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterDirection {
    Incoming,
    Outgoing,
    #[default]
    Both,
}

impl FilterDirection {
    pub fn applies_incoming(&self) -> bool {
        matches!(self, FilterDirection::Incoming | FilterDirection::Both)
    }

    pub fn applies_outgoing(&self) -> bool {
        matches!(self, FilterDirection::Outgoing | FilterDirection::Both)
    }
}

/// Candidate selection policy for the channel router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteStrategy {
    /// Always try candidates in declared order
    #[default]
    PrimarySecondary,
    /// Rotate the starting candidate per request
    RoundRobin,
}

/// Configuration for one channel router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub name: String,

    /// Ordered candidate channel names, resolved at request time
    pub channels: Vec<String>,

    pub strategy: RouteStrategy,

    /// Pause between failed candidates
    pub retry_pause_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "mux".to_string(),
            channels: Vec::new(),
            strategy: RouteStrategy::default(),
            retry_pause_secs: 1,
        }
    }
}

impl RouterConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let config = Self::from_yaml(&contents)?;
        debug!(path = %path.display(), name = %config.name, "router configuration loaded");
        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::missing_field("name").into());
        }
        if self.channels.is_empty() {
            return Err(ConfigError::missing_field("channels").into());
        }
        if self.channels.iter().any(String::is_empty) {
            return Err(ConfigError::invalid_value("channels", "names must be non-empty").into());
        }
        Ok(())
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_secs(self.retry_pause_secs)
    }
}
