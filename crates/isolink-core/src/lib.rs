//! # isolink Core
//!
//! Shared vocabulary for the isolink gateway: the message envelope, error
//! taxonomy, and configuration model.
//!
//! - **Messages**: [`IsoMsg`], a numbered-field envelope in the ISO-8583
//!   style with subset cloning and field merging for handback handling.
//! - **Errors**: `thiserror`-based taxonomy split into [`LinkError`] (gateway
//!   and router failures) and [`ChannelError`] (transport failures), all
//!   serializable for management responses.
//! - **Configuration**: YAML-loadable gateway, channel, filter, and router
//!   descriptions with environment overrides and validation.
//!
//! ## Example
//!
//! ```
//! use isolink_core::config::GatewayConfig;
//! use isolink_core::msg::IsoMsg;
//!
//! let mut config = GatewayConfig::default();
//! config.channel.host = "iso.example.net".to_string();
//! config.channel.port = 7001;
//! assert!(config.validate().is_ok());
//!
//! let request = IsoMsg::with_mti("0800").with_field(70, "301");
//! assert_eq!(request.mti(), Some("0800"));
//! ```

pub mod config;
pub mod error;
pub mod msg;

// Re-export commonly used types for convenience
pub use config::{ChannelConfig, FilterDirection, FilterSpec, GatewayConfig, RouteStrategy, RouterConfig};
pub use error::{ChannelError, ConfigError, LinkError, Result};
pub use msg::IsoMsg;
