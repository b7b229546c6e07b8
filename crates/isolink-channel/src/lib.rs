//! # isolink-channel
//!
//! The channel capability set for the isolink gateway: transport traits, a
//! concrete TCP implementation, and the seams around it.
//!
//! - **Traits**: [`MsgChannel`] (one exclusive connection) and
//!   [`RequestChannel`] (a shared request/response endpoint)
//! - **TCP**: length-prefixed framing with optional fixed header,
//!   connect/read/write timeouts, and socket configuration via `socket2`
//! - **Codec**: [`MsgCodec`] payload encoding seam, JSON by default
//! - **Filters**: per-direction message filters with veto semantics
//! - **Factory**: kind-string resolution from configuration to a built
//!   channel, extensible at runtime
//! - **Registry**: process-wide name-to-channel bindings, resolved at
//!   request time
//!
//! ## Example
//!
//! ```rust,no_run
//! use isolink_channel::factory::{ChannelFactory, StandardChannelFactory};
//! use isolink_core::config::ChannelConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut config = ChannelConfig::default();
//! config.host = "iso.example.net".to_string();
//! config.port = 7001;
//!
//! let factory = StandardChannelFactory::new();
//! let mut channel = factory.create(&config)?;
//! channel.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod factory;
pub mod filter;
pub mod registry;
pub mod tcp;

// Re-export commonly used types
pub use channel::{MsgChannel, RequestChannel};
pub use codec::{JsonCodec, MsgCodec};
pub use factory::{ChannelFactory, StandardChannelFactory};
pub use filter::{FieldScrubFilter, FilterChain, MsgFilter, MtiAllowFilter};
pub use registry::ChannelRegistry;
pub use tcp::{StreamConnector, TcpChannel, TcpConnector};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};
