//! Channel traits.
//!
//! Two contracts live here. [`MsgChannel`] is one physical connection: it is
//! stateful, not safe for concurrent use, and therefore exposed through
//! `&mut self` so exclusive use is a compile-time property. The pool hands
//! instances out as owned boxes, which makes "at most one holder at a time"
//! structural rather than a locking discipline.
//!
//! [`RequestChannel`] is the shared request/response endpoint a router can
//! drive: `send` hands a request over, `receive` waits for whatever comes
//! back. The pooled gateway implements it; the registry stores it.

use async_trait::async_trait;
use isolink_core::error::{ChannelError, LinkError};
use isolink_core::msg::IsoMsg;
use std::time::Duration;

/// One logical connection to the remote counterparty.
///
/// Lifecycle: constructed unconnected by a [`ChannelFactory`], connected by
/// whichever exchange borrows it, disconnected on release back to the pool.
///
/// [`ChannelFactory`]: crate::factory::ChannelFactory
#[async_trait]
pub trait MsgChannel: Send {
    /// Establishes the connection. Calling this on an already connected
    /// channel is a no-op.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Tears the connection down. Idempotent.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    fn is_connected(&self) -> bool;

    /// Writes one message. Fails with [`ChannelError::NotConnected`] when no
    /// connection is established.
    async fn send(&mut self, msg: &IsoMsg) -> Result<(), ChannelError>;

    /// Reads the next message, waiting up to the channel's configured read
    /// timeout.
    async fn receive(&mut self) -> Result<IsoMsg, ChannelError>;
}

/// A named request/response endpoint, shared between callers.
///
/// Implemented by the pooled gateway and looked up by name through the
/// [`ChannelRegistry`](crate::registry::ChannelRegistry) at request time.
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Hands a request over for transmission.
    ///
    /// A `ConnectionFailure` return means the endpoint could not reach its
    /// counterparty and the caller may try another one; any response arrives
    /// later through [`receive`](Self::receive).
    async fn send(&self, msg: IsoMsg) -> Result<(), LinkError>;

    /// Waits up to `timeout` for the next response. Returns `None` when
    /// nothing arrived in time; never fails.
    async fn receive(&self, timeout: Duration) -> Option<IsoMsg>;

    fn is_connected(&self) -> bool;
}
