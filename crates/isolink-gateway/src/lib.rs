//! isolink gateway
//!
//! Pooled channel gateway and multiplexing router for request/response
//! message exchanges against remote ISO endpoints.
//!
//! # Architecture
//!
//! ```text
//!    requests                  ┌────────────────────────────┐
//!   ───────────► in queue ───► │   MessageDispatcher        │
//!                              │   (dispatcher.rs)          │
//!                              │   - poll loop              │
//!                              │   - one task per request   │
//!                              └──────────┬─────────────────┘
//!   submit() ── ReplyHandle               │
//!                              ┌──────────▼─────────────────┐
//!                              │   ExchangeTask (task.rs)   │
//!                              │   - borrow / connect       │
//!                              │   - send / receive         │
//!                              │   - handback merge         │
//!                              └──────────┬─────────────────┘
//!                              ┌──────────▼─────────────────┐
//!                              │   ChannelPool (pool.rs)    │
//!                              │   - fail-fast acquire      │
//!                              │   - idle eviction          │
//!                              └────────────────────────────┘
//!
//!   ChannelRouter (router.rs) ──► ChannelRegistry ──► gateways by name
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use isolink_channel::{ChannelRegistry, StandardChannelFactory};
//! use isolink_core::{GatewayConfig, IsoMsg, RouterConfig};
//! use isolink_gateway::{ChannelGateway, ChannelRouter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(ChannelRegistry::new());
//!     let factory = Arc::new(StandardChannelFactory::new());
//!
//!     let mut config = GatewayConfig::default();
//!     config.name = "issuer-a".to_string();
//!     config.channel.host = "203.0.113.10".to_string();
//!     config.channel.port = 8583;
//!
//!     let gateway = Arc::new(ChannelGateway::new(
//!         config,
//!         Arc::clone(&registry),
//!         factory,
//!     ));
//!     gateway.start().await?;
//!
//!     // correlated request/response
//!     let request = IsoMsg::with_mti("0100").with_field(11, "000001");
//!     let handle = gateway.submit(request)?;
//!     if let Some(response) = handle.wait(Some(Duration::from_secs(30))).await? {
//!         println!("approved: {:?}", response.get(39));
//!     }
//!
//!     // routed across named gateways
//!     let mut mux = RouterConfig::default();
//!     mux.channels = vec!["issuer-a".to_string()];
//!     let router = ChannelRouter::new(mux, Arc::clone(&registry));
//!     let _ = router
//!         .request(IsoMsg::with_mti("0100"), Duration::from_secs(30))
//!         .await;
//!
//!     gateway.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod dispatcher;
pub mod gateway;
pub mod metrics;
pub mod pool;
pub mod router;
pub mod task;

#[cfg(test)]
mod testutil;

pub use dispatcher::MessageDispatcher;
pub use gateway::{ChannelGateway, ReplyHandle};
pub use metrics::{
    CounterSnapshot, GatewayMetrics, MetricsConfig, MetricsExporter, PoolMetrics, RouterMetrics,
};
pub use pool::{ChannelPool, PoolConfig, PoolOccupancy};
pub use router::ChannelRouter;
pub use task::{ExchangeId, ExchangeOutcome, ExchangePolicy, ExchangeTask};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::gateway::{ChannelGateway, ReplyHandle};
    pub use crate::metrics::{MetricsConfig, MetricsExporter};
    pub use crate::pool::{ChannelPool, PoolConfig};
    pub use crate::router::ChannelRouter;
    pub use crate::task::{ExchangeOutcome, ExchangePolicy};
}
