//! One message exchange: borrow a channel, connect, send, receive, merge the
//! handback fields, and hand the channel back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use isolink_channel::channel::MsgChannel;
use isolink_core::config::GatewayConfig;
use isolink_core::error::{ChannelError, LinkError};
use isolink_core::msg::IsoMsg;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::GatewayMetrics;
use crate::pool::ChannelPool;

/// Correlates the log lines of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connect/retry policy for exchanges run by one gateway.
#[derive(Debug, Clone)]
pub struct ExchangePolicy {
    /// Upper bound on connect attempts per exchange
    pub max_connect_attempts: u32,
    /// Pause after each failed connect attempt
    pub reconnect_pause: Duration,
    /// Disconnect the channel after every exchange
    pub single_shot: bool,
    /// Request fields copied aside and merged into the response
    pub handback_fields: Vec<u32>,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            max_connect_attempts: 15,
            reconnect_pause: Duration::from_secs(1),
            single_shot: true,
            handback_fields: Vec::new(),
        }
    }
}

impl From<&GatewayConfig> for ExchangePolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_connect_attempts: config.max_connect_attempts,
            reconnect_pause: config.reconnect_pause(),
            single_shot: config.single_shot,
            handback_fields: config.handback_fields.clone(),
        }
    }
}

/// What one exchange produced.
///
/// `response` is set on success and `error` when a failure is surfaced.
/// Both stay `None` in two already-logged quiet cases: the pool had no
/// channel to lend, or connecting failed with connection-failure handling
/// disabled.
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub request: IsoMsg,
    pub response: Option<IsoMsg>,
    pub error: Option<LinkError>,
}

/// Runs exchanges against a [`ChannelPool`] under an [`ExchangePolicy`].
#[derive(Clone)]
pub struct ExchangeTask {
    pool: Arc<ChannelPool>,
    metrics: Arc<GatewayMetrics>,
    policy: ExchangePolicy,
}

impl ExchangeTask {
    pub fn new(pool: Arc<ChannelPool>, metrics: Arc<GatewayMetrics>, policy: ExchangePolicy) -> Self {
        Self {
            pool,
            metrics,
            policy,
        }
    }

    pub(crate) fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs one exchange to completion. The borrowed channel is returned to
    /// the pool on every path out of this function.
    ///
    /// `connect_signal`, when present, resolves as soon as the connect
    /// outcome is known: `Ok` once the channel is connected, `Err` when
    /// connecting was given up under `handle_connection_errors`. It is
    /// dropped unresolved on a pool miss.
    pub async fn execute(
        &self,
        request: IsoMsg,
        handle_connection_errors: bool,
        mut connect_signal: Option<oneshot::Sender<Result<(), LinkError>>>,
    ) -> ExchangeOutcome {
        let exchange_id = ExchangeId::new();

        let mut channel = match self.pool.acquire() {
            Ok(channel) => channel,
            Err(e) => {
                self.metrics.record_pool_miss();
                warn!(exchange_id = %exchange_id, error = %e, "no channel available for exchange");
                return ExchangeOutcome {
                    request,
                    response: None,
                    error: None,
                };
            }
        };

        let handback = if self.policy.handback_fields.is_empty() {
            None
        } else {
            Some(request.clone_fields(&self.policy.handback_fields))
        };

        let mut response: Option<IsoMsg> = None;
        let mut error: Option<LinkError> = None;

        let mut attempts = 0u32;
        while !channel.is_connected() && attempts < self.policy.max_connect_attempts {
            attempts += 1;
            match channel.connect().await {
                Ok(()) => {
                    if !channel.is_connected() {
                        tokio::time::sleep(self.policy.reconnect_pause).await;
                    }
                }
                Err(e) => {
                    self.metrics.record_cnx_failed();
                    debug!(
                        exchange_id = %exchange_id,
                        attempt = attempts,
                        error = %e,
                        "connect attempt failed"
                    );
                    if handle_connection_errors {
                        error = Some(LinkError::connection_failure(e));
                        break;
                    }
                    tokio::time::sleep(self.policy.reconnect_pause).await;
                }
            }
        }

        if channel.is_connected() {
            self.metrics.record_cnx_success();
            if let Some(signal) = connect_signal.take() {
                let _ = signal.send(Ok(()));
            }
            match self.exchange(channel.as_mut(), &request).await {
                Ok(mut reply) => {
                    if let Some(handback) = &handback {
                        reply.merge(handback);
                    }
                    self.metrics.record_exchange_completed();
                    debug!(exchange_id = %exchange_id, response = %reply, "exchange complete");
                    response = Some(reply);
                }
                Err(e) => {
                    self.metrics.record_exchange_failed();
                    warn!(exchange_id = %exchange_id, error = %e, "exchange failed after connect");
                    error = Some(LinkError::Exchange(e));
                }
            }
        } else {
            self.metrics.record_cnx_failed();
            warn!(
                exchange_id = %exchange_id,
                attempts,
                "never reached connected state"
            );
            if handle_connection_errors && error.is_none() {
                error = Some(LinkError::connection_exhausted());
            }
        }

        if let (Some(signal), Some(e)) = (connect_signal.take(), error.as_ref()) {
            if e.is_connection_failure() {
                let _ = signal.send(Err(e.clone()));
            }
        }

        self.pool.release(channel).await;

        ExchangeOutcome {
            request,
            response,
            error,
        }
    }

    async fn exchange(
        &self,
        channel: &mut dyn MsgChannel,
        request: &IsoMsg,
    ) -> Result<IsoMsg, ChannelError> {
        channel.send(request).await?;
        let reply = channel.receive().await?;
        if self.policy.single_shot {
            if let Err(e) = channel.disconnect().await {
                debug!(error = %e, "post-exchange disconnect failed");
            }
        }
        Ok(reply)
    }
}
