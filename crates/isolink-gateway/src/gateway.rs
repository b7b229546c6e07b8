//! The pooled channel gateway.
//!
//! A [`ChannelGateway`] owns a bounded pool of channels to one endpoint, a
//! pair of bounded queues, and a [`MessageDispatcher`] draining the inbound
//! queue. It registers itself in a [`ChannelRegistry`] under its configured
//! name so routers can resolve it at request time.
//!
//! Two request paths exist. [`submit`](ChannelGateway::submit) launches an
//! exchange and returns a [`ReplyHandle`] correlated with that exact
//! request. The [`RequestChannel`] `send`/`receive` pair is uncorrelated:
//! responses surface on the outbound queue in completion order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flume::{Receiver, Sender};
use isolink_channel::channel::RequestChannel;
use isolink_channel::factory::ChannelFactory;
use isolink_channel::registry::ChannelRegistry;
use isolink_core::config::GatewayConfig;
use isolink_core::error::LinkError;
use isolink_core::msg::IsoMsg;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dispatcher::MessageDispatcher;
use crate::metrics::{CounterSnapshot, GatewayMetrics};
use crate::pool::{ChannelPool, PoolConfig, PoolOccupancy};
use crate::task::{ExchangePolicy, ExchangeTask};

pub struct ChannelGateway {
    config: RwLock<GatewayConfig>,
    registry: Arc<ChannelRegistry>,
    factory: Arc<dyn ChannelFactory>,
    metrics: Arc<GatewayMetrics>,
    in_tx: Sender<IsoMsg>,
    in_rx: Receiver<IsoMsg>,
    out_tx: Sender<IsoMsg>,
    out_rx: Receiver<IsoMsg>,
    pool: RwLock<Option<Arc<ChannelPool>>>,
    task: RwLock<Option<ExchangeTask>>,
    dispatcher: RwLock<Option<Arc<MessageDispatcher>>>,
}

impl ChannelGateway {
    pub fn new(
        config: GatewayConfig,
        registry: Arc<ChannelRegistry>,
        factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        let (in_tx, in_rx) = flume::bounded(config.queue_capacity);
        let (out_tx, out_rx) = flume::bounded(config.queue_capacity);
        Self {
            config: RwLock::new(config),
            registry,
            factory,
            metrics: Arc::new(GatewayMetrics::new()),
            in_tx,
            in_rx,
            out_tx,
            out_rx,
            pool: RwLock::new(None),
            task: RwLock::new(None),
            dispatcher: RwLock::new(None),
        }
    }

    /// Builds the pool, starts the dispatcher, and registers the gateway
    /// under its configured name. No-op when already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), LinkError> {
        let config = self.config.read().clone();
        config.validate()?;

        if self.is_started() {
            debug!(gateway = %config.name, "start called while already running");
            return Ok(());
        }

        let mut pool_config = PoolConfig::sized(config.max_connections);
        pool_config.disconnect_on_release = config.single_shot;
        let pool = Arc::new(ChannelPool::new(
            Arc::clone(&self.factory),
            config.channel.clone(),
            pool_config,
        ));
        pool.start_evictor();

        let task = ExchangeTask::new(
            Arc::clone(&pool),
            Arc::clone(&self.metrics),
            ExchangePolicy::from(&config),
        );

        let dispatcher = Arc::new(MessageDispatcher::new(
            task.clone(),
            self.in_rx.clone(),
            self.out_tx.clone(),
            config.poll_timeout(),
            config.shutdown_grace(),
        ));
        dispatcher.start();

        *self.pool.write() = Some(pool);
        *self.task.write() = Some(task);
        *self.dispatcher.write() = Some(dispatcher);

        self.registry
            .register(config.name.clone(), Arc::clone(self) as Arc<dyn RequestChannel>);
        info!(
            gateway = %config.name,
            space = %config.space,
            in_queue = %config.in_queue,
            out_queue = %config.out_queue,
            "gateway started"
        );
        Ok(())
    }

    /// Deregisters the gateway, stops the dispatcher, and closes the pool.
    /// A dispatcher shutdown timeout is reported only after the rest of the
    /// teardown has completed.
    pub async fn stop(&self) -> Result<(), LinkError> {
        let name = self.config.read().name.clone();
        self.registry.unregister(&name);

        let dispatcher = self.dispatcher.write().take();
        let stop_result = match &dispatcher {
            Some(dispatcher) => dispatcher.stop().await,
            None => Ok(()),
        };

        if let Some(pool) = self.pool.write().take() {
            pool.close().await;
        }
        *self.task.write() = None;

        info!(gateway = %name, "gateway stopped");
        stop_result
    }

    /// Removes any residual registration. Safe to call repeatedly or after
    /// [`stop`](Self::stop).
    pub fn destroy(&self) {
        let name = self.config.read().name.clone();
        self.registry.unregister(&name);
    }

    pub fn is_started(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Launches one exchange and returns a handle correlated with it.
    pub fn submit(&self, request: IsoMsg) -> Result<ReplyHandle, LinkError> {
        let task = self.task.read().clone().ok_or(LinkError::NotStarted)?;
        let handle_errors = self.config.read().handle_connection_errors;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            let outcome = task.execute(request, handle_errors, None).await;
            let _ = outcome_tx.send(outcome);
        });
        Ok(ReplyHandle {
            outcome: outcome_rx,
            task: join,
        })
    }

    pub fn name(&self) -> String {
        self.config.read().name.clone()
    }

    pub fn space(&self) -> String {
        self.config.read().space.clone()
    }

    /// Producer handle for the inbound queue the dispatcher drains.
    pub fn sender(&self) -> Sender<IsoMsg> {
        self.in_tx.clone()
    }

    pub fn host(&self) -> String {
        self.config.read().channel.host.clone()
    }

    /// Persists a new endpoint host into the live configuration; channels
    /// built after the next start use it.
    pub fn set_host(&self, host: impl Into<String>) {
        self.config.write().channel.host = host.into();
    }

    pub fn port(&self) -> u16 {
        self.config.read().channel.port
    }

    pub fn set_port(&self, port: u16) {
        self.config.write().channel.port = port;
    }

    pub fn socket_factory(&self) -> String {
        self.config.read().channel.connector.clone()
    }

    pub fn set_socket_factory(&self, kind: impl Into<String>) {
        self.config.write().channel.connector = kind.into();
    }

    pub fn cnx_success_count(&self) -> u64 {
        self.metrics.get_cnx_success()
    }

    pub fn cnx_failed_count(&self) -> u64 {
        self.metrics.get_cnx_failed()
    }

    pub fn counter_snapshot(&self) -> CounterSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_counters(&self) {
        self.metrics.reset_counters();
    }

    /// Pool occupancy, or `None` while the gateway is stopped.
    pub fn pool_occupancy(&self) -> Option<PoolOccupancy> {
        self.pool.read().as_ref().map(|pool| pool.occupancy())
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }
}

#[async_trait]
impl RequestChannel for ChannelGateway {
    /// Fire-and-forget send: the exchange runs in the background and its
    /// response, if any, lands on the outbound queue.
    ///
    /// With `handle_connection_errors` enabled the call waits until the
    /// connect outcome is known and surfaces a connection failure, which is
    /// what lets a router fail over to another candidate. A pool miss stays
    /// quiet either way.
    async fn send(&self, request: IsoMsg) -> Result<(), LinkError> {
        let task = self.task.read().clone().ok_or(LinkError::NotStarted)?;
        let handle_errors = self.config.read().handle_connection_errors;
        let out_tx = self.out_tx.clone();
        let metrics = Arc::clone(&self.metrics);

        let (connect_tx, connect_rx) = if handle_errors {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        tokio::spawn(async move {
            let outcome = task.execute(request, handle_errors, connect_tx).await;
            if let Some(response) = outcome.response {
                if out_tx.send_async(response).await.is_ok() {
                    metrics.record_response_published();
                } else {
                    warn!("outbound queue rejected response");
                }
            } else if let Some(error) = outcome.error {
                debug!(error = %error, "direct send produced no response");
            }
        });

        match connect_rx {
            None => Ok(()),
            Some(rx) => match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(error),
                // sender dropped without a verdict: pool miss, already logged
                Err(_) => Ok(()),
            },
        }
    }

    /// Waits on the outbound queue for up to `wait`. Returns `None` on an
    /// empty queue; a zero wait is a non-blocking poll.
    async fn receive(&self, wait: Duration) -> Option<IsoMsg> {
        match timeout(wait, self.out_rx.recv_async()).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => {
                debug!("outbound queue disconnected");
                None
            }
            Err(_) => {
                debug!(wait_ms = wait.as_millis() as u64, "no response available");
                None
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.is_started()
    }
}

/// Handle to one in-flight exchange launched by
/// [`ChannelGateway::submit`].
pub struct ReplyHandle {
    outcome: oneshot::Receiver<crate::task::ExchangeOutcome>,
    task: JoinHandle<()>,
}

impl ReplyHandle {
    /// Waits for the exchange to finish.
    ///
    /// Returns `Ok(Some(response))` on success and `Ok(None)` when there is
    /// nothing to deliver: a pool miss, a suppressed failure, or an elapsed
    /// wait bound. A timed-out wait cancels the exchange. The only `Err` is
    /// a connection failure surfaced under connection-failure handling.
    pub async fn wait(self, wait_bound: Option<Duration>) -> Result<Option<IsoMsg>, LinkError> {
        let received = match wait_bound {
            Some(bound) => match timeout(bound, self.outcome).await {
                Ok(received) => received,
                Err(_) => {
                    self.task.abort();
                    debug!("reply wait timed out, exchange cancelled");
                    return Ok(None);
                }
            },
            None => self.outcome.await,
        };

        match received {
            Err(_) => {
                warn!("exchange finished without reporting an outcome");
                Ok(None)
            }
            Ok(outcome) => match (outcome.response, outcome.error) {
                (Some(response), _) => Ok(Some(response)),
                (None, Some(error)) if error.is_connection_failure() => Err(error),
                (None, Some(error)) => {
                    warn!(error = %error, "exchange failed");
                    Ok(None)
                }
                (None, None) => Ok(None),
            },
        }
    }

    /// Cancels the exchange without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
