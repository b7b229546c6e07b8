//! Queue-driven dispatch loop.
//!
//! The dispatcher polls the inbound queue and runs one [`ExchangeTask`] per
//! request in its own tokio task, so a slow exchange never blocks the next
//! request from starting. Responses land on the outbound queue; failures are
//! logged and dropped here, connection-failure handling belongs to the
//! direct-send path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use isolink_core::error::LinkError;
use isolink_core::msg::IsoMsg;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::metrics::GatewayMetrics;
use crate::task::{ExchangeOutcome, ExchangeTask};

pub struct MessageDispatcher {
    task: ExchangeTask,
    in_rx: Receiver<IsoMsg>,
    out_tx: Sender<IsoMsg>,
    poll_timeout: Duration,
    shutdown_grace: Duration,
    running: Arc<AtomicBool>,
    loop_task: RwLock<Option<JoinHandle<()>>>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MessageDispatcher {
    pub fn new(
        task: ExchangeTask,
        in_rx: Receiver<IsoMsg>,
        out_tx: Sender<IsoMsg>,
        poll_timeout: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            task,
            in_rx,
            out_tx,
            poll_timeout,
            shutdown_grace,
            running: Arc::new(AtomicBool::new(false)),
            loop_task: RwLock::new(None),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Starts the poll loop. No-op when already running.
    pub fn start(&self) {
        if self.loop_task.read().is_some() {
            debug!("dispatcher already running");
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let in_rx = self.in_rx.clone();
        let out_tx = self.out_tx.clone();
        let task = self.task.clone();
        let metrics = self.task.metrics();
        let in_flight = Arc::clone(&self.in_flight);
        let poll_timeout = self.poll_timeout;

        let handle = tokio::spawn(async move {
            info!("dispatcher started");
            while running.load(Ordering::SeqCst) {
                match timeout(poll_timeout, in_rx.recv_async()).await {
                    // periodic wake to observe the stop flag
                    Err(_) => continue,
                    Ok(Err(_)) => {
                        debug!("inbound queue disconnected");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(Ok(request)) => {
                        let task = task.clone();
                        let out_tx = out_tx.clone();
                        let metrics = Arc::clone(&metrics);
                        let exchange = tokio::spawn(async move {
                            let outcome = task.execute(request, false, None).await;
                            Self::publish(outcome, &out_tx, &metrics).await;
                        });
                        let mut in_flight = in_flight.lock();
                        in_flight.retain(|handle| !handle.is_finished());
                        in_flight.push(exchange);
                    }
                }
            }
            info!("dispatcher loop exited");
        });
        *self.loop_task.write() = Some(handle);
    }

    async fn publish(outcome: ExchangeOutcome, out_tx: &Sender<IsoMsg>, metrics: &GatewayMetrics) {
        match (outcome.response, outcome.error) {
            (Some(response), _) => {
                if out_tx.send_async(response).await.is_ok() {
                    metrics.record_response_published();
                } else {
                    warn!("outbound queue rejected response");
                }
            }
            (None, Some(error)) => {
                warn!(request = %outcome.request, error = %error, "exchange ended in error");
            }
            (None, None) => {
                debug!(request = %outcome.request, "exchange produced no response");
            }
        }
    }

    /// Stops the loop and waits out the grace period for in-flight
    /// exchanges. Exchanges still running when the grace period lapses are
    /// aborted and reported through [`LinkError::ShutdownTimeout`].
    pub async fn stop(&self) -> Result<(), LinkError> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(mut handle) = self.loop_task.write().take() {
            // the loop notices the flag within one poll interval
            if timeout(self.poll_timeout + Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        let handles: Vec<JoinHandle<()>> = self.in_flight.lock().drain(..).collect();
        let deadline = Instant::now() + self.shutdown_grace;
        let mut abandoned = 0usize;

        for mut handle in handles {
            if handle.is_finished() {
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                abandoned += 1;
            }
        }

        if abandoned > 0 {
            warn!(abandoned, "grace period elapsed with exchanges still running");
            return Err(LinkError::ShutdownTimeout {
                grace_secs: self.shutdown_grace.as_secs(),
                remaining: abandoned,
            });
        }
        info!("dispatcher shut down cleanly");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests waiting on the inbound queue.
    pub fn pending_count(&self) -> usize {
        self.in_rx.len()
    }
}
