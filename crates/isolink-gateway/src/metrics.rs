//! Metrics for the gateway, its channel pool, and the router.
//!
//! Counters are mirrored in local atomics so the management surface can read
//! them without going through the metrics recorder, and exported through the
//! `metrics` facade for Prometheus scraping.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Administrative counter snapshot taken by [`GatewayMetrics::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Connect attempts that reached the connected state
    pub success: u64,
    /// Connect attempts that failed
    pub failed: u64,
    /// When the counters were last reset (gateway start if never)
    pub since: DateTime<Utc>,
}

/// Per-gateway counters.
#[derive(Debug)]
pub struct GatewayMetrics {
    cnx_success: AtomicU64,
    cnx_failed: AtomicU64,
    exchanges_completed: AtomicU64,
    exchanges_failed: AtomicU64,
    pool_misses: AtomicU64,
    responses_published: AtomicU64,
    reset_at: RwLock<DateTime<Utc>>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "gateway_cnx_success_total",
            "Connect attempts that reached the connected state"
        );
        describe_counter!("gateway_cnx_failed_total", "Connect attempts that failed");
        describe_counter!(
            "gateway_exchanges_completed_total",
            "Exchanges that produced a response"
        );
        describe_counter!(
            "gateway_exchanges_failed_total",
            "Exchanges that failed after the channel connected"
        );
        describe_counter!(
            "gateway_pool_misses_total",
            "Exchanges that could not borrow a channel from the pool"
        );
        describe_counter!(
            "gateway_responses_published_total",
            "Responses delivered to the outbound queue"
        );

        Self {
            cnx_success: AtomicU64::new(0),
            cnx_failed: AtomicU64::new(0),
            exchanges_completed: AtomicU64::new(0),
            exchanges_failed: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            responses_published: AtomicU64::new(0),
            reset_at: RwLock::new(Utc::now()),
        }
    }

    pub fn record_cnx_success(&self) {
        self.cnx_success.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_cnx_success_total").increment(1);
    }

    pub fn record_cnx_failed(&self) {
        self.cnx_failed.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_cnx_failed_total").increment(1);
    }

    pub fn record_exchange_completed(&self) {
        self.exchanges_completed.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_exchanges_completed_total").increment(1);
    }

    pub fn record_exchange_failed(&self) {
        self.exchanges_failed.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_exchanges_failed_total").increment(1);
    }

    pub fn record_pool_miss(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_pool_misses_total").increment(1);
    }

    pub fn record_response_published(&self) {
        self.responses_published.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_responses_published_total").increment(1);
    }

    pub fn get_cnx_success(&self) -> u64 {
        self.cnx_success.load(Ordering::Relaxed)
    }

    pub fn get_cnx_failed(&self) -> u64 {
        self.cnx_failed.load(Ordering::Relaxed)
    }

    pub fn get_exchanges_completed(&self) -> u64 {
        self.exchanges_completed.load(Ordering::Relaxed)
    }

    pub fn get_exchanges_failed(&self) -> u64 {
        self.exchanges_failed.load(Ordering::Relaxed)
    }

    pub fn get_pool_misses(&self) -> u64 {
        self.pool_misses.load(Ordering::Relaxed)
    }

    pub fn get_responses_published(&self) -> u64 {
        self.responses_published.load(Ordering::Relaxed)
    }

    /// Zeroes the administrative connect counters and stamps the reset time.
    /// Exchange counters keep accumulating; only the connect pair is part of
    /// the resettable management surface.
    pub fn reset_counters(&self) {
        self.cnx_success.store(0, Ordering::Relaxed);
        self.cnx_failed.store(0, Ordering::Relaxed);
        *self.reset_at.write() = Utc::now();
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            success: self.get_cnx_success(),
            failed: self.get_cnx_failed(),
            since: *self.reset_at.read(),
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel pool counters and occupancy gauges.
#[derive(Debug)]
pub struct PoolMetrics {
    channels_created: AtomicU64,
    channels_evicted: AtomicU64,
    channels_discarded: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "pool_channels_created_total",
            "Channel instances built by the factory"
        );
        describe_counter!(
            "pool_channels_evicted_total",
            "Idle channels removed by the eviction sweep"
        );
        describe_counter!(
            "pool_channels_discarded_total",
            "Released channels dropped instead of returned to the idle queue"
        );
        describe_gauge!("pool_channels_borrowed", "Channels currently on loan");
        describe_gauge!("pool_channels_idle", "Channels parked in the idle queue");

        Self {
            channels_created: AtomicU64::new(0),
            channels_evicted: AtomicU64::new(0),
            channels_discarded: AtomicU64::new(0),
        }
    }

    pub fn record_channel_created(&self) {
        self.channels_created.fetch_add(1, Ordering::Relaxed);
        counter!("pool_channels_created_total").increment(1);
    }

    pub fn record_channel_evicted(&self) {
        self.channels_evicted.fetch_add(1, Ordering::Relaxed);
        counter!("pool_channels_evicted_total").increment(1);
    }

    pub fn record_channel_discarded(&self) {
        self.channels_discarded.fetch_add(1, Ordering::Relaxed);
        counter!("pool_channels_discarded_total").increment(1);
    }

    pub fn record_occupancy(&self, borrowed: usize, idle: usize) {
        gauge!("pool_channels_borrowed").set(borrowed as f64);
        gauge!("pool_channels_idle").set(idle as f64);
    }

    pub fn get_channels_created(&self) -> u64 {
        self.channels_created.load(Ordering::Relaxed)
    }

    pub fn get_channels_evicted(&self) -> u64 {
        self.channels_evicted.load(Ordering::Relaxed)
    }

    pub fn get_channels_discarded(&self) -> u64 {
        self.channels_discarded.load(Ordering::Relaxed)
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Router counters.
#[derive(Debug)]
pub struct RouterMetrics {
    requests: AtomicU64,
    routed: AtomicU64,
    exhausted: AtomicU64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        describe_counter!("router_requests_total", "Requests handed to the router");
        describe_counter!(
            "router_routed_total",
            "Requests accepted by a candidate channel"
        );
        describe_counter!(
            "router_exhausted_total",
            "Requests no candidate accepted before the deadline"
        );

        Self {
            requests: AtomicU64::new(0),
            routed: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!("router_requests_total").increment(1);
    }

    pub fn record_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
        counter!("router_routed_total").increment(1);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
        counter!("router_exhausted_total").increment(1);
    }

    pub fn get_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn get_routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn get_exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Prometheus exporter.
///
/// [`install`](Self::install) serves the scrape endpoint on the configured
/// address and must be called from inside a tokio runtime.
/// [`install_recorder`](Self::install_recorder) skips the listener; the
/// scrape text is then available through [`render`](Self::render) for
/// embedding in an existing admin surface.
pub struct MetricsExporter {
    config: MetricsConfig,
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    pub fn install(&mut self) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!("metrics exporter disabled");
            return Ok(());
        }
        let addr: SocketAddr = self.config.bind_address.parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(bind_address = %addr, "prometheus exporter listening");
        Ok(())
    }

    pub fn install_recorder(&mut self) -> anyhow::Result<()> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|handle| handle.render())
    }
}
