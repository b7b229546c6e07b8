//! Bounded channel pool.
//!
//! Channels are borrowed for the duration of one exchange and returned
//! afterwards. Acquisition is fail-fast: when every slot is on loan the
//! caller gets [`LinkError::PoolExhausted`] immediately instead of queueing.
//! A background sweep evicts channels that sit idle past the configured
//! bound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use isolink_channel::channel::MsgChannel;
use isolink_channel::factory::ChannelFactory;
use isolink_core::config::ChannelConfig;
use isolink_core::error::LinkError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::PoolMetrics;

/// Sizing and eviction policy for a [`ChannelPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on concurrently borrowed channels
    pub max_active: usize,
    /// Idle queue ceiling; releases beyond it discard the channel
    pub max_idle: usize,
    /// Idle floor the eviction sweep never goes below
    pub min_idle: usize,
    /// How long a channel must sit idle before it is evictable
    pub min_evictable_idle: Duration,
    /// Interval between eviction sweeps
    pub eviction_interval: Duration,
    /// Upper bound on evictions per sweep
    pub evictions_per_run: usize,
    /// Disconnect channels as they are returned to the pool
    pub disconnect_on_release: bool,
}

impl PoolConfig {
    /// Derives the policy from the connection bound: idle ceiling at half the
    /// bound, idle floor at a quarter (both rounded up), two-minute idle
    /// eligibility checked every minute, at most `max_active` evictions per
    /// sweep.
    pub fn sized(max_active: usize) -> Self {
        let max_active = max_active.max(1);
        Self {
            max_active,
            max_idle: max_active.div_ceil(2),
            min_idle: max_active.div_ceil(4),
            min_evictable_idle: Duration::from_secs(120),
            eviction_interval: Duration::from_secs(60),
            evictions_per_run: max_active,
            disconnect_on_release: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::sized(1)
    }
}

/// Occupancy snapshot for the management surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolOccupancy {
    pub borrowed: usize,
    pub idle: usize,
    pub max_active: usize,
    pub max_idle: usize,
    pub min_idle: usize,
}

struct IdleChannel {
    channel: Box<dyn MsgChannel>,
    idle_since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleChannel>,
    borrowed: usize,
}

pub struct ChannelPool {
    factory: Arc<dyn ChannelFactory>,
    channel_config: ChannelConfig,
    config: PoolConfig,
    state: Mutex<PoolState>,
    closed: AtomicBool,
    evictor: RwLock<Option<JoinHandle<()>>>,
    metrics: Arc<PoolMetrics>,
}

impl ChannelPool {
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        channel_config: ChannelConfig,
        config: PoolConfig,
    ) -> Self {
        Self {
            factory,
            channel_config,
            config,
            state: Mutex::new(PoolState::default()),
            closed: AtomicBool::new(false),
            evictor: RwLock::new(None),
            metrics: Arc::new(PoolMetrics::new()),
        }
    }

    /// Borrows a channel, reusing the longest-idle instance or building a new
    /// one while capacity remains. Never waits: a full pool is an immediate
    /// [`LinkError::PoolExhausted`].
    pub fn acquire(&self) -> Result<Box<dyn MsgChannel>, LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::PoolClosed);
        }

        {
            let mut state = self.state.lock();
            if let Some(idle) = state.idle.pop_front() {
                state.borrowed += 1;
                self.record_occupancy(&state);
                return Ok(idle.channel);
            }
            if state.borrowed >= self.config.max_active {
                return Err(LinkError::PoolExhausted {
                    borrowed: state.borrowed,
                    max: self.config.max_active,
                });
            }
            // reserve the slot before building outside the lock
            state.borrowed += 1;
            self.record_occupancy(&state);
        }

        match self.factory.create(&self.channel_config) {
            Ok(channel) => {
                self.metrics.record_channel_created();
                debug!("built new pooled channel");
                Ok(channel)
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.borrowed = state.borrowed.saturating_sub(1);
                self.record_occupancy(&state);
                Err(e)
            }
        }
    }

    /// Returns a borrowed channel. Under the default policy the channel is
    /// disconnected first; disconnect errors are logged, never propagated.
    /// The channel is discarded instead of parked when the pool is closed or
    /// the idle queue is at its ceiling.
    pub async fn release(&self, mut channel: Box<dyn MsgChannel>) {
        if self.config.disconnect_on_release {
            if let Err(e) = channel.disconnect().await {
                warn!(error = %e, "disconnect on release failed");
            }
        }

        let mut state = self.state.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
        if self.closed.load(Ordering::SeqCst) || state.idle.len() >= self.config.max_idle {
            self.metrics.record_channel_discarded();
            debug!("released channel discarded");
        } else {
            state.idle.push_back(IdleChannel {
                channel,
                idle_since: Instant::now(),
            });
        }
        self.record_occupancy(&state);
    }

    /// Starts the periodic idle-eviction sweep.
    pub fn start_evictor(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let interval = self.config.eviction_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                pool.evict_idle().await;
            }
        });
        *self.evictor.write() = Some(task);
    }

    /// One sweep: drop idle channels unused past the idle bound, oldest
    /// first, keeping the idle floor and capping the work per sweep.
    async fn evict_idle(&self) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            loop {
                if evicted.len() >= self.config.evictions_per_run
                    || state.idle.len() <= self.config.min_idle
                {
                    break;
                }
                let eligible = state
                    .idle
                    .front()
                    .map(|idle| idle.idle_since.elapsed() >= self.config.min_evictable_idle)
                    .unwrap_or(false);
                if !eligible {
                    break;
                }
                if let Some(idle) = state.idle.pop_front() {
                    evicted.push(idle.channel);
                }
            }
            if !evicted.is_empty() {
                self.record_occupancy(&state);
            }
        }

        let count = evicted.len();
        for mut channel in evicted {
            if let Err(e) = channel.disconnect().await {
                debug!(error = %e, "disconnect on eviction failed");
            }
            self.metrics.record_channel_evicted();
        }
        if count > 0 {
            debug!(evicted = count, "idle sweep complete");
        }
    }

    /// Closes the pool: stops the evictor, discards every idle channel, and
    /// fails all subsequent acquires.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        if let Some(task) = self.evictor.write().take() {
            task.abort();
            let _ = task.await;
        }

        let drained: Vec<Box<dyn MsgChannel>> = {
            let mut state = self.state.lock();
            state.borrowed = 0;
            state.idle.drain(..).map(|idle| idle.channel).collect()
        };

        let count = drained.len();
        for mut channel in drained {
            if let Err(e) = channel.disconnect().await {
                debug!(error = %e, "disconnect on close failed");
            }
            self.metrics.record_channel_discarded();
        }
        self.metrics.record_occupancy(0, 0);
        info!(discarded = count, "channel pool closed");
    }

    pub fn occupancy(&self) -> PoolOccupancy {
        let state = self.state.lock();
        PoolOccupancy {
            borrowed: state.borrowed,
            idle: state.idle.len(),
            max_active: self.config.max_active,
            max_idle: self.config.max_idle,
            min_idle: self.config.min_idle,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }

    fn record_occupancy(&self, state: &PoolState) {
        self.metrics.record_occupancy(state.borrowed, state.idle.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ChannelScript, ScriptedFactory};

    fn pool_with(config: PoolConfig) -> (ChannelPool, Arc<ScriptedFactory>) {
        let factory = Arc::new(ScriptedFactory::new(ChannelScript::default()));
        let pool = ChannelPool::new(
            Arc::clone(&factory) as Arc<dyn ChannelFactory>,
            ChannelConfig::default(),
            config,
        );
        (pool, factory)
    }

    #[test]
    fn test_sized_policy() {
        let policy = PoolConfig::sized(5);
        assert_eq!(policy.max_active, 5);
        assert_eq!(policy.max_idle, 3);
        assert_eq!(policy.min_idle, 2);
        assert_eq!(policy.evictions_per_run, 5);
        assert!(policy.disconnect_on_release);

        let single = PoolConfig::sized(1);
        assert_eq!(single.max_active, 1);
        assert_eq!(single.max_idle, 1);
        assert_eq!(single.min_idle, 1);

        // zero is clamped to a usable pool
        assert_eq!(PoolConfig::sized(0).max_active, 1);
    }

    #[tokio::test]
    async fn test_acquire_fails_fast_at_capacity() {
        let (pool, _factory) = pool_with(PoolConfig::sized(2));

        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();

        match pool.acquire() {
            Err(LinkError::PoolExhausted { borrowed, max }) => {
                assert_eq!(borrowed, 2);
                assert_eq!(max, 2);
            }
            Ok(_) => panic!("expected PoolExhausted, got a channel"),
            Err(other) => panic!("expected PoolExhausted, got {other:?}"),
        }

        pool.release(first).await;
        pool.release(second).await;
        assert_eq!(pool.occupancy().borrowed, 0);
    }

    #[tokio::test]
    async fn test_released_channel_comes_back_disconnected() {
        let (pool, factory) = pool_with(PoolConfig::sized(1));
        let probe = factory.probe();

        let mut channel = pool.acquire().unwrap();
        channel.connect().await.unwrap();
        assert!(channel.is_connected());
        pool.release(channel).await;

        let channel = pool.acquire().unwrap();
        assert!(!channel.is_connected());
        assert!(probe.disconnect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_keep_alive_release_skips_disconnect() {
        let mut config = PoolConfig::sized(1);
        config.disconnect_on_release = false;
        let (pool, _factory) = pool_with(config);

        let mut channel = pool.acquire().unwrap();
        channel.connect().await.unwrap();
        pool.release(channel).await;

        let channel = pool.acquire().unwrap();
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_idle_reuse_skips_factory() {
        let (pool, factory) = pool_with(PoolConfig::sized(2));

        let channel = pool.acquire().unwrap();
        pool.release(channel).await;
        let _channel = pool.acquire().unwrap();

        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test]
    async fn test_release_beyond_idle_ceiling_discards() {
        // sized(4) gives an idle ceiling of 2
        let (pool, _factory) = pool_with(PoolConfig::sized(4));

        let channels: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        for channel in channels {
            pool.release(channel).await;
        }

        let occupancy = pool.occupancy();
        assert_eq!(occupancy.idle, 2);
        assert_eq!(occupancy.borrowed, 0);
        assert_eq!(pool.metrics().get_channels_discarded(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_fails_fast_and_discards_releases() {
        let (pool, _factory) = pool_with(PoolConfig::sized(2));

        let channel = pool.acquire().unwrap();
        pool.close().await;

        assert!(matches!(pool.acquire(), Err(LinkError::PoolClosed)));

        // an exchange finishing after close still hands its channel back
        pool.release(channel).await;
        assert_eq!(pool.occupancy().idle, 0);
    }

    #[tokio::test]
    async fn test_factory_error_rolls_back_reservation() {
        let factory = Arc::new(ScriptedFactory::failing());
        let pool = ChannelPool::new(
            Arc::clone(&factory) as Arc<dyn ChannelFactory>,
            ChannelConfig::default(),
            PoolConfig::sized(1),
        );

        assert!(pool.acquire().is_err());
        assert_eq!(pool.occupancy().borrowed, 0);
    }

    #[tokio::test]
    async fn test_eviction_respects_floor_and_batch_limit() {
        let config = PoolConfig {
            max_active: 4,
            max_idle: 4,
            min_idle: 1,
            min_evictable_idle: Duration::ZERO,
            eviction_interval: Duration::from_secs(3600),
            evictions_per_run: 1,
            disconnect_on_release: true,
        };
        let (pool, _factory) = pool_with(config);

        let channels: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        for channel in channels {
            pool.release(channel).await;
        }
        assert_eq!(pool.occupancy().idle, 3);

        pool.evict_idle().await;
        assert_eq!(pool.occupancy().idle, 2);

        pool.evict_idle().await;
        assert_eq!(pool.occupancy().idle, 1);

        // the floor holds
        pool.evict_idle().await;
        assert_eq!(pool.occupancy().idle, 1);
        assert_eq!(pool.metrics().get_channels_evicted(), 2);
    }

    #[tokio::test]
    async fn test_fresh_idle_channels_are_not_evicted() {
        let config = PoolConfig {
            max_active: 2,
            max_idle: 2,
            min_idle: 0,
            min_evictable_idle: Duration::from_secs(120),
            eviction_interval: Duration::from_secs(3600),
            evictions_per_run: 2,
            disconnect_on_release: true,
        };
        let (pool, _factory) = pool_with(config);

        let channel = pool.acquire().unwrap();
        pool.release(channel).await;

        pool.evict_idle().await;
        assert_eq!(pool.occupancy().idle, 1);
    }
}
