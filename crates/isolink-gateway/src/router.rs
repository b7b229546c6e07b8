//! Deadline-bounded routing across named channels.
//!
//! A [`ChannelRouter`] owns no connections. Candidates are names resolved
//! against the [`ChannelRegistry`] at request time, so a gateway restarted
//! or swapped under the same name is picked up on the very next request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use isolink_channel::channel::RequestChannel;
use isolink_channel::registry::ChannelRegistry;
use isolink_core::config::{RouteStrategy, RouterConfig};
use isolink_core::error::LinkError;
use isolink_core::msg::IsoMsg;
use tracing::{debug, warn};

use crate::metrics::RouterMetrics;

pub struct ChannelRouter {
    name: String,
    channels: Vec<String>,
    strategy: RouteStrategy,
    retry_pause: Duration,
    registry: Arc<ChannelRegistry>,
    sequence: AtomicU64,
    metrics: Arc<RouterMetrics>,
}

impl ChannelRouter {
    pub fn new(config: RouterConfig, registry: Arc<ChannelRegistry>) -> Self {
        let retry_pause = config.retry_pause();
        Self {
            name: config.name,
            channels: config.channels,
            strategy: config.strategy,
            retry_pause,
            registry,
            sequence: AtomicU64::new(0),
            metrics: Arc::new(RouterMetrics::new()),
        }
    }

    /// Sends through the first candidate that accepts, then waits out the
    /// remainder of the deadline for its reply.
    ///
    /// Candidates that are unregistered, refuse the connection, or fail the
    /// send are skipped with a fixed pause before the next one. `None` means
    /// no candidate accepted in time, the reply did not arrive, or the
    /// accepted channel had nothing to return.
    pub async fn request(&self, request: IsoMsg, deadline: Duration) -> Option<IsoMsg> {
        self.metrics.record_request();
        let deadline_at = Instant::now() + deadline;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) as usize;
        let count = self.channels.len();

        let mut selected: Option<Arc<dyn RequestChannel>> = None;
        let mut position = 0usize;

        while selected.is_none() && position < count && Instant::now() < deadline_at {
            let index = match self.strategy {
                RouteStrategy::PrimarySecondary => position,
                RouteStrategy::RoundRobin => (sequence + position) % count,
            };
            let name = &self.channels[index];

            match self.registry.lookup(name) {
                None => {
                    debug!(router = %self.name, channel = %name, "candidate not registered");
                }
                Some(channel) => match channel.send(request.clone()).await {
                    Ok(()) => {
                        debug!(router = %self.name, channel = %name, "candidate accepted send");
                        selected = Some(channel);
                    }
                    Err(e) if e.is_connection_failure() => {
                        warn!(router = %self.name, channel = %name, error = %e, "candidate refused connection");
                    }
                    Err(e) => {
                        warn!(router = %self.name, channel = %name, error = %e, "candidate send failed");
                    }
                },
            }

            if selected.is_none() {
                position += 1;
                if position < count && Instant::now() < deadline_at {
                    tokio::time::sleep(self.retry_pause).await;
                }
            }
        }

        let Some(channel) = selected else {
            self.metrics.record_exhausted();
            warn!(
                router = %self.name,
                deadline_ms = deadline.as_millis() as u64,
                error = %LinkError::RoutingExhausted,
                "request not routed"
            );
            return None;
        };

        self.metrics.record_routed();
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(router = %self.name, "deadline elapsed before receive");
            return None;
        }
        channel.receive(remaining).await
    }

    /// True when at least one candidate name currently resolves in the
    /// registry. This is a registration-presence check, not a socket probe.
    pub fn is_connected(&self) -> bool {
        self.channels
            .iter()
            .any(|name| self.registry.is_registered(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> RouteStrategy {
        self.strategy
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channels
    }

    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedEndpoint;
    use parking_lot::Mutex;

    fn reply_with_stan(stan: &str) -> IsoMsg {
        IsoMsg::with_mti("0210").with_field(11, stan).with_field(39, "00")
    }

    fn router_with(
        endpoints: Vec<(&str, Arc<ScriptedEndpoint>)>,
        strategy: RouteStrategy,
        retry_pause_secs: u64,
    ) -> (ChannelRouter, Arc<ChannelRegistry>) {
        let registry = Arc::new(ChannelRegistry::new());
        let mut names = Vec::new();
        for (name, endpoint) in endpoints {
            names.push(name.to_string());
            registry.register(name, endpoint as Arc<dyn RequestChannel>);
        }
        let config = RouterConfig {
            name: "mux".to_string(),
            channels: names,
            strategy,
            retry_pause_secs,
        };
        let router = ChannelRouter::new(config, Arc::clone(&registry));
        (router, registry)
    }

    #[tokio::test]
    async fn test_primary_secondary_always_tries_the_primary_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let primary = Arc::new(ScriptedEndpoint::accepting(
            "primary",
            Some(reply_with_stan("000001")),
            Arc::clone(&log),
        ));
        let backup = Arc::new(ScriptedEndpoint::accepting(
            "backup",
            Some(reply_with_stan("000002")),
            Arc::clone(&log),
        ));
        let (router, _registry) = router_with(
            vec![("primary", primary), ("backup", Arc::clone(&backup))],
            RouteStrategy::PrimarySecondary,
            0,
        );

        for _ in 0..3 {
            let response = router
                .request(IsoMsg::with_mti("0200"), Duration::from_secs(1))
                .await
                .expect("no response");
            assert_eq!(response.get(11), Some("000001"));
        }

        assert_eq!(*log.lock(), vec!["primary", "primary", "primary"]);
        assert_eq!(backup.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_round_robin_rotates_with_the_sequence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let endpoints: Vec<(&str, Arc<ScriptedEndpoint>)> = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|name| {
                let endpoint = Arc::new(ScriptedEndpoint::accepting(
                    name,
                    Some(reply_with_stan("000001")),
                    Arc::clone(&log),
                ));
                (name, endpoint)
            })
            .collect();
        let (router, _registry) = router_with(endpoints, RouteStrategy::RoundRobin, 0);

        for _ in 0..3 {
            router
                .request(IsoMsg::with_mti("0200"), Duration::from_secs(1))
                .await
                .expect("no response");
        }

        assert_eq!(*log.lock(), vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_round_robin_wraps_within_one_request() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let down = Arc::new(ScriptedEndpoint::refusing("down", Arc::clone(&log)));
        let up = Arc::new(ScriptedEndpoint::accepting(
            "up",
            Some(reply_with_stan("000001")),
            Arc::clone(&log),
        ));
        let (router, _registry) = router_with(
            vec![("down", down), ("up", up)],
            RouteStrategy::RoundRobin,
            0,
        );

        let response = router
            .request(IsoMsg::with_mti("0200"), Duration::from_secs(1))
            .await;
        assert!(response.is_some());
        assert_eq!(*log.lock(), vec!["down", "up"]);
    }

    #[tokio::test]
    async fn test_failover_skips_refusing_candidates_and_stops_at_the_winner() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(ScriptedEndpoint::refusing("first", Arc::clone(&log)));
        let second = Arc::new(ScriptedEndpoint::refusing("second", Arc::clone(&log)));
        let third = Arc::new(ScriptedEndpoint::accepting(
            "third",
            Some(reply_with_stan("000033")),
            Arc::clone(&log),
        ));
        let fourth = Arc::new(ScriptedEndpoint::accepting(
            "fourth",
            Some(reply_with_stan("000044")),
            Arc::clone(&log),
        ));
        let (router, _registry) = router_with(
            vec![
                ("first", first),
                ("second", second),
                ("third", third),
                ("fourth", Arc::clone(&fourth)),
            ],
            RouteStrategy::PrimarySecondary,
            0,
        );

        let response = router
            .request(IsoMsg::with_mti("0200"), Duration::from_secs(1))
            .await
            .expect("no response");

        assert_eq!(response.get(11), Some("000033"));
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
        assert_eq!(fourth.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_candidate_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let real = Arc::new(ScriptedEndpoint::accepting(
            "real",
            Some(reply_with_stan("000001")),
            Arc::clone(&log),
        ));
        let registry = Arc::new(ChannelRegistry::new());
        registry.register("real", real as Arc<dyn RequestChannel>);
        let config = RouterConfig {
            name: "mux".to_string(),
            channels: vec!["ghost".to_string(), "real".to_string()],
            strategy: RouteStrategy::PrimarySecondary,
            retry_pause_secs: 0,
        };
        let router = ChannelRouter::new(config, registry);

        let response = router
            .request(IsoMsg::with_mti("0200"), Duration::from_secs(1))
            .await;
        assert!(response.is_some());
        assert_eq!(*log.lock(), vec!["real"]);
    }

    #[tokio::test]
    async fn test_no_accepting_candidate_returns_none() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(ScriptedEndpoint::refusing("a", Arc::clone(&log)));
        let b = Arc::new(ScriptedEndpoint::refusing("b", Arc::clone(&log)));
        let (router, _registry) = router_with(
            vec![("a", a), ("b", b)],
            RouteStrategy::PrimarySecondary,
            0,
        );

        let response = router
            .request(IsoMsg::with_mti("0200"), Duration::from_secs(1))
            .await;

        assert!(response.is_none());
        assert_eq!(router.metrics().get_exhausted(), 1);
    }

    #[tokio::test]
    async fn test_deadline_elapsing_during_selection_skips_the_receive() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let down = Arc::new(ScriptedEndpoint::refusing("down", Arc::clone(&log)));
        let slow = Arc::new(
            ScriptedEndpoint::accepting("slow", Some(reply_with_stan("000001")), Arc::clone(&log))
                .with_send_delay(Duration::from_millis(150)),
        );
        let (router, _registry) = router_with(
            vec![("down", down), ("slow", Arc::clone(&slow))],
            RouteStrategy::PrimarySecondary,
            0,
        );

        let response = router
            .request(IsoMsg::with_mti("0200"), Duration::from_millis(100))
            .await;

        assert!(response.is_none());
        assert_eq!(slow.receives.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_deadline_tries_no_candidate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(ScriptedEndpoint::accepting(
            "a",
            Some(reply_with_stan("000001")),
            Arc::clone(&log),
        ));
        let (router, _registry) =
            router_with(vec![("a", Arc::clone(&a))], RouteStrategy::PrimarySecondary, 0);

        let response = router.request(IsoMsg::with_mti("0200"), Duration::ZERO).await;

        assert!(response.is_none());
        assert_eq!(a.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pause_applies_between_candidates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let down = Arc::new(ScriptedEndpoint::refusing("down", Arc::clone(&log)));
        let up = Arc::new(ScriptedEndpoint::accepting(
            "up",
            Some(reply_with_stan("000001")),
            Arc::clone(&log),
        ));
        let (router, _registry) = router_with(
            vec![("down", down), ("up", up)],
            RouteStrategy::PrimarySecondary,
            1,
        );

        let started = Instant::now();
        let response = router
            .request(IsoMsg::with_mti("0200"), Duration::from_secs(5))
            .await;

        assert!(response.is_some());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_accepted_channel_with_nothing_to_say_yields_none() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mute = Arc::new(ScriptedEndpoint::accepting("mute", None, Arc::clone(&log)));
        let (router, _registry) =
            router_with(vec![("mute", mute)], RouteStrategy::PrimarySecondary, 0);

        let response = router
            .request(IsoMsg::with_mti("0200"), Duration::from_secs(1))
            .await;
        assert!(response.is_none());
        assert_eq!(router.metrics().get_routed(), 1);
    }

    #[tokio::test]
    async fn test_is_connected_tracks_registry_presence() {
        let registry = Arc::new(ChannelRegistry::new());
        let config = RouterConfig {
            name: "mux".to_string(),
            channels: vec!["gw-a".to_string(), "gw-b".to_string()],
            strategy: RouteStrategy::PrimarySecondary,
            retry_pause_secs: 0,
        };
        let router = ChannelRouter::new(config, Arc::clone(&registry));
        assert!(!router.is_connected());

        let log = Arc::new(Mutex::new(Vec::new()));
        let endpoint = Arc::new(ScriptedEndpoint::accepting("gw-b", None, log));
        registry.register("gw-b", endpoint as Arc<dyn RequestChannel>);
        assert!(router.is_connected());

        registry.unregister("gw-b");
        assert!(!router.is_connected());
    }
}
