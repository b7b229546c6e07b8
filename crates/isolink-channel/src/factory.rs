//! Channel construction from configuration.
//!
//! A channel description names its implementation, codec, connector, and
//! filters as kind strings. The factory resolves each kind against a builder
//! registry and assembles the configured instance. Embedders add their own
//! implementations at runtime with the `register_*` methods; the pool only
//! ever sees the resulting [`MsgChannel`].

use crate::channel::MsgChannel;
use crate::codec::{JsonCodec, MsgCodec};
use crate::filter::{FieldScrubFilter, FilterChain, MsgFilter, MtiAllowFilter};
use crate::tcp::{StreamConnector, TcpChannel, TcpConnector};
use isolink_core::config::{ChannelConfig, FilterSpec};
use isolink_core::error::{ConfigError, LinkError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces unconnected channels on demand, typically at pool-fill time.
pub trait ChannelFactory: Send + Sync {
    fn create(&self, config: &ChannelConfig) -> Result<Box<dyn MsgChannel>, LinkError>;
}

type ChannelBuilder = Box<
    dyn Fn(
            &ChannelConfig,
            Arc<dyn MsgCodec>,
            Arc<dyn StreamConnector>,
            FilterChain,
        ) -> Result<Box<dyn MsgChannel>, LinkError>
        + Send
        + Sync,
>;
type CodecBuilder =
    Box<dyn Fn(&ChannelConfig) -> Result<Arc<dyn MsgCodec>, LinkError> + Send + Sync>;
type ConnectorBuilder =
    Box<dyn Fn(&ChannelConfig) -> Result<Arc<dyn StreamConnector>, LinkError> + Send + Sync>;
type FilterBuilder =
    Box<dyn Fn(&FilterSpec) -> Result<Arc<dyn MsgFilter>, LinkError> + Send + Sync>;

/// The stock factory: ships `tcp` channels, the `json` codec, the `tcp`
/// connector, and the `mti-allow` / `field-scrub` filters, and accepts
/// runtime registration of further kinds.
pub struct StandardChannelFactory {
    channels: RwLock<HashMap<String, ChannelBuilder>>,
    codecs: RwLock<HashMap<String, CodecBuilder>>,
    connectors: RwLock<HashMap<String, ConnectorBuilder>>,
    filters: RwLock<HashMap<String, FilterBuilder>>,
}

impl StandardChannelFactory {
    pub fn new() -> Self {
        let factory = Self {
            channels: RwLock::new(HashMap::new()),
            codecs: RwLock::new(HashMap::new()),
            connectors: RwLock::new(HashMap::new()),
            filters: RwLock::new(HashMap::new()),
        };

        factory.register_channel("tcp", |config, codec, connector, filters| {
            let channel = TcpChannel::new(config.clone(), codec, connector, filters)
                .map_err(|e| ConfigError::invalid_value("channel.header", e.to_string()))?;
            Ok(Box::new(channel) as Box<dyn MsgChannel>)
        });

        factory.register_codec("json", |_config| Ok(Arc::new(JsonCodec) as Arc<dyn MsgCodec>));

        factory.register_connector("tcp", |config| {
            Ok(Arc::new(TcpConnector {
                keepalive: config.keepalive,
                ..TcpConnector::default()
            }) as Arc<dyn StreamConnector>)
        });

        factory.register_filter("mti-allow", |spec| {
            Ok(Arc::new(MtiAllowFilter::new(spec.mtis.clone())) as Arc<dyn MsgFilter>)
        });
        factory.register_filter("field-scrub", |spec| {
            Ok(Arc::new(FieldScrubFilter::new(spec.fields.iter().copied()))
                as Arc<dyn MsgFilter>)
        });

        factory
    }

    pub fn register_channel<F>(&self, kind: &str, builder: F)
    where
        F: Fn(
                &ChannelConfig,
                Arc<dyn MsgCodec>,
                Arc<dyn StreamConnector>,
                FilterChain,
            ) -> Result<Box<dyn MsgChannel>, LinkError>
            + Send
            + Sync
            + 'static,
    {
        self.channels
            .write()
            .insert(kind.to_string(), Box::new(builder));
    }

    pub fn register_codec<F>(&self, kind: &str, builder: F)
    where
        F: Fn(&ChannelConfig) -> Result<Arc<dyn MsgCodec>, LinkError> + Send + Sync + 'static,
    {
        self.codecs
            .write()
            .insert(kind.to_string(), Box::new(builder));
    }

    pub fn register_connector<F>(&self, kind: &str, builder: F)
    where
        F: Fn(&ChannelConfig) -> Result<Arc<dyn StreamConnector>, LinkError>
            + Send
            + Sync
            + 'static,
    {
        self.connectors
            .write()
            .insert(kind.to_string(), Box::new(builder));
    }

    pub fn register_filter<F>(&self, kind: &str, builder: F)
    where
        F: Fn(&FilterSpec) -> Result<Arc<dyn MsgFilter>, LinkError> + Send + Sync + 'static,
    {
        self.filters
            .write()
            .insert(kind.to_string(), Box::new(builder));
    }

    fn build_codec(&self, config: &ChannelConfig) -> Result<Arc<dyn MsgCodec>, LinkError> {
        let codecs = self.codecs.read();
        let builder = codecs
            .get(&config.codec)
            .ok_or_else(|| ConfigError::unknown_kind("codec", &config.codec))?;
        builder(config)
    }

    fn build_connector(
        &self,
        config: &ChannelConfig,
    ) -> Result<Arc<dyn StreamConnector>, LinkError> {
        let connectors = self.connectors.read();
        let builder = connectors
            .get(&config.connector)
            .ok_or_else(|| ConfigError::unknown_kind("connector", &config.connector))?;
        builder(config)
    }

    fn build_filters(&self, config: &ChannelConfig) -> Result<FilterChain, LinkError> {
        let filters = self.filters.read();
        let mut chain = FilterChain::new();
        for spec in &config.filters {
            let builder = filters
                .get(&spec.kind)
                .ok_or_else(|| ConfigError::unknown_kind("filter", &spec.kind))?;
            chain.add(spec.direction, builder(spec)?);
        }
        Ok(chain)
    }
}

impl Default for StandardChannelFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelFactory for StandardChannelFactory {
    fn create(&self, config: &ChannelConfig) -> Result<Box<dyn MsgChannel>, LinkError> {
        let codec = self.build_codec(config)?;
        let connector = self.build_connector(config)?;
        let filters = self.build_filters(config)?;

        let channels = self.channels.read();
        let builder = channels
            .get(&config.kind)
            .ok_or_else(|| ConfigError::unknown_kind("channel", &config.kind))?;
        builder(config, codec, connector, filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolink_core::config::FilterDirection;

    fn tcp_config() -> ChannelConfig {
        ChannelConfig {
            host: "127.0.0.1".to_string(),
            port: 7001,
            ..ChannelConfig::default()
        }
    }

    #[test]
    fn test_creates_tcp_channel() {
        let factory = StandardChannelFactory::new();
        let channel = factory.create(&tcp_config()).unwrap();
        assert!(!channel.is_connected());
    }

    #[test]
    fn test_unknown_kinds_are_config_errors() {
        let factory = StandardChannelFactory::new();

        let mut config = tcp_config();
        config.kind = "x25".to_string();
        assert!(matches!(
            factory.create(&config),
            Err(LinkError::Config(ConfigError::UnknownKind { .. }))
        ));

        let mut config = tcp_config();
        config.codec = "bitmap".to_string();
        assert!(factory.create(&config).is_err());

        let mut config = tcp_config();
        config.filters.push(FilterSpec {
            kind: "unheard-of".to_string(),
            ..FilterSpec::default()
        });
        assert!(factory.create(&config).is_err());
    }

    #[test]
    fn test_create_rejects_malformed_header() {
        let factory = StandardChannelFactory::new();

        // the factory sees raw config, so bad headers must come back as
        // errors even when nothing upstream ran validate()
        let mut config = tcp_config();
        config.header = Some("\u{20ac}a".to_string());
        assert!(matches!(
            factory.create(&config),
            Err(LinkError::Config(ConfigError::InvalidValue { .. }))
        ));

        let mut config = tcp_config();
        config.header = Some("49g0".to_string());
        assert!(factory.create(&config).is_err());
    }

    #[test]
    fn test_builds_configured_filters() {
        let factory = StandardChannelFactory::new();
        let mut config = tcp_config();
        config.filters.push(FilterSpec {
            kind: "mti-allow".to_string(),
            direction: FilterDirection::Outgoing,
            mtis: vec!["0200".to_string()],
            ..FilterSpec::default()
        });

        // resolves without error; filter behavior is covered in filter tests
        factory.create(&config).unwrap();
    }

    #[test]
    fn test_runtime_registration() {
        let factory = StandardChannelFactory::new();
        factory.register_codec("noop", |_| Ok(Arc::new(JsonCodec) as Arc<dyn MsgCodec>));

        let mut config = tcp_config();
        config.codec = "noop".to_string();
        factory.create(&config).unwrap();
    }
}
