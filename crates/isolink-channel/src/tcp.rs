//! TCP channel implementation.
//!
//! Frames are a 4-byte big-endian length prefix followed by the optional
//! configured header and the codec payload. One request/response pair at a
//! time; the channel reads directly off the stream under its configured
//! read timeout, so there is no background receive task to reconcile with
//! the pool's ownership model.

use crate::channel::MsgChannel;
use crate::codec::{parse_header, MsgCodec};
use crate::filter::FilterChain;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use isolink_core::config::ChannelConfig;
use isolink_core::error::ChannelError;
use isolink_core::msg::IsoMsg;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

const READ_BUFFER_CAPACITY: usize = 8192;

/// Socket factory seam: produces a configured stream for a channel.
///
/// The default [`TcpConnector`] is a plain socket; alternative connectors
/// (source-bound sockets, proxies) register with the channel factory under
/// their own kind string.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<TcpStream, ChannelError>;
}

/// Default socket factory.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Enable TCP keepalive
    pub keepalive: bool,
    /// TCP keepalive interval
    pub keepalive_interval: Option<Duration>,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            keepalive: true,
            keepalive_interval: Some(Duration::from_secs(30)),
            nodelay: true,
        }
    }
}

impl TcpConnector {
    fn configure_socket(&self, stream: &TcpStream) -> Result<(), ChannelError> {
        stream.set_nodelay(self.nodelay)?;

        if self.keepalive {
            let mut keepalive = socket2::TcpKeepalive::new();
            if let Some(interval) = self.keepalive_interval {
                keepalive = keepalive.with_time(interval);
            }
            let socket = socket2::SockRef::from(stream);
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

#[async_trait]
impl StreamConnector for TcpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<TcpStream, ChannelError> {
        let addr = format!("{host}:{port}");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ChannelError::timeout("connect", connect_timeout.as_secs()))??;

        self.configure_socket(&stream)?;
        Ok(stream)
    }
}

/// A point-to-point TCP channel.
pub struct TcpChannel {
    config: ChannelConfig,
    codec: Arc<dyn MsgCodec>,
    connector: Arc<dyn StreamConnector>,
    filters: FilterChain,
    header: Vec<u8>,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
}

impl TcpChannel {
    /// Builds an unconnected channel from its configuration.
    pub fn new(
        config: ChannelConfig,
        codec: Arc<dyn MsgCodec>,
        connector: Arc<dyn StreamConnector>,
        filters: FilterChain,
    ) -> Result<Self, ChannelError> {
        let header = match &config.header {
            Some(hex) => parse_header(hex)?,
            None => Vec::new(),
        };

        Ok(Self {
            config,
            codec,
            connector,
            filters,
            header,
            stream: None,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        })
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let write_timeout = self.config.write_timeout();
        let timeout_secs = self.config.write_timeout_secs;
        let frame_len = (self.header.len() + payload.len()) as u32;

        let stream = self.stream.as_mut().ok_or(ChannelError::NotConnected)?;

        timeout(write_timeout, stream.write_all(&frame_len.to_be_bytes()))
            .await
            .map_err(|_| ChannelError::timeout("send", timeout_secs))??;
        if !self.header.is_empty() {
            timeout(write_timeout, stream.write_all(&self.header))
                .await
                .map_err(|_| ChannelError::timeout("send", timeout_secs))??;
        }
        timeout(write_timeout, stream.write_all(payload))
            .await
            .map_err(|_| ChannelError::timeout("send", timeout_secs))??;
        stream.flush().await?;

        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Bytes, ChannelError> {
        let read_timeout = self.config.read_timeout();
        let timeout_secs = self.config.read_timeout_secs;
        let max = self.config.max_frame_size;

        let stream = self.stream.as_mut().ok_or(ChannelError::NotConnected)?;
        let buffer = &mut self.read_buf;

        loop {
            if buffer.len() >= 4 {
                let mut length_bytes = [0u8; 4];
                length_bytes.copy_from_slice(&buffer[..4]);
                let frame_length = u32::from_be_bytes(length_bytes) as usize;

                if frame_length > max {
                    return Err(ChannelError::FrameTooLarge {
                        size: frame_length,
                        max,
                    });
                }

                if buffer.len() >= 4 + frame_length {
                    buffer.advance(4);
                    return Ok(buffer.split_to(frame_length).freeze());
                }
            }

            let n = timeout(read_timeout, stream.read_buf(buffer))
                .await
                .map_err(|_| ChannelError::timeout("receive", timeout_secs))??;

            if n == 0 {
                return Err(ChannelError::Closed);
            }
        }
    }
}

#[async_trait]
impl MsgChannel for TcpChannel {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self
            .connector
            .connect(
                &self.config.host,
                self.config.port,
                self.config.connect_timeout(),
            )
            .await?;

        self.read_buf.clear();
        self.stream = Some(stream);
        info!(peer = %self.peer(), "channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        if let Some(mut stream) = self.stream.take() {
            self.read_buf.clear();
            debug!(peer = %self.peer(), "channel disconnected");
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, msg: &IsoMsg) -> Result<(), ChannelError> {
        let filtered = self.filters.apply_outgoing(msg.clone())?;
        let payload = self.codec.encode(&filtered)?;

        if let Err(e) = self.write_frame(&payload).await {
            // an I/O fault invalidates the connection
            self.stream = None;
            return Err(e);
        }

        debug!(peer = %self.peer(), bytes = payload.len(), msg = %filtered, "frame sent");
        Ok(())
    }

    async fn receive(&mut self) -> Result<IsoMsg, ChannelError> {
        let frame = match self.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                self.stream = None;
                return Err(e);
            }
        };

        if frame.len() < self.header.len() {
            return Err(ChannelError::codec(format!(
                "frame of {} bytes is shorter than the {} byte header",
                frame.len(),
                self.header.len()
            )));
        }

        let msg = self.codec.decode(&frame[self.header.len()..])?;
        let msg = self.filters.apply_incoming(msg)?;
        debug!(peer = %self.peer(), bytes = frame.len(), msg = %msg, "frame received");
        Ok(msg)
    }
}
