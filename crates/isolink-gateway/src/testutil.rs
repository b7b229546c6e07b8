//! Scripted channel doubles shared by the crate's tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use isolink_channel::channel::{MsgChannel, RequestChannel};
use isolink_channel::factory::ChannelFactory;
use isolink_core::config::ChannelConfig;
use isolink_core::error::{ChannelError, ConfigError, IoErrorKind, LinkError};
use isolink_core::msg::IsoMsg;
use parking_lot::Mutex;

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`; safe to call from every
/// test.
pub fn init_test_logging() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Observable state shared by every channel a [`ScriptedFactory`] builds.
#[derive(Default)]
pub struct ChannelProbe {
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub sent: Mutex<Vec<IsoMsg>>,
}

type ReplyFn = Arc<dyn Fn(&IsoMsg) -> IsoMsg + Send + Sync>;

/// Behavior script for [`ScriptedChannel`].
#[derive(Clone)]
pub struct ChannelScript {
    /// Connect attempts that fail before one succeeds
    connects_before_success: usize,
    fail_sends: bool,
    hang_on_receive: bool,
    reply_delay: Duration,
    reply: ReplyFn,
}

impl Default for ChannelScript {
    fn default() -> Self {
        Self {
            connects_before_success: 0,
            fail_sends: false,
            hang_on_receive: false,
            reply_delay: Duration::ZERO,
            reply: Arc::new(|_| IsoMsg::with_mti("0210").with_field(39, "00")),
        }
    }
}

impl ChannelScript {
    pub fn never_connecting(mut self) -> Self {
        self.connects_before_success = usize::MAX;
        self
    }

    pub fn failing_connects(mut self, attempts: usize) -> Self {
        self.connects_before_success = attempts;
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn hanging_receive(mut self) -> Self {
        self.hang_on_receive = true;
        self
    }

    pub fn with_reply(mut self, reply: impl Fn(&IsoMsg) -> IsoMsg + Send + Sync + 'static) -> Self {
        self.reply = Arc::new(reply);
        self
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }
}

/// In-memory [`MsgChannel`] that follows a [`ChannelScript`].
pub struct ScriptedChannel {
    script: ChannelScript,
    probe: Arc<ChannelProbe>,
    connected: bool,
    pending: Option<IsoMsg>,
}

impl ScriptedChannel {
    pub fn new(script: ChannelScript, probe: Arc<ChannelProbe>) -> Self {
        Self {
            script,
            probe,
            connected: false,
            pending: None,
        }
    }
}

#[async_trait]
impl MsgChannel for ScriptedChannel {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.connected {
            return Ok(());
        }
        let attempt = self.probe.connect_calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.script.connects_before_success {
            return Err(ChannelError::Io {
                kind: IoErrorKind::ConnectionRefused,
                message: "scripted refusal".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.probe.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        self.pending = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, msg: &IsoMsg) -> Result<(), ChannelError> {
        if !self.connected {
            return Err(ChannelError::NotConnected);
        }
        if self.script.fail_sends {
            return Err(ChannelError::Io {
                kind: IoErrorKind::BrokenPipe,
                message: "scripted send failure".to_string(),
            });
        }
        self.probe.sent.lock().push(msg.clone());
        self.pending = Some((self.script.reply)(msg));
        Ok(())
    }

    async fn receive(&mut self) -> Result<IsoMsg, ChannelError> {
        if !self.connected {
            return Err(ChannelError::NotConnected);
        }
        if self.script.hang_on_receive {
            return std::future::pending().await;
        }
        if !self.script.reply_delay.is_zero() {
            tokio::time::sleep(self.script.reply_delay).await;
        }
        self.pending.take().ok_or(ChannelError::Closed)
    }
}

/// Factory handing out [`ScriptedChannel`]s that share one probe.
pub struct ScriptedFactory {
    script: ChannelScript,
    probe: Arc<ChannelProbe>,
    created: AtomicUsize,
    fail_create: bool,
}

impl ScriptedFactory {
    pub fn new(script: ChannelScript) -> Self {
        Self {
            script,
            probe: Arc::new(ChannelProbe::default()),
            created: AtomicUsize::new(0),
            fail_create: false,
        }
    }

    /// A factory whose `create` always fails.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::new(ChannelScript::default())
        }
    }

    pub fn probe(&self) -> Arc<ChannelProbe> {
        Arc::clone(&self.probe)
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ChannelFactory for ScriptedFactory {
    fn create(&self, _config: &ChannelConfig) -> Result<Box<dyn MsgChannel>, LinkError> {
        if self.fail_create {
            return Err(ConfigError::invalid_value("channel.kind", "scripted factory failure").into());
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedChannel::new(
            self.script.clone(),
            Arc::clone(&self.probe),
        )))
    }
}

/// Scripted [`RequestChannel`] endpoint for router tests. Accepting
/// endpoints record sends into a shared order log; refusing endpoints fail
/// every send with a connection failure.
pub struct ScriptedEndpoint {
    name: String,
    accept: bool,
    send_delay: Duration,
    reply: Option<IsoMsg>,
    pub sends: AtomicUsize,
    pub receives: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEndpoint {
    pub fn accepting(
        name: impl Into<String>,
        reply: Option<IsoMsg>,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            name: name.into(),
            accept: true,
            send_delay: Duration::ZERO,
            reply,
            sends: AtomicUsize::new(0),
            receives: AtomicUsize::new(0),
            log,
        }
    }

    pub fn refusing(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            accept: false,
            send_delay: Duration::ZERO,
            reply: None,
            sends: AtomicUsize::new(0),
            receives: AtomicUsize::new(0),
            log,
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }
}

#[async_trait]
impl RequestChannel for ScriptedEndpoint {
    async fn send(&self, _request: IsoMsg) -> Result<(), LinkError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        self.log.lock().push(self.name.clone());
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.accept {
            Ok(())
        } else {
            Err(LinkError::connection_exhausted())
        }
    }

    async fn receive(&self, _wait: Duration) -> Option<IsoMsg> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }

    fn is_connected(&self) -> bool {
        true
    }
}
