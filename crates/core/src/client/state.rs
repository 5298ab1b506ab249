use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngExt;
use url::Url;

use crate::auth::{AuthContext, Credentials};
use crate::client::Shared;
use crate::client::engine::ReaderHandle;
use crate::client::timers::TimerHandle;
use crate::config::{ClientConfig, MAX_SESSION_TIMEOUT};
use crate::error::{Result, RtspError};
use crate::events::{ClientEvent, EventSource};
use crate::media::MediaProtocol;
use crate::protocol::{RtspMessage, RtspMethod, SessionDescription};
use crate::transport::{self, Carrier, ControlConnection};

/// Where the client is in the RTSP session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No control connection.
    Disconnected,
    /// Connected, no media set up.
    ConnectedIdle,
    /// At least one media set up.
    Ready,
    Playing,
    Paused,
}

/// Everything behind the client's state lock.
#[derive(Debug)]
pub(crate) struct ClientState {
    pub(crate) location: Url,
    pub(crate) carrier: Carrier,
    pub(crate) config: ClientConfig,
    pub(crate) connection: Option<ControlConnection>,
    pub(crate) remote: Option<SocketAddr>,
    pub(crate) session_id: Option<String>,
    pub(crate) cseq: u32,
    /// Methods from the last OPTIONS `Public` header; empty when unknown.
    pub(crate) supported: Vec<RtspMethod>,
    /// Session timeout, also the keep-alive period.
    pub(crate) timeout: Duration,
    pub(crate) retry_count: u32,
    pub(crate) last_transmitted: Option<RtspMessage>,
    pub(crate) lifecycle: SessionState,
    pub(crate) play_started: Option<Instant>,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
    pub(crate) media_protocol: MediaProtocol,
    /// Carriers used since the user last stopped or disconnected.
    pub(crate) tried_protocols: Vec<MediaProtocol>,
    pub(crate) description: Option<SessionDescription>,
    pub(crate) auth: AuthContext,
    pub(crate) buffer: Vec<u8>,
    /// Events raised under the lock, dispatched once it is released.
    pub(crate) events: Vec<(EventSource, ClientEvent)>,
    pub(crate) reader: Option<ReaderHandle>,
    pub(crate) keepalive: Option<TimerHandle>,
    pub(crate) switch_timer: Option<TimerHandle>,
    pub(crate) tunnel_cookie: String,
    pub(crate) disposed: bool,
}

impl ClientState {
    pub(crate) fn new(location: &str, mut config: ClientConfig) -> Result<Self> {
        let mut location = Url::parse(location)?;
        let carrier = Carrier::from_url(&location)?;
        if location.host_str().is_none_or(str::is_empty) {
            return Err(RtspError::InvalidLocation(format!("{location} has no host")));
        }

        // Credentials in the location are moved to the config.
        if !location.username().is_empty() {
            if config.credentials.is_none() {
                config.credentials = Some(Credentials::new(
                    location.username(),
                    location.password().unwrap_or_default(),
                ));
            }
            let _ = location.set_username("");
            let _ = location.set_password(None);
        }

        // Media cannot be interleaved on a datagram carrier.
        if carrier == Carrier::Udp && config.media_protocol == MediaProtocol::Tcp {
            config.media_protocol = MediaProtocol::Udp;
        }

        let auth = AuthContext::new(config.credentials.clone(), config.auth_scheme);
        Ok(ClientState {
            carrier,
            connection: None,
            remote: None,
            session_id: None,
            cseq: 0,
            supported: Vec::new(),
            timeout: config.session_timeout.min(MAX_SESSION_TIMEOUT),
            retry_count: config.retry_count.max(1),
            last_transmitted: None,
            lifecycle: SessionState::Disconnected,
            play_started: None,
            bytes_sent: 0,
            bytes_received: 0,
            media_protocol: config.media_protocol,
            tried_protocols: vec![config.media_protocol],
            description: None,
            auth,
            buffer: vec![0; config.buffer_size.max(1)],
            events: Vec::new(),
            reader: None,
            keepalive: None,
            switch_timer: None,
            tunnel_cookie: format!("{:016x}", rand::rng().random::<u64>()),
            disposed: false,
            location,
            config,
        })
    }

    pub(crate) fn emit(&mut self, event: ClientEvent) {
        let source = EventSource {
            location: self.location.clone(),
            session_id: self.session_id.clone(),
        };
        self.events.push((source, event));
    }

    pub(crate) fn next_cseq(&mut self) -> u32 {
        self.cseq = self.cseq.wrapping_add(1);
        self.cseq
    }

    /// True when the server advertised `method`, or advertised nothing.
    pub(crate) fn supports(&self, method: RtspMethod) -> bool {
        self.supported.is_empty() || self.supported.contains(&method)
    }

    pub(crate) fn require(&self, method: RtspMethod, force: bool) -> Result<()> {
        if force || self.supports(method) {
            Ok(())
        } else {
            Err(RtspError::Unsupported(method))
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open the control connection if it is not open.
    pub(crate) fn connect(&mut self) -> Result<()> {
        if self.disposed {
            return Err(RtspError::InvalidOperation("client is disposed".to_string()));
        }
        if self.connection.is_some() {
            return Ok(());
        }

        let remote = transport::resolve(&self.location, self.carrier)?;
        let connection = ControlConnection::open(
            self.carrier,
            remote,
            self.config.connect_timeout,
            self.timeout.max(Duration::from_millis(1)),
        )?;
        tracing::info!(location = %self.location, %remote, carrier = ?self.carrier, "connected");

        self.remote = Some(remote);
        self.connection = Some(connection);
        if self.lifecycle == SessionState::Disconnected {
            self.lifecycle = SessionState::ConnectedIdle;
        }
        self.emit(ClientEvent::Connected);
        Ok(())
    }

    /// Tear the session down and close the control connection.
    ///
    /// Usable from any state; request failures on the way are logged.
    pub(crate) fn disconnect(&mut self, sh: &Shared) {
        self.cancel_timers();

        if self.session_id.is_some() && self.connection.is_some() {
            if let Err(e) = self.send_teardown(sh, None) {
                tracing::debug!(error = %e, "TEARDOWN during disconnect failed");
            }
        }

        self.stop_reader();
        sh.media.lock().clear_contexts();
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        sh.inbox.clear();
        self.session_id = None;
        self.description = None;
        self.play_started = None;
        self.auth.reset();

        if self.lifecycle != SessionState::Disconnected {
            self.lifecycle = SessionState::Disconnected;
            tracing::info!(location = %self.location, "disconnected");
            self.emit(ClientEvent::Disconnected);
        }
    }

    pub(crate) fn cancel_timers(&mut self) {
        if let Some(timer) = self.keepalive.take() {
            timer.cancel();
        }
        if let Some(timer) = self.switch_timer.take() {
            timer.cancel();
        }
    }

    /// Forget carriers tried by the watchdog, keeping the current one.
    pub(crate) fn reset_escalation(&mut self) {
        self.tried_protocols.clear();
        self.tried_protocols.push(self.media_protocol);
    }

    /// Stop everything and release the connection and buffers for good.
    pub(crate) fn dispose(&mut self, sh: &Shared) {
        if self.disposed {
            return;
        }
        self.disconnect(sh);
        self.buffer = Vec::new();
        self.last_transmitted = None;
        self.disposed = true;
        tracing::debug!(location = %self.location, "client disposed");
    }
}
