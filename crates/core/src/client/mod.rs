//! RTSP client session (RFC 2326 §A.1 client state machine).
//!
//! ```text
//!                     connect            SETUP
//!  Disconnected ───────────────▶ Idle ─────────▶ Ready
//!       ▲                                          │ PLAY
//!       │  disconnect / TEARDOWN                   ▼
//!       └──────────────────────────── Paused ◀─▶ Playing
//!                                          PAUSE / PLAY
//! ```
//!
//! All operations run under one state lock, so requests on a client are
//! strictly serialized. Events raised during an operation are delivered to
//! listeners after the lock is released.

mod engine;
mod methods;
mod setup;
mod state;
mod timers;

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use url::Url;

use crate::config::{ClientConfig, MAX_SESSION_TIMEOUT};
use crate::error::Result;
use crate::events::{ClientEvent, EventHub, EventKind, EventSource, ListenerId};
use crate::media::{MediaProtocol, MediaReceiver, TransportContext};
use crate::protocol::{MediaDescription, MediaType, RtspMessage, RtspMethod, SessionDescription};

use engine::InterleaveSignal;
use state::ClientState;

pub use methods::PlayRange;
pub use state::SessionState;

/// Parts reachable without the state lock.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) media: Arc<Mutex<MediaReceiver>>,
    pub(crate) inbox: Arc<InterleaveSignal>,
    /// Back-reference handed to timer threads.
    pub(crate) me: Weak<ClientInner>,
}

#[derive(Debug)]
pub(crate) struct ClientInner {
    shared: Shared,
    state: Mutex<ClientState>,
    events: EventHub,
}

impl ClientInner {
    /// Run `f` under the state lock, then deliver the events it raised.
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut ClientState, &Shared) -> T) -> T {
        let (result, events) = {
            let mut state = self.state.lock();
            let result = f(&mut state, &self.shared);
            (result, std::mem::take(&mut state.events))
        };
        self.dispatch(events);
        result
    }

    fn dispatch(&self, events: Vec<(EventSource, ClientEvent)>) {
        for (source, event) in &events {
            self.events.dispatch(source, event);
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.dispose(&self.shared);
        let events = std::mem::take(&mut state.events);
        self.dispatch(events);
    }
}

/// An RTSP client bound to one presentation URL.
///
/// Cheap to clone; clones share the session. The session is torn down when
/// the last clone is dropped.
///
/// ```no_run
/// use rtsp::{EventKind, RtspClient};
///
/// let client = RtspClient::new("rtsp://camera.local/live")?;
/// client.subscribe(EventKind::Playing, |source, _| {
///     println!("playing {}", source.location);
/// });
/// client.start_playing(None, None, None)?;
/// // ...
/// client.stop_playing();
/// # Ok::<(), rtsp::RtspError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RtspClient {
    inner: Arc<ClientInner>,
}

impl RtspClient {
    pub fn new(location: &str) -> Result<Self> {
        Self::with_config(location, ClientConfig::default())
    }

    /// Create a client for `location` (`rtsp://`, `rtspu://` or `http://`).
    ///
    /// Nothing is sent until the first operation.
    pub fn with_config(location: &str, config: ClientConfig) -> Result<Self> {
        let state = ClientState::new(location, config)?;
        let inner = Arc::new_cyclic(|me| ClientInner {
            shared: Shared {
                media: Arc::new(Mutex::new(MediaReceiver::new())),
                inbox: Arc::new(InterleaveSignal::default()),
                me: me.clone(),
            },
            state: Mutex::new(state),
            events: EventHub::new(),
        });
        Ok(RtspClient { inner })
    }

    // Lifecycle

    /// Open the control connection. A no-op when already connected.
    pub fn connect(&self) -> Result<()> {
        self.inner.with_state(|st, _| st.connect())
    }

    /// TEARDOWN the session if there is one and close the connection.
    pub fn disconnect(&self) {
        self.inner.with_state(|st, sh| {
            st.disconnect(sh);
            st.reset_escalation();
        })
    }

    /// Describe the presentation if needed, SETUP its media (only those of
    /// `media_type` when given), and PLAY from `start` to `end`.
    pub fn start_playing(
        &self,
        start: Option<Duration>,
        end: Option<Duration>,
        media_type: Option<&MediaType>,
    ) -> Result<()> {
        self.inner
            .with_state(|st, sh| st.start_playing(sh, start, end, media_type))
    }

    /// PLAY one media while playing, or start playing everything.
    pub fn play(&self, media: Option<&MediaDescription>, range: &PlayRange) -> Result<()> {
        self.inner.with_state(|st, sh| st.play(sh, media, range))
    }

    /// PAUSE the session or one media. A no-op unless playing.
    pub fn pause(&self, media: Option<&MediaDescription>, force: bool) -> Result<()> {
        self.inner.with_state(|st, sh| st.pause(sh, media, force))
    }

    /// Tear down and disconnect if playing or paused.
    pub fn stop_playing(&self) {
        self.inner.with_state(|st, sh| {
            st.stop_playing(sh);
            st.reset_escalation();
        })
    }

    /// Stop everything and release the connection. Later operations fail.
    pub fn dispose(&self) {
        self.inner.with_state(|st, sh| st.dispose(sh))
    }

    // Requests

    pub fn send_options(&self, use_star: bool) -> Result<Option<RtspMessage>> {
        self.inner.with_state(|st, sh| st.send_options(sh, use_star))
    }

    /// DESCRIBE the location; the parsed SDP is kept as
    /// [`description`](Self::description).
    pub fn send_describe(&self) -> Result<RtspMessage> {
        self.inner.with_state(|st, sh| st.send_describe(sh))
    }

    pub fn send_announce(
        &self,
        location: Option<&Url>,
        description: &SessionDescription,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.inner
            .with_state(|st, sh| st.send_announce(sh, location, description, force))
    }

    /// SETUP one media and register its transport context.
    pub fn send_setup(&self, media: &MediaDescription) -> Result<RtspMessage> {
        self.inner.with_state(|st, sh| {
            st.connect()?;
            st.setup_media(sh, media)
        })
    }

    pub fn send_play(
        &self,
        media: Option<&MediaDescription>,
        range: &PlayRange,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.inner
            .with_state(|st, sh| st.send_play(sh, media, range, force))
    }

    pub fn send_pause(&self, media: Option<&MediaDescription>, force: bool) -> Result<Option<RtspMessage>> {
        self.inner.with_state(|st, sh| st.send_pause(sh, media, force))
    }

    pub fn send_teardown(&self, media: Option<&MediaDescription>) -> Result<Option<RtspMessage>> {
        self.inner.with_state(|st, sh| st.send_teardown(sh, media))
    }

    pub fn send_get_parameter(
        &self,
        body: Option<&str>,
        content_type: Option<&str>,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.inner
            .with_state(|st, sh| st.send_get_parameter(sh, body, content_type, force))
    }

    pub fn send_set_parameter(
        &self,
        body: Option<&str>,
        content_type: Option<&str>,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.inner
            .with_state(|st, sh| st.send_set_parameter(sh, body, content_type, force))
    }

    /// Send an arbitrary request through the transaction engine.
    ///
    /// Returns `Ok(None)` when the server did not answer in time.
    pub fn send_request(&self, request: RtspMessage) -> Result<Option<RtspMessage>> {
        self.inner.with_state(|st, sh| st.send(sh, request))
    }

    // Events

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&EventSource, &ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    // Accessors

    fn read<T>(&self, f: impl FnOnce(&ClientState) -> T) -> T {
        f(&*self.inner.state.lock())
    }

    pub fn location(&self) -> Url {
        self.read(|st| st.location.clone())
    }

    pub fn state(&self) -> SessionState {
        self.read(|st| st.lifecycle)
    }

    pub fn is_connected(&self) -> bool {
        self.read(ClientState::is_connected)
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SessionState::Playing
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.read(|st| st.remote)
    }

    pub fn session_id(&self) -> Option<String> {
        self.read(|st| st.session_id.clone())
    }

    /// Session timeout, as announced by the server or configured.
    pub fn session_timeout(&self) -> Duration {
        self.read(|st| st.timeout)
    }

    /// Change the session timeout (and keep-alive period) until the server
    /// announces one.
    pub fn set_session_timeout(&self, timeout: Duration) {
        self.inner.state.lock().timeout = timeout.min(MAX_SESSION_TIMEOUT);
    }

    /// Last CSeq sent.
    pub fn sequence_number(&self) -> u32 {
        self.read(|st| st.cseq)
    }

    /// Methods from the server's `Public` header; empty when unknown.
    pub fn supported_methods(&self) -> Vec<RtspMethod> {
        self.read(|st| st.supported.clone())
    }

    pub fn media_protocol(&self) -> MediaProtocol {
        self.read(|st| st.media_protocol)
    }

    pub fn description(&self) -> Option<SessionDescription> {
        self.read(|st| st.description.clone())
    }

    /// The most recent request sent or response received.
    pub fn last_transmitted(&self) -> Option<RtspMessage> {
        self.read(|st| st.last_transmitted.clone())
    }

    pub fn bytes_sent(&self) -> u64 {
        self.read(|st| st.bytes_sent)
    }

    /// RTSP bytes received (responses only; media is counted per context).
    pub fn bytes_received(&self) -> u64 {
        self.read(|st| st.bytes_received)
    }

    /// When the session last started playing.
    pub fn play_started(&self) -> Option<Instant> {
        self.read(|st| st.play_started)
    }

    pub fn transport_contexts(&self) -> Vec<Arc<TransportContext>> {
        self.inner.shared.media.lock().contexts().to_vec()
    }

    /// True while the media receiver is running (between PLAY and TEARDOWN).
    pub fn is_receiving(&self) -> bool {
        self.inner.shared.media.lock().is_active()
    }

    /// Media bytes received on every context.
    pub fn media_bytes_received(&self) -> u64 {
        self.inner.shared.media.lock().total_bytes_received()
    }
}
