//! Per-method requests and the playback state machine built on them.

use std::time::Duration;

use url::Url;

use crate::client::Shared;
use crate::client::state::{ClientState, SessionState};
use crate::client::timers;
use crate::error::{Result, RtspError};
use crate::events::ClientEvent;
use crate::media::MediaProtocol;
use crate::protocol::headers::range_header;
use crate::protocol::sdp::SDP_MIME_TYPE;
use crate::protocol::{MediaDescription, MediaType, RtspMessage, RtspMethod, SessionDescription, StatusCode};

/// Time range for PLAY (RFC 2326 §12.29).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRange {
    pub start: Option<Duration>,
    pub end: Option<Duration>,
    /// Unit prefix, `npt` unless the server wants `clock` or `smpte`.
    pub range_type: String,
    /// `Some("hms")` writes `h:mm:ss.fff` instead of seconds.
    pub range_format: Option<String>,
}

impl PlayRange {
    pub fn npt(start: Option<Duration>, end: Option<Duration>) -> Self {
        PlayRange {
            start,
            end,
            ..Default::default()
        }
    }

    fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    fn header(&self) -> String {
        range_header(self.start, self.end, &self.range_type, self.range_format.as_deref())
    }
}

impl Default for PlayRange {
    fn default() -> Self {
        PlayRange {
            start: None,
            end: None,
            range_type: "npt".to_string(),
            range_format: None,
        }
    }
}

fn status_of(response: &Option<RtspMessage>) -> Option<StatusCode> {
    response.as_ref().and_then(RtspMessage::status)
}

fn is_ok(response: &Option<RtspMessage>) -> bool {
    status_of(response) == Some(StatusCode::OK)
}

impl ClientState {
    pub(crate) fn send_options(&mut self, sh: &Shared, use_star: bool) -> Result<Option<RtspMessage>> {
        let uri = if use_star { "*".to_string() } else { self.location.to_string() };
        let response = self.send(sh, RtspMessage::request(RtspMethod::Options, &uri))?;

        if let Some(r) = &response
            && r.status() == Some(StatusCode::OK)
        {
            self.supported = r
                .header("Public")
                .map(crate::protocol::method::parse_method_list)
                .unwrap_or_default();
            tracing::debug!(supported = ?self.supported, "server methods");
        }
        Ok(response)
    }

    /// DESCRIBE the location and keep the session description.
    pub(crate) fn send_describe(&mut self, sh: &Shared) -> Result<RtspMessage> {
        let request = RtspMessage::request(RtspMethod::Describe, self.location.as_str())
            .with_header("Accept", SDP_MIME_TYPE);
        let response = self
            .send(sh, request)?
            .ok_or(RtspError::NoResponse(RtspMethod::Describe))?;

        let status = response.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status != StatusCode::OK {
            return Err(RtspError::Status {
                status,
                method: RtspMethod::Describe,
            });
        }
        let content_type = response.header("Content-Type").unwrap_or_default();
        if !content_type.to_ascii_lowercase().starts_with(SDP_MIME_TYPE) {
            return Err(RtspError::SessionDescription(format!(
                "unexpected Content-Type {content_type:?}"
            )));
        }
        let body = response.body().unwrap_or_default();
        if body.trim().is_empty() {
            return Err(RtspError::SessionDescription("empty body".to_string()));
        }
        let description = SessionDescription::parse(body)?;
        tracing::info!(media = description.media.len(), "session described");
        self.description = Some(description);
        Ok(response)
    }

    pub(crate) fn send_announce(
        &mut self,
        sh: &Shared,
        location: Option<&Url>,
        description: &SessionDescription,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.require(RtspMethod::Announce, force)?;
        let uri = location.unwrap_or(&self.location).to_string();
        let request = RtspMessage::request(RtspMethod::Announce, &uri)
            .with_header("Content-Type", SDP_MIME_TYPE)
            .with_body(description.to_string());
        self.send(sh, request)
    }

    pub(crate) fn send_play(
        &mut self,
        sh: &Shared,
        media: Option<&MediaDescription>,
        range: &PlayRange,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.require(RtspMethod::Play, force)?;

        let (uri, range) = match media {
            Some(md) => {
                let context = sh.media.lock().context_for(md).cloned().ok_or_else(|| {
                    RtspError::InvalidOperation(format!("{} was not set up", md.media_type))
                })?;
                let range = PlayRange {
                    start: range.start.or(context.media_start),
                    end: range.end.or(context.media_end),
                    ..range.clone()
                };
                (context.control_uri.to_string(), range)
            }
            None => (self.location.to_string(), range.clone()),
        };

        let mut request = RtspMessage::request(RtspMethod::Play, &uri);
        if !range.is_open() {
            request.set_header("Range", &range.header());
        }

        let mut response = self.send(sh, request.clone())?;
        if status_of(&response) == Some(StatusCode::INVALID_RANGE) {
            tracing::debug!("server rejected Range, retrying PLAY without it");
            request.remove_header("Range");
            response = self.send(sh, request)?;
        }
        if response.as_ref().is_some_and(|r| r.status() != Some(StatusCode::OK)) {
            return Ok(response);
        }

        sh.media.lock().connect();
        if self.media_protocol == MediaProtocol::Tcp && self.carrier.is_stream() {
            self.start_reader(sh);
        }
        if self.switch_timer.is_none() && sh.media.lock().total_bytes_received() == 0 {
            self.switch_timer = Some(timers::schedule(
                "rtsp-switch",
                self.config.protocol_switch_time,
                sh.me.clone(),
                timers::protocol_switch,
            ));
        }
        if self.keepalive.is_none() && !self.timeout.is_zero() {
            self.keepalive = Some(timers::schedule(
                "rtsp-keepalive",
                self.timeout,
                sh.me.clone(),
                timers::keep_alive,
            ));
        }
        Ok(response)
    }

    pub(crate) fn send_pause(
        &mut self,
        sh: &Shared,
        media: Option<&MediaDescription>,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        let uri = match media {
            Some(md) => match sh.media.lock().context_for(md) {
                Some(context) => context.control_uri.to_string(),
                None if force => md.absolute_control_uri(&self.location).to_string(),
                None => {
                    return Err(RtspError::InvalidOperation(format!(
                        "{} was not set up",
                        md.media_type
                    )));
                }
            },
            None => self.location.to_string(),
        };
        self.require(RtspMethod::Pause, force)?;

        let response = self.send(sh, RtspMessage::request(RtspMethod::Pause, &uri))?;
        if is_ok(&response) {
            if media.is_none() && self.lifecycle == SessionState::Playing {
                self.lifecycle = SessionState::Paused;
            }
            self.emit(ClientEvent::Paused(media.cloned()));
        }
        Ok(response)
    }

    /// TEARDOWN one media, or (`None`) the whole session.
    pub(crate) fn send_teardown(
        &mut self,
        sh: &Shared,
        media: Option<&MediaDescription>,
    ) -> Result<Option<RtspMessage>> {
        let uri = match media {
            Some(md) => {
                let context = sh.media.lock().remove_context(md);
                context
                    .map(|c| c.control_uri.to_string())
                    .unwrap_or_else(|| md.absolute_control_uri(&self.location).to_string())
            }
            None => {
                let goodbyes = sh.media.lock().disconnect();
                if let Some(connection) = self.connection.as_mut() {
                    for frame in goodbyes {
                        if let Err(e) = connection.send(&frame) {
                            tracing::debug!(error = %e, "interleaved goodbye not sent");
                            break;
                        }
                    }
                }
                self.location.to_string()
            }
        };
        self.emit(ClientEvent::Stopped(media.cloned()));

        let response = self.send(sh, RtspMessage::request(RtspMethod::Teardown, &uri))?;
        if media.is_none() {
            self.stop_reader();
            sh.media.lock().clear_contexts();
            self.session_id = None;
            self.play_started = None;
            if self.is_connected() {
                self.lifecycle = SessionState::ConnectedIdle;
            }
        }
        Ok(response)
    }

    pub(crate) fn send_get_parameter(
        &mut self,
        sh: &Shared,
        body: Option<&str>,
        content_type: Option<&str>,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.send_parameter(sh, RtspMethod::GetParameter, body, content_type, force)
    }

    pub(crate) fn send_set_parameter(
        &mut self,
        sh: &Shared,
        body: Option<&str>,
        content_type: Option<&str>,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.send_parameter(sh, RtspMethod::SetParameter, body, content_type, force)
    }

    fn send_parameter(
        &mut self,
        sh: &Shared,
        method: RtspMethod,
        body: Option<&str>,
        content_type: Option<&str>,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        self.require(method, force)?;
        let mut request = RtspMessage::request(method, self.location.as_str());
        if let Some(content_type) = content_type {
            request.set_header("Content-Type", content_type);
        }
        request.set_body(body.unwrap_or_default().to_string());
        self.send(sh, request)
    }

    /// Connect, describe if needed, SETUP every media (or those of
    /// `media_type`) and PLAY the aggregate.
    pub(crate) fn start_playing(
        &mut self,
        sh: &Shared,
        start: Option<Duration>,
        end: Option<Duration>,
        media_type: Option<&MediaType>,
    ) -> Result<()> {
        self.connect()?;

        if self.description.is_none() {
            let options = self.send_options(sh, false)?;
            match status_of(&options) {
                Some(StatusCode::OK) => {}
                Some(status) => {
                    return Err(RtspError::Status {
                        status,
                        method: RtspMethod::Options,
                    });
                }
                None => return Err(RtspError::NoResponse(RtspMethod::Options)),
            }
            self.send_describe(sh)?;
        }
        let Some(description) = self.description.clone() else {
            return Err(RtspError::SessionDescription("no session description".to_string()));
        };

        let mut has_context = false;
        for md in description
            .media
            .iter()
            .filter(|md| media_type.is_none_or(|t| md.media_type == *t))
        {
            if sh.media.lock().context_for(md).is_some() {
                has_context = true;
                continue;
            }
            match self.setup_media(sh, md) {
                Ok(_) => has_context = true,
                Err(e) => {
                    tracing::warn!(media = %md.media_type, error = %e, "SETUP failed, skipping media");
                }
            }
        }
        if !has_context {
            return Err(RtspError::InvalidOperation("no media could be set up".to_string()));
        }

        let (media_start, media_end) = {
            let media = sh.media.lock();
            let contexts = media.contexts();
            let start = contexts.iter().filter_map(|c| c.media_start).min();
            let end = if contexts.iter().all(|c| c.media_end.is_some()) {
                contexts.iter().filter_map(|c| c.media_end).max()
            } else {
                None
            };
            (start, end)
        };
        let range = PlayRange::npt(start.or(media_start), end.or(media_end));

        let response = self.send_play(sh, None, &range, false)?;
        match status_of(&response) {
            None | Some(StatusCode::OK) => {
                self.lifecycle = SessionState::Playing;
                self.play_started = Some(std::time::Instant::now());
                tracing::info!(location = %self.location, carrier = %self.media_protocol, "playing");
                self.emit(ClientEvent::Playing(None));
                Ok(())
            }
            Some(status) => Err(RtspError::Status {
                status,
                method: RtspMethod::Play,
            }),
        }
    }

    /// PLAY one media, or start playing everything when not yet playing.
    pub(crate) fn play(&mut self, sh: &Shared, media: Option<&MediaDescription>, range: &PlayRange) -> Result<()> {
        if self.lifecycle != SessionState::Playing {
            return self.start_playing(sh, range.start, range.end, None);
        }
        let Some(md) = media else {
            return Ok(());
        };

        if sh.media.lock().context_for(md).is_none() {
            self.setup_media(sh, md)?;
        }
        let response = self.send_play(sh, Some(md), range, false)?;
        match status_of(&response) {
            None | Some(StatusCode::OK) => {
                self.emit(ClientEvent::Playing(Some(md.clone())));
                Ok(())
            }
            Some(status) => Err(RtspError::Status {
                status,
                method: RtspMethod::Play,
            }),
        }
    }

    /// PAUSE while playing; a no-op otherwise or for media never set up.
    pub(crate) fn pause(&mut self, sh: &Shared, media: Option<&MediaDescription>, force: bool) -> Result<()> {
        if self.lifecycle != SessionState::Playing {
            return Ok(());
        }
        if let Some(md) = media
            && !force
            && sh.media.lock().context_for(md).is_none()
        {
            return Ok(());
        }
        self.send_pause(sh, media, force)?;
        Ok(())
    }

    pub(crate) fn stop_playing(&mut self, sh: &Shared) {
        if matches!(self.lifecycle, SessionState::Playing | SessionState::Paused) {
            self.disconnect(sh);
        }
    }
}
