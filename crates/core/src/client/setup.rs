//! SETUP negotiation: pick a transport for one media, send it, and turn the
//! server's answer into a [`TransportContext`].

use std::net::{IpAddr, Ipv4Addr};

use crate::client::Shared;
use crate::client::state::{ClientState, SessionState};
use crate::error::{Result, RtspError};
use crate::media::{MediaProtocol, TransportContext};
use crate::protocol::{MediaDescription, RtspMessage, RtspMethod, StatusCode, TransportHeader};
use crate::transport::find_open_port;

impl ClientState {
    /// SETUP one media on the current carrier, falling back to interleaved
    /// when the server refuses or redirects the transport.
    pub(crate) fn setup_media(&mut self, sh: &Shared, media: &MediaDescription) -> Result<RtspMessage> {
        self.negotiate(sh, media, true)
    }

    fn negotiate(&mut self, sh: &Shared, media: &MediaDescription, retry_session: bool) -> Result<RtspMessage> {
        self.require(RtspMethod::Setup, false)?;

        let control_uri = media.absolute_control_uri(&self.location);
        let local_ip = self.local_ip();
        let offer = self.offer(sh, media, local_ip)?;
        if !self.tried_protocols.contains(&self.media_protocol) {
            self.tried_protocols.push(self.media_protocol);
        }

        let request = RtspMessage::request(RtspMethod::Setup, control_uri.as_str())
            .with_header("Transport", &offer.to_string());
        let response = self
            .send(sh, request)?
            .ok_or(RtspError::NoResponse(RtspMethod::Setup))?;

        match response.status() {
            Some(StatusCode::OK) => {}
            Some(StatusCode::UNSUPPORTED_TRANSPORT) if self.can_interleave() => {
                tracing::info!(media = %media.media_type, "transport refused, retrying interleaved");
                return self.switch_to_interleaved(sh, media, retry_session);
            }
            Some(StatusCode::SESSION_NOT_FOUND) if retry_session => {
                tracing::info!(session_id = ?self.session_id, "session not found, starting a new one");
                let teardown = RtspMessage::request(RtspMethod::Teardown, self.location.as_str());
                if let Err(e) = self.send(sh, teardown) {
                    tracing::debug!(error = %e, "TEARDOWN of stale session failed");
                }
                self.session_id = None;
                return self.negotiate(sh, media, false);
            }
            status => {
                return Err(RtspError::Status {
                    status: status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                    method: RtspMethod::Setup,
                });
            }
        }

        let value = response
            .header("Transport")
            .ok_or_else(|| RtspError::InvalidTransport("missing in SETUP response".to_string()))?;
        let answer =
            TransportHeader::parse(value).map_err(|_| RtspError::InvalidTransport(value.to_string()))?;

        let control_port = self.remote.map(|r| r.port());
        let redirected = answer.is_interleaved()
            || answer.server_port.is_some_and(|(rtp, _)| Some(rtp) == control_port);
        if redirected && self.can_interleave() {
            tracing::info!(media = %media.media_type, "server answered interleaved, switching");
            return self.switch_to_interleaved(sh, media, retry_session);
        }

        let receive_interval = self.config.media_receive_interval;
        let mut context = match (answer.interleaved, offer.interleaved) {
            (Some(channels), _) | (None, Some(channels)) => {
                TransportContext::interleaved(media.clone(), control_uri, channels, receive_interval)
            }
            (None, None) => {
                let client_ports = answer
                    .client_port
                    .or(offer.client_port)
                    .ok_or_else(|| RtspError::InvalidTransport(value.to_string()))?;
                let remote_ip = answer
                    .source
                    .as_deref()
                    .and_then(|s| s.parse::<IpAddr>().ok())
                    .or_else(|| self.remote.map(|r| r.ip()))
                    .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
                TransportContext::datagram(
                    media.clone(),
                    control_uri,
                    local_ip,
                    remote_ip,
                    client_ports,
                    answer.server_port,
                    receive_interval,
                )
            }
        };
        context.remote_ssrc = answer.ssrc;
        context.unicast = answer.unicast;
        sh.media.lock().add_context(context);

        if self.lifecycle == SessionState::ConnectedIdle {
            self.lifecycle = SessionState::Ready;
        }
        Ok(response)
    }

    /// The `Transport` header to offer for `media` on the current carrier.
    fn offer(&mut self, sh: &Shared, media: &MediaDescription, local_ip: IpAddr) -> Result<TransportHeader> {
        match self.media_protocol {
            MediaProtocol::Tcp => {
                let channels = sh
                    .media
                    .lock()
                    .last_context()
                    .filter(|c| c.interleaved)
                    .map_or((0, 1), |c| {
                        (c.data_channel.wrapping_add(2), c.control_channel.wrapping_add(2))
                    });
                Ok(TransportHeader::interleaved(channels.0, channels.1))
            }
            MediaProtocol::Ip if !media.protocol.eq_ignore_ascii_case("RTP/AVP") => {
                Ok(TransportHeader::raw(&media.protocol))
            }
            MediaProtocol::Udp | MediaProtocol::Ip => {
                // Plain RTP/AVP has nothing to negotiate beyond UDP ports.
                self.media_protocol = MediaProtocol::Udp;
                // Pairs held by earlier media stay reserved; probe past them.
                let floor = sh
                    .media
                    .lock()
                    .highest_client_port()
                    .and_then(|p| p.checked_add(1))
                    .map_or(self.config.udp_port_floor, |p| p.max(self.config.udp_port_floor));
                let port = find_open_port(local_ip, floor).ok_or(RtspError::NoOpenPort(floor))?;
                Ok(TransportHeader::udp(port, port + 1))
            }
        }
    }

    fn switch_to_interleaved(
        &mut self,
        sh: &Shared,
        media: &MediaDescription,
        retry_session: bool,
    ) -> Result<RtspMessage> {
        sh.media.lock().clear_contexts();
        self.media_protocol = MediaProtocol::Tcp;
        self.negotiate(sh, media, retry_session)
    }

    /// Interleaving needs a stream carrier, and is pointless if already in use.
    fn can_interleave(&self) -> bool {
        self.carrier.is_stream() && self.media_protocol != MediaProtocol::Tcp
    }

    fn local_ip(&self) -> IpAddr {
        self.connection
            .as_ref()
            .and_then(|c| c.local_addr().ok())
            .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |a| a.ip())
    }
}
