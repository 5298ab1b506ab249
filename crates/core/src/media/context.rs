use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use url::Url;

use crate::media::rtp::{self, RtpHeader};
use crate::protocol::MediaDescription;

/// Receive counters for one transport context.
///
/// Shared between the client and the receiver threads; all updates are
/// lock-free except the two timestamps.
#[derive(Debug, Default)]
pub struct ContextStats {
    rtp_packets: AtomicU64,
    rtp_bytes: AtomicU64,
    rtcp_packets: AtomicU64,
    rtcp_bytes: AtomicU64,
    last_sequence: AtomicU64,
    first_receive: Mutex<Option<Instant>>,
    last_receive: Mutex<Option<Instant>>,
}

impl ContextStats {
    pub fn record_rtp(&self, packet: &[u8]) {
        self.rtp_packets.fetch_add(1, Ordering::Relaxed);
        self.rtp_bytes.fetch_add(packet.len() as u64, Ordering::Relaxed);
        if let Some(header) = RtpHeader::parse(packet) {
            self.last_sequence
                .store(header.sequence as u64, Ordering::Relaxed);
        }
        self.touch();
    }

    pub fn record_rtcp(&self, packet: &[u8]) {
        self.rtcp_packets.fetch_add(1, Ordering::Relaxed);
        self.rtcp_bytes.fetch_add(packet.len() as u64, Ordering::Relaxed);
        self.touch();
    }

    /// Record a packet on the data port, which may also carry muxed RTCP.
    pub fn record_data(&self, packet: &[u8]) {
        if rtp::is_rtcp(packet) {
            self.record_rtcp(packet);
        } else {
            self.record_rtp(packet);
        }
    }

    fn touch(&self) {
        let now = Instant::now();
        self.first_receive.lock().get_or_insert(now);
        *self.last_receive.lock() = Some(now);
    }

    pub fn rtp_packets(&self) -> u64 {
        self.rtp_packets.load(Ordering::Relaxed)
    }

    pub fn rtp_bytes(&self) -> u64 {
        self.rtp_bytes.load(Ordering::Relaxed)
    }

    pub fn rtcp_packets(&self) -> u64 {
        self.rtcp_packets.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.rtp_bytes() + self.rtcp_bytes.load(Ordering::Relaxed)
    }

    /// Sequence number of the most recent RTP packet.
    pub fn last_sequence(&self) -> Option<u16> {
        (self.rtp_packets() > 0).then(|| self.last_sequence.load(Ordering::Relaxed) as u16)
    }

    pub fn first_receive(&self) -> Option<Instant> {
        *self.first_receive.lock()
    }

    pub fn last_receive(&self) -> Option<Instant> {
        *self.last_receive.lock()
    }
}

/// Negotiated per-media transport state, created from a SETUP answer.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub media: MediaDescription,
    /// Absolute control URL the SETUP was sent to.
    pub control_uri: Url,
    pub interleaved: bool,
    /// Interleaved channel for RTP (also the context's identity on the stream).
    pub data_channel: u8,
    /// Interleaved channel for RTCP.
    pub control_channel: u8,
    pub local_addr: Option<IpAddr>,
    pub remote_addr: Option<IpAddr>,
    /// Client RTP/RTCP ports (datagram mode).
    pub client_ports: Option<(u16, u16)>,
    /// Server RTP/RTCP ports (datagram mode).
    pub server_ports: Option<(u16, u16)>,
    /// Sender SSRC announced in the `Transport` answer.
    pub remote_ssrc: Option<u32>,
    /// Our SSRC, used in RTCP goodbyes.
    pub local_ssrc: u32,
    pub unicast: bool,
    /// Longest gap between packets before the context counts as stalled.
    pub receive_interval: Duration,
    pub media_start: Option<Duration>,
    pub media_end: Option<Duration>,
    pub created: Instant,
    pub stats: Arc<ContextStats>,
}

impl TransportContext {
    /// Context for media interleaved on the control stream.
    pub fn interleaved(
        media: MediaDescription,
        control_uri: Url,
        channels: (u8, u8),
        receive_interval: Duration,
    ) -> Self {
        let (media_start, media_end) = media.range().unwrap_or((None, None));
        TransportContext {
            media,
            control_uri,
            interleaved: true,
            data_channel: channels.0,
            control_channel: channels.1,
            local_addr: None,
            remote_addr: None,
            client_ports: None,
            server_ports: None,
            remote_ssrc: None,
            local_ssrc: rtp::random_ssrc(),
            unicast: true,
            receive_interval,
            media_start,
            media_end,
            created: Instant::now(),
            stats: Arc::new(ContextStats::default()),
        }
    }

    /// Context for media on its own UDP port pair.
    pub fn datagram(
        media: MediaDescription,
        control_uri: Url,
        local_addr: IpAddr,
        remote_addr: IpAddr,
        client_ports: (u16, u16),
        server_ports: Option<(u16, u16)>,
        receive_interval: Duration,
    ) -> Self {
        TransportContext {
            interleaved: false,
            local_addr: Some(local_addr),
            remote_addr: Some(remote_addr),
            client_ports: Some(client_ports),
            server_ports,
            ..Self::interleaved(media, control_uri, (0, 1), receive_interval)
        }
    }

    /// True when the media profile is RTP based.
    pub fn is_rtp_enabled(&self) -> bool {
        self.media.protocol.to_ascii_uppercase().contains("RTP")
    }

    /// True when the media has no end time.
    pub fn is_continuous(&self) -> bool {
        self.media_end.is_none()
    }

    /// How long media has been arriving on this context.
    pub fn time_receiving(&self) -> Duration {
        self.stats
            .first_receive()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// True once a finite media has been received for its whole length.
    pub fn has_ended(&self) -> bool {
        match self.media_end {
            Some(end) => {
                let played = end.saturating_sub(self.media_start.unwrap_or_default());
                self.stats.first_receive().is_some() && self.time_receiving() >= played
            }
            None => false,
        }
    }

    /// True when nothing arrived within `receive_interval`.
    pub fn is_stalled(&self) -> bool {
        let since = match self.stats.last_receive() {
            Some(last) => last.elapsed(),
            None => self.created.elapsed(),
        };
        since > self.receive_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionDescription;

    fn media(range: bool) -> MediaDescription {
        let sdp = format!(
            "v=0\r\nm=video 0 RTP/AVP 96\r\na=control:trackID=1\r\n{}",
            if range { "a=range:npt=0-0.010\r\n" } else { "" }
        );
        SessionDescription::parse(&sdp).unwrap().media.remove(0)
    }

    fn url() -> Url {
        Url::parse("rtsp://127.0.0.1/live/trackID=1").unwrap()
    }

    #[test]
    fn stats_split_rtp_and_rtcp() {
        let ctx = TransportContext::interleaved(media(false), url(), (0, 1), Duration::from_secs(1));
        let mut rtp = vec![0x80, 96, 0, 7, 0, 0, 0, 1, 0, 0, 0, 2];
        rtp.extend_from_slice(&[0u8; 20]);
        ctx.stats.record_data(&rtp);
        ctx.stats.record_data(&rtp::goodbye(5));

        assert_eq!(ctx.stats.rtp_packets(), 1);
        assert_eq!(ctx.stats.rtcp_packets(), 1);
        assert_eq!(ctx.stats.rtp_bytes(), 32);
        assert_eq!(ctx.stats.total_bytes(), 48);
        assert_eq!(ctx.stats.last_sequence(), Some(7));
        assert!(ctx.stats.last_receive().is_some());
    }

    #[test]
    fn stalled_without_packets_after_interval() {
        let ctx = TransportContext::interleaved(media(false), url(), (0, 1), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_stalled());

        let ctx = TransportContext::interleaved(media(false), url(), (0, 1), Duration::from_secs(60));
        assert!(!ctx.is_stalled());
        assert!(ctx.is_continuous());
        assert!(ctx.is_rtp_enabled());
    }

    #[test]
    fn finite_media_ends() {
        let ctx = TransportContext::interleaved(media(true), url(), (0, 1), Duration::from_secs(1));
        assert_eq!(ctx.media_end, Some(Duration::from_millis(10)));
        assert!(!ctx.has_ended());
        ctx.stats.record_rtp(&[0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
        std::thread::sleep(Duration::from_millis(20));
        assert!(ctx.has_ended());
    }

    #[test]
    fn datagram_context_keeps_ports() {
        let ctx = TransportContext::datagram(
            media(false),
            url(),
            "127.0.0.1".parse().unwrap(),
            "10.0.0.9".parse().unwrap(),
            (10000, 10001),
            Some((6970, 6971)),
            Duration::from_secs(1),
        );
        assert!(!ctx.interleaved);
        assert_eq!(ctx.client_ports, Some((10000, 10001)));
        assert_eq!(ctx.server_ports, Some((6970, 6971)));
    }
}
