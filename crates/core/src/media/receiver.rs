use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::media::context::{ContextStats, TransportContext};
use crate::media::rtp;
use crate::protocol::MediaDescription;

/// Poll interval of the UDP receiver threads.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// `$` + channel + 16-bit length (RFC 2326 §10.12).
const FRAME_HEADER_LEN: usize = 4;

/// Sockets and receiver threads of one datagram context.
///
/// The port pair is bound when the context is registered, so it stays
/// reserved while later media probe for their own pairs.
#[derive(Debug)]
struct DatagramPorts {
    context: Arc<TransportContext>,
    rtp: Option<Arc<UdpSocket>>,
    rtcp: Option<Arc<UdpSocket>>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl DatagramPorts {
    fn bind(context: Arc<TransportContext>) -> Option<Self> {
        let (rtp_port, rtcp_port) = context.client_ports?;
        let ip = context
            .local_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let rtp = bind_media(ip, rtp_port)
            .inspect_err(|e| tracing::warn!(port = rtp_port, error = %e, "unable to bind RTP port"))
            .ok();
        let rtcp = bind_media(ip, rtcp_port)
            .inspect_err(|e| tracing::warn!(port = rtcp_port, error = %e, "unable to bind RTCP port"))
            .ok();
        Some(DatagramPorts {
            context,
            rtp,
            rtcp,
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        })
    }

    fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        self.running = Arc::new(AtomicBool::new(true));
        for (socket, rtcp) in [(&self.rtp, false), (&self.rtcp, true)] {
            let Some(socket) = socket else { continue };
            match spawn_receiver(socket.clone(), self.context.stats.clone(), self.running.clone(), rtcp) {
                Ok(handle) => self.workers.push(handle),
                Err(e) => tracing::warn!(error = %e, "unable to spawn media receiver"),
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    fn send_goodbye(&self) {
        let (Some(socket), Some(remote), Some((_, rtcp_port))) = (
            &self.rtcp,
            self.context.remote_addr,
            self.context.server_ports,
        ) else {
            return;
        };
        let bye = rtp::goodbye(self.context.local_ssrc);
        if let Err(e) = socket.send_to(&bye, SocketAddr::new(remote, rtcp_port)) {
            tracing::debug!(error = %e, "RTCP goodbye not sent");
        }
    }
}

impl Drop for DatagramPorts {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Receives media for the negotiated transport contexts.
///
/// Datagram contexts get one thread per bound port while the receiver is
/// connected; interleaved contexts are fed by the client through
/// [`process_frame_data`](Self::process_frame_data). Only counters are
/// kept; payloads are dropped.
#[derive(Debug, Default)]
pub struct MediaReceiver {
    contexts: Vec<Arc<TransportContext>>,
    ports: Vec<DatagramPorts>,
    started: Option<Instant>,
    active: bool,
    /// Interleaved frame split across reads.
    pending: Vec<u8>,
}

impl MediaReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context. A datagram context binds its port pair now and
    /// starts receiving if the receiver is connected.
    pub fn add_context(&mut self, context: TransportContext) -> Arc<TransportContext> {
        let context = Arc::new(context);
        tracing::debug!(
            control = %context.control_uri,
            interleaved = context.interleaved,
            channel = context.data_channel,
            client_ports = ?context.client_ports,
            "transport context added"
        );
        self.contexts.push(context.clone());
        if !context.interleaved
            && let Some(mut ports) = DatagramPorts::bind(context.clone())
        {
            if self.active {
                ports.start();
            }
            self.ports.push(ports);
        }
        context
    }

    pub fn contexts(&self) -> &[Arc<TransportContext>] {
        &self.contexts
    }

    pub fn last_context(&self) -> Option<&Arc<TransportContext>> {
        self.contexts.last()
    }

    /// Highest client port held by a datagram context.
    pub fn highest_client_port(&self) -> Option<u16> {
        self.contexts
            .iter()
            .filter_map(|c| c.client_ports)
            .map(|(rtp, rtcp)| rtp.max(rtcp))
            .max()
    }

    pub fn context_for(&self, media: &MediaDescription) -> Option<&Arc<TransportContext>> {
        self.contexts.iter().find(|c| c.media == *media)
    }

    /// Forget the context for one media, stopping its receivers and
    /// releasing its ports.
    pub fn remove_context(&mut self, media: &MediaDescription) -> Option<Arc<TransportContext>> {
        let pos = self.contexts.iter().position(|c| c.media == *media)?;
        self.ports.retain(|p| p.context.media != *media);
        Some(self.contexts.remove(pos))
    }

    /// Number of datagram contexts with receiver threads running.
    pub fn receiving_contexts(&self) -> usize {
        self.ports.iter().filter(|p| !p.workers.is_empty()).count()
    }

    /// Stop receiving and drop every context.
    pub fn clear_contexts(&mut self) {
        self.stop_workers();
        self.ports.clear();
        self.contexts.clear();
        self.pending.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start receiving on every datagram context.
    pub fn connect(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.started = Some(Instant::now());
        for ports in &mut self.ports {
            ports.start();
        }
        tracing::info!(contexts = self.contexts.len(), "media receiver started");
    }

    /// How long the receiver has been running.
    pub fn uptime(&self) -> Duration {
        match (self.active, self.started) {
            (true, Some(started)) => started.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.contexts.iter().map(|c| c.stats.total_bytes()).sum()
    }

    /// Stop receiving. Contexts keep their ports until removed.
    ///
    /// Sends an RTCP goodbye to the server of every datagram context and
    /// returns framed goodbyes for interleaved contexts, which the caller
    /// writes to the control stream.
    pub fn disconnect(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if !self.active {
            return frames;
        }

        for ports in &self.ports {
            ports.send_goodbye();
        }
        for context in self.contexts.iter().filter(|c| c.interleaved) {
            frames.push(frame(context.control_channel, &rtp::goodbye(context.local_ssrc)));
        }

        self.stop_workers();
        self.pending.clear();
        tracing::info!("media receiver stopped");
        frames
    }

    /// Consume interleaved frames from the start of `data`.
    ///
    /// Returns how many bytes were consumed. Consumption stops at the first
    /// byte that does not start a frame; a frame cut off by the end of
    /// `data` is kept and completed by the next call.
    pub fn process_frame_data(&mut self, data: &[u8]) -> usize {
        let mut pos = 0;

        if !self.pending.is_empty() {
            while self.pending.len() < FRAME_HEADER_LEN && pos < data.len() {
                self.pending.push(data[pos]);
                pos += 1;
            }
            if self.pending.len() < FRAME_HEADER_LEN {
                return pos;
            }
            let total = FRAME_HEADER_LEN + frame_len(&self.pending);
            let take = (total - self.pending.len()).min(data.len() - pos);
            self.pending.extend_from_slice(&data[pos..pos + take]);
            pos += take;
            if self.pending.len() < total {
                return pos;
            }
            let frame = std::mem::take(&mut self.pending);
            self.deliver(frame[1], &frame[FRAME_HEADER_LEN..]);
        }

        while pos < data.len() && data[pos] == b'$' {
            let rest = &data[pos..];
            if rest.len() < FRAME_HEADER_LEN
                || rest.len() < FRAME_HEADER_LEN + frame_len(rest)
            {
                self.pending = rest.to_vec();
                return data.len();
            }
            let end = FRAME_HEADER_LEN + frame_len(rest);
            self.deliver(rest[1], &rest[FRAME_HEADER_LEN..end]);
            pos += end;
        }
        pos
    }

    /// True while an interleaved frame is only partly received.
    pub fn has_pending_frame(&self) -> bool {
        !self.pending.is_empty()
    }

    fn deliver(&self, channel: u8, payload: &[u8]) {
        let context = self.contexts.iter().find(|c| {
            c.interleaved && (c.data_channel == channel || c.control_channel == channel)
        });
        match context {
            Some(c) if c.data_channel == channel => c.stats.record_data(payload),
            Some(c) => c.stats.record_rtcp(payload),
            None => tracing::trace!(channel, len = payload.len(), "frame for unknown channel"),
        }
    }

    fn stop_workers(&mut self) {
        self.active = false;
        for ports in &mut self.ports {
            ports.stop();
        }
        self.started = None;
    }
}

fn frame_len(header: &[u8]) -> usize {
    u16::from_be_bytes([header[2], header[3]]) as usize
}

/// Wrap `payload` in an interleaved frame.
pub fn frame(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.push(b'$');
    out.push(channel);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn bind_media(ip: IpAddr, port: u16) -> io::Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(SocketAddr::new(ip, port))?;
    socket.set_read_timeout(Some(RECEIVE_POLL))?;
    Ok(Arc::new(socket))
}

fn spawn_receiver(
    socket: Arc<UdpSocket>,
    stats: Arc<ContextStats>,
    running: Arc<AtomicBool>,
    rtcp: bool,
) -> io::Result<JoinHandle<()>> {
    let port = socket.local_addr()?.port();
    thread::Builder::new()
        .name(format!("media-udp-{port}"))
        .spawn(move || {
            let mut buf = [0u8; 2048];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((n, _)) if rtcp => stats.record_rtcp(&buf[..n]),
                    Ok((n, _)) => stats.record_data(&buf[..n]),
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        tracing::warn!(port, error = %e, "media receive error");
                        break;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionDescription;
    use url::Url;

    fn media() -> MediaDescription {
        SessionDescription::parse("v=0\r\nm=video 0 RTP/AVP 96\r\na=control:trackID=1\r\n")
            .unwrap()
            .media
            .remove(0)
    }

    fn interleaved_receiver() -> (MediaReceiver, Arc<TransportContext>) {
        let mut receiver = MediaReceiver::new();
        let ctx = receiver.add_context(TransportContext::interleaved(
            media(),
            Url::parse("rtsp://127.0.0.1/live/trackID=1").unwrap(),
            (0, 1),
            Duration::from_secs(5),
        ));
        (receiver, ctx)
    }

    fn rtp_packet() -> Vec<u8> {
        let mut p = vec![0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 9];
        p.extend_from_slice(&[0xAB; 8]);
        p
    }

    #[test]
    fn consumes_frames_and_stops_at_text() {
        let (mut receiver, ctx) = interleaved_receiver();
        let mut data = frame(0, &rtp_packet());
        data.extend(frame(1, &rtp::goodbye(3)));
        data.extend_from_slice(b"RTSP/1.0 200 OK\r\n\r\n");

        let used = receiver.process_frame_data(&data);
        assert_eq!(&data[used..], b"RTSP/1.0 200 OK\r\n\r\n");
        assert_eq!(ctx.stats.rtp_packets(), 1);
        assert_eq!(ctx.stats.rtcp_packets(), 1);
        assert_eq!(receiver.total_bytes_received(), 20 + 16);
    }

    #[test]
    fn frame_split_across_calls_is_completed() {
        let (mut receiver, ctx) = interleaved_receiver();
        let data = frame(0, &rtp_packet());

        assert_eq!(receiver.process_frame_data(&data[..2]), 2);
        assert_eq!(receiver.process_frame_data(&data[2..10]), 8);
        assert_eq!(ctx.stats.rtp_packets(), 0);

        let mut rest = data[10..].to_vec();
        rest.extend_from_slice(b"OPTIONS");
        assert_eq!(receiver.process_frame_data(&rest), data.len() - 10);
        assert_eq!(ctx.stats.rtp_packets(), 1);
    }

    #[test]
    fn text_is_not_consumed() {
        let (mut receiver, _) = interleaved_receiver();
        assert_eq!(receiver.process_frame_data(b"RTSP/1.0 200 OK\r\n"), 0);
    }

    #[test]
    fn datagram_context_receives_udp() {
        let port = crate::transport::find_open_port(Ipv4Addr::LOCALHOST.into(), 30000).unwrap();
        let mut receiver = MediaReceiver::new();
        let ctx = receiver.add_context(datagram_context(port));
        receiver.connect();
        assert!(receiver.is_active());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while ctx.stats.rtp_packets() == 0 && Instant::now() < deadline {
            sender.send_to(&rtp_packet(), ("127.0.0.1", port)).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        assert!(ctx.stats.rtp_packets() > 0);

        receiver.disconnect();
        assert!(!receiver.is_active());
        assert_eq!(receiver.uptime(), Duration::ZERO);
    }

    fn datagram_context(port: u16) -> TransportContext {
        TransportContext::datagram(
            media(),
            Url::parse("rtsp://127.0.0.1/live/trackID=1").unwrap(),
            Ipv4Addr::LOCALHOST.into(),
            Ipv4Addr::LOCALHOST.into(),
            (port, port + 1),
            None,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn added_context_reserves_its_ports() {
        let port = crate::transport::find_open_port(Ipv4Addr::LOCALHOST.into(), 31000).unwrap();
        let mut receiver = MediaReceiver::new();
        receiver.add_context(datagram_context(port));

        assert_eq!(receiver.highest_client_port(), Some(port + 1));
        assert!(UdpSocket::bind(("127.0.0.1", port)).is_err());
        let next = crate::transport::find_open_port(Ipv4Addr::LOCALHOST.into(), port).unwrap();
        assert!(next > port + 1);
    }

    #[test]
    fn removed_context_stops_receiving_and_frees_ports() {
        let port = crate::transport::find_open_port(Ipv4Addr::LOCALHOST.into(), 32000).unwrap();
        let mut receiver = MediaReceiver::new();
        receiver.add_context(datagram_context(port));
        receiver.connect();
        assert_eq!(receiver.receiving_contexts(), 1);

        assert!(receiver.remove_context(&media()).is_some());
        assert_eq!(receiver.receiving_contexts(), 0);
        assert!(receiver.contexts().is_empty());
        UdpSocket::bind(("127.0.0.1", port)).unwrap();
        UdpSocket::bind(("127.0.0.1", port + 1)).unwrap();
    }

    #[test]
    fn disconnect_returns_interleaved_goodbyes() {
        let (mut receiver, _) = interleaved_receiver();
        assert!(receiver.disconnect().is_empty());
        receiver.connect();
        let frames = receiver.disconnect();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..2], &[b'$', 1]);
        assert!(rtp::is_rtcp(&frames[0][4..]));
    }
}
