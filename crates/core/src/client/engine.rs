//! Transaction engine: send one request, wait for its response.
//!
//! Inbound bytes are split between the media receiver (`$` frames) and the
//! demultiplexer, which parses RTSP text into an [`InterleaveSignal`]. The
//! engine either reads the socket itself or, while an interleaved reader
//! thread owns the stream, waits on the signal.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::client::Shared;
use crate::client::state::ClientState;
use crate::config::{DEFAULT_SESSION_TIMEOUT, MAX_SESSION_TIMEOUT};
use crate::error::Result;
use crate::events::ClientEvent;
use crate::media::MediaReceiver;
use crate::protocol::headers::{SessionHeader, SessionTimeout};
use crate::protocol::{RtspMessage, RtspMethod, StatusCode};
use crate::transport::{Carrier, tcp};

/// Read timeout of the interleaved reader thread, bounding how long
/// stopping it can take.
const READER_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Inbox {
    /// Message whose head or body is still arriving.
    pending: Option<RtspMessage>,
    responses: VecDeque<RtspMessage>,
    signaled: bool,
}

impl Inbox {
    /// Parse RTSP text from the start of `data`; stops at a `$` frame.
    fn demux(&mut self, data: &[u8]) -> usize {
        let mut pos = 0;
        while pos < data.len() {
            if let Some(mut pending) = self.pending.take() {
                match pending.complete_from(&data[pos..]) {
                    Ok(used) => {
                        pos += used;
                        if pending.is_complete() {
                            self.accept(pending);
                        } else {
                            self.pending = Some(pending);
                            return data.len();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding incomplete message");
                    }
                }
                continue;
            }

            let rest = &data[pos..];
            if rest[0] == b'$' {
                break;
            }
            match RtspMessage::parse(rest) {
                Ok((message, used)) => {
                    pos += used;
                    if message.is_complete() {
                        self.accept(message);
                    } else {
                        self.pending = Some(message);
                    }
                }
                Err(e) => {
                    // Skip to the next frame marker; anything before it is garbage.
                    let skip = rest
                        .iter()
                        .skip(1)
                        .position(|b| *b == b'$')
                        .map_or(rest.len(), |p| p + 1);
                    tracing::debug!(error = %e, skipped = skip, "discarding unparsable data");
                    pos += skip;
                }
            }
        }
        pos
    }

    fn accept(&mut self, message: RtspMessage) {
        if message.is_response() {
            tracing::trace!(cseq = ?message.cseq(), status = ?message.status(), "response demultiplexed");
            self.responses.push_back(message);
            self.signaled = true;
        } else {
            tracing::debug!(method = ?message.method(), "ignoring request from server");
        }
    }
}

/// Level-triggered signal raised when a complete response has been
/// demultiplexed.
#[derive(Debug, Default)]
pub(crate) struct InterleaveSignal {
    inbox: Mutex<Inbox>,
    ready: Condvar,
}

impl InterleaveSignal {
    /// Clear the signal and drop unclaimed responses.
    pub(crate) fn reset(&self) {
        let mut inbox = self.inbox.lock();
        inbox.responses.clear();
        inbox.signaled = false;
    }

    /// Also forget a half-received message (after the connection closes).
    pub(crate) fn clear(&self) {
        let mut inbox = self.inbox.lock();
        *inbox = Inbox::default();
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.inbox.lock().pending.is_some()
    }

    pub(crate) fn demux(&self, data: &[u8]) -> usize {
        let mut inbox = self.inbox.lock();
        let used = inbox.demux(data);
        if inbox.signaled {
            self.ready.notify_all();
        }
        used
    }

    /// Wait until signaled or `timeout` passes. Returns the signal state.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut inbox = self.inbox.lock();
        while !inbox.signaled {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut inbox, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut inbox),
            }
        }
        inbox.signaled
    }

    /// Claim the response for `cseq`, or one without a CSeq. Responses to
    /// older requests are dropped.
    pub(crate) fn take_response(&self, cseq: u32) -> Option<RtspMessage> {
        let mut inbox = self.inbox.lock();
        inbox
            .responses
            .retain(|r| r.cseq().is_none_or(|c| c >= cseq));
        let pos = inbox
            .responses
            .iter()
            .position(|r| r.cseq().is_none_or(|c| c == cseq))?;
        let response = inbox.responses.remove(pos);
        if inbox.responses.is_empty() {
            inbox.signaled = false;
        }
        response
    }
}

/// Hand inbound bytes to the media receiver or the demultiplexer.
pub(crate) fn route(media: &Mutex<MediaReceiver>, inbox: &InterleaveSignal, mut data: &[u8]) {
    while !data.is_empty() {
        let used = {
            let mut media = media.lock();
            if media.has_pending_frame() || (data[0] == b'$' && !inbox.has_pending()) {
                media.process_frame_data(data)
            } else {
                drop(media);
                inbox.demux(data)
            }
        };
        if used == 0 {
            tracing::trace!(len = data.len(), "dropping unroutable bytes");
            break;
        }
        data = &data[used..];
    }
}

/// Thread reading the control stream while media is interleaved on it.
#[derive(Debug)]
pub(crate) struct ReaderHandle {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ReaderHandle {
    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

impl ClientState {
    /// Send a request and wait for the matching response.
    ///
    /// Transport faults (connect, write, no answer) yield `Ok(None)`; they
    /// are logged, not raised.
    pub(crate) fn send(&mut self, sh: &Shared, mut request: RtspMessage) -> Result<Option<RtspMessage>> {
        if self.connection.is_none() {
            if let Err(e) = self.connect() {
                tracing::warn!(location = %self.location, error = %e, "unable to connect");
                return Ok(None);
            }
        }

        let had_authorization = request.contains_header("Authorization");
        self.decorate(&mut request);
        let method = request.method().unwrap_or(RtspMethod::Options);
        let cseq = request.cseq().unwrap_or_default();

        let bytes = match self.carrier {
            Carrier::Http => request.to_http_bytes(self.location.path(), &self.tunnel_cookie),
            _ => request.to_bytes(),
        };

        sh.inbox.reset();
        let Some(connection) = self.connection.as_mut() else {
            return Ok(None);
        };
        if let Err(e) = connection.send(&bytes) {
            tracing::warn!(%method, cseq, error = %e, "unable to send request");
            return Ok(None);
        }

        request.mark_transferred();
        self.bytes_sent += bytes.len() as u64;
        self.last_transmitted = Some(request.clone());
        self.emit(ClientEvent::RequestSent(request.clone()));
        tracing::debug!(%method, cseq, session_id = ?self.session_id, "request sent");

        let Some(response) = self.await_response(sh, cseq) else {
            tracing::debug!(%method, cseq, "no response");
            return Ok(None);
        };
        let status = response.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::debug!(%method, cseq, status = status.0, "response received");
        self.bytes_received += response.to_bytes().len() as u64;
        self.last_transmitted = Some(response.clone());

        if status == StatusCode::UNAUTHORIZED && !had_authorization {
            if let Some(retry) = self.answer_challenge(&request, &response) {
                return self.send(sh, retry);
            }
        }

        match status {
            StatusCode::NOT_IMPLEMENTED => {
                tracing::info!(%method, "server does not implement method");
                self.supported.retain(|m| *m != method);
            }
            StatusCode::METHOD_NOT_VALID_IN_THIS_STATE if response.contains_header("Allow") => {
                if let Err(e) = self.switch_protocols(sh) {
                    tracing::warn!(error = %e, "protocol switch after 455 failed");
                }
            }
            _ => {}
        }

        if method != RtspMethod::Teardown && self.session_id.is_none() {
            self.adopt_session(&response);
        }

        self.emit(ClientEvent::ResponseReceived {
            request,
            response: response.clone(),
        });
        Ok(Some(response))
    }

    fn decorate(&mut self, request: &mut RtspMessage) {
        if !request.contains_header("User-Agent") {
            request.set_header("User-Agent", &self.config.user_agent);
        }
        if !request.contains_header("Authorization") {
            let method = request.method().map(|m| m.as_str()).unwrap_or("OPTIONS");
            let uri = request.uri().unwrap_or("*").to_string();
            if let Some(value) = self.auth.preemptive(method, &uri, request.body()) {
                request.set_header("Authorization", &value);
            }
        }
        if !request.contains_header("Content-Encoding") {
            request.set_header("Content-Encoding", "utf-8");
        }
        if !request.contains_header("Blocksize") {
            request.set_header("Blocksize", &self.config.buffer_size.to_string());
        }
        if let Some(id) = &self.session_id {
            request.set_header("Session", id);
        }
        if request.cseq().is_none() {
            let cseq = self.next_cseq();
            request.set_cseq(cseq);
        }
        for (name, value) in &self.config.additional_headers {
            request.append_or_set_header(name, value);
        }
    }

    fn await_response(&mut self, sh: &Shared, cseq: u32) -> Option<RtspMessage> {
        let attempts = self.retry_count.max(1);
        let slice = (self.timeout + Duration::from_millis(1)) / attempts;
        let streaming = self.reader.is_some();

        for _ in 0..attempts {
            if let Some(response) = sh.inbox.take_response(cseq) {
                return Some(response);
            }
            if streaming {
                sh.inbox.wait(slice);
            } else if !self.receive_once(sh, slice) {
                break;
            }
        }
        sh.inbox.take_response(cseq)
    }

    /// One read from the control connection. Returns `false` on a hard error.
    fn receive_once(&mut self, sh: &Shared, timeout: Duration) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        if let Err(e) = connection.set_read_timeout(timeout) {
            tracing::warn!(error = %e, "unable to set read timeout");
            return false;
        }
        match connection.receive(&mut self.buffer) {
            Ok(0) => {
                // Stream closed; remaining attempts only drain what is buffered.
                thread::sleep(timeout.min(Duration::from_millis(10)));
                true
            }
            Ok(n) => {
                route(&sh.media, &sh.inbox, &self.buffer[..n]);
                true
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "receive failed");
                false
            }
        }
    }

    /// Build the re-send for a 401, or `None` when the challenge can't be met.
    fn answer_challenge(&mut self, request: &RtspMessage, response: &RtspMessage) -> Option<RtspMessage> {
        self.auth.credentials()?;
        let challenge = response.header("WWW-Authenticate")?;
        let method = request.method()?;
        let uri = request.uri().unwrap_or("*").to_string();
        let value = self
            .auth
            .answer(challenge, method.as_str(), &uri, request.body())?;

        tracing::debug!(%method, scheme = ?self.auth.scheme(), "answering authentication challenge");
        let mut retry = request.clone();
        retry.set_header("Authorization", &value);
        retry.remove_header("CSeq");
        Some(retry)
    }

    fn adopt_session(&mut self, response: &RtspMessage) {
        let Some(header) = response.header("Session").and_then(SessionHeader::parse) else {
            return;
        };
        match header.timeout {
            SessionTimeout::Seconds(0) => self.timeout = DEFAULT_SESSION_TIMEOUT,
            SessionTimeout::Seconds(secs) => {
                self.timeout = Duration::from_secs(secs).min(MAX_SESSION_TIMEOUT);
            }
            SessionTimeout::Absent | SessionTimeout::Malformed => {}
        }
        tracing::info!(session_id = %header.id, timeout = ?self.timeout, "session established");
        self.session_id = Some(header.id);
    }

    /// Start reading the control stream on a separate thread, so interleaved
    /// media keeps flowing between requests.
    pub(crate) fn start_reader(&mut self, sh: &Shared) {
        if self.reader.is_some() {
            return;
        }
        let Some(stream) = self.connection.as_ref().and_then(|c| c.try_clone_stream()) else {
            return;
        };
        if let Err(e) = stream.set_read_timeout(Some(READER_POLL)) {
            tracing::warn!(error = %e, "unable to configure interleaved reader");
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let media = sh.media.clone();
        let inbox = sh.inbox.clone();
        let buffer_size = self.config.buffer_size;

        let spawned = thread::Builder::new()
            .name("rtsp-interleaved".to_string())
            .spawn(move || {
                tcp::read_loop(stream, flag, buffer_size, |chunk| {
                    route(&media, &inbox, chunk);
                    true
                })
            });
        match spawned {
            Ok(handle) => {
                tracing::debug!("interleaved reader started");
                self.reader = Some(ReaderHandle { running, handle });
            }
            Err(e) => tracing::warn!(error = %e, "unable to spawn interleaved reader"),
        }
    }

    pub(crate) fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::receiver::frame;

    #[test]
    fn demux_signals_complete_responses() {
        let signal = InterleaveSignal::default();
        let data = b"RTSP/1.0 200 OK\r\nCSeq: 4\r\n\r\n";
        assert_eq!(signal.demux(data), data.len());
        assert!(signal.wait(Duration::ZERO));
        assert!(signal.take_response(5).is_none());
        let r = signal.take_response(4).unwrap();
        assert_eq!(r.cseq(), Some(4));
        assert!(!signal.wait(Duration::ZERO));
    }

    #[test]
    fn demux_completes_pending_message() {
        let signal = InterleaveSignal::default();
        signal.demux(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 4\r\n\r\nv=");
        assert!(signal.has_pending());
        assert!(!signal.wait(Duration::ZERO));
        signal.demux(b"0\r\n");
        assert!(!signal.has_pending());
        assert_eq!(signal.take_response(2).unwrap().body(), Some("v=0\r"));
    }

    #[test]
    fn response_split_inside_start_line_is_kept() {
        let signal = InterleaveSignal::default();
        assert_eq!(signal.demux(b"RTSP/1."), 7);
        assert!(signal.has_pending());
        signal.demux(b"0 200 OK\r\nCSeq: 1\r\n\r\n");
        assert_eq!(signal.take_response(1).unwrap().status(), Some(StatusCode::OK));
    }

    #[test]
    fn unbounded_wait_returns_once_signaled() {
        let signal = InterleaveSignal::default();
        signal.demux(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n");
        assert!(signal.wait(Duration::MAX));
    }

    #[test]
    fn stale_responses_are_dropped() {
        let signal = InterleaveSignal::default();
        signal.demux(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\nRTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n");
        assert_eq!(signal.take_response(3).unwrap().cseq(), Some(3));
        assert!(signal.take_response(1).is_none());
    }

    #[test]
    fn garbage_is_skipped_up_to_frame_marker() {
        let signal = InterleaveSignal::default();
        assert_eq!(signal.demux(b"\x01\x02\x03$\x00"), 3);
    }

    #[test]
    fn route_splits_frames_and_text() {
        let media = Mutex::new(MediaReceiver::new());
        let signal = InterleaveSignal::default();

        let mut data = frame(0, &[0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1]);
        data.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 9\r\n\r\n");
        data.extend(frame(1, &[0x80, 200, 0, 1, 0, 0, 0, 1]));
        route(&media, &signal, &data);

        assert!(signal.take_response(9).is_some());
        assert!(!media.lock().has_pending_frame());
    }

    #[test]
    fn wait_wakes_on_demux_from_other_thread() {
        let signal = Arc::new(InterleaveSignal::default());
        let s = signal.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            s.demux(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n");
        });
        assert!(signal.wait(Duration::from_secs(5)));
        t.join().unwrap();
    }
}
