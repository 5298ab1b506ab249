use std::time::SystemTime;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{RtspMethod, StatusCode};

/// Protocol version written on every request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Longest unterminated start line kept while waiting for its end.
const MAX_START_LINE: usize = 4096;

/// `Content-Type` of tunneled requests (RTSP over HTTP).
pub const TUNNEL_CONTENT_TYPE: &str = "application/x-rtsp-tunnelled";

/// First line of an RTSP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// `Method SP Request-URI SP RTSP-Version`
    Request { method: RtspMethod, uri: String },
    /// `RTSP-Version SP Status-Code SP Reason-Phrase`
    Response { status: StatusCode, reason: String },
}

/// An RTSP request or response (RFC 2326 §6, §7).
///
/// RTSP messages follow HTTP/1.1 syntax:
///
/// ```text
/// start-line CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body of Content-Length bytes]
/// ```
///
/// Headers keep their insertion order on the wire; lookups are
/// case-insensitive (RFC 2326 §4.2) and [`set_header`](Self::set_header)
/// replaces an existing value, so the last write wins.
///
/// A message parsed from a partial read is *incomplete* until the rest of the
/// head and the declared body arrive through [`complete_from`](Self::complete_from).
/// Once [`mark_transferred`](Self::mark_transferred) has been called the
/// message is not modified again by the client.
#[derive(Debug, Clone)]
pub struct RtspMessage {
    pub kind: MessageKind,
    /// Protocol version (`RTSP/1.0`, or `HTTP/1.x` for tunneled responses).
    pub version: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    created: SystemTime,
    transferred: Option<SystemTime>,
    complete: bool,
    /// Raw bytes seen so far while the message is incomplete.
    partial: Vec<u8>,
}

impl RtspMessage {
    fn new(kind: MessageKind) -> Self {
        RtspMessage {
            kind,
            version: RTSP_VERSION.to_string(),
            headers: Vec::new(),
            body: None,
            created: SystemTime::now(),
            transferred: None,
            complete: true,
            partial: Vec::new(),
        }
    }

    pub fn request(method: RtspMethod, uri: &str) -> Self {
        Self::new(MessageKind::Request {
            method,
            uri: uri.to_string(),
        })
    }

    pub fn response(status: StatusCode) -> Self {
        Self::new(MessageKind::Response {
            status,
            reason: status.reason().to_string(),
        })
    }

    pub fn method(&self) -> Option<RtspMethod> {
        match &self.kind {
            MessageKind::Request { method, .. } => Some(*method),
            MessageKind::Response { .. } => None,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Request { uri, .. } => Some(uri),
            MessageKind::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match &self.kind {
            MessageKind::Response { status, .. } => Some(*status),
            MessageKind::Request { .. } => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.kind, MessageKind::Response { .. })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Set a header, replacing any existing value under the same name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Builder form of [`set_header`](Self::set_header).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Append `value` to an existing header as a list element, or set it.
    pub fn append_or_set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) if existing.split(',').any(|v| v.trim() == value) => {}
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let pos = self
            .headers
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.headers.remove(pos).1)
    }

    /// The CSeq header value (RFC 2326 §12.17), if present and numeric.
    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn set_cseq(&mut self, cseq: u32) {
        self.set_header("CSeq", &cseq.to_string());
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Set the body and its `Content-Length` framing header (RFC 2326 §12.14).
    pub fn set_body(&mut self, body: String) {
        self.set_header("Content-Length", &body.len().to_string());
        self.body = Some(body);
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.set_body(body);
        self
    }

    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// When the message was written to the wire, if it was.
    pub fn transferred(&self) -> Option<SystemTime> {
        self.transferred
    }

    pub fn mark_transferred(&mut self) {
        self.transferred = Some(SystemTime::now());
    }

    /// True once the start line, headers and declared body have all arrived.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Serialize to the RTSP text wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = match &self.kind {
            MessageKind::Request { method, uri } => {
                format!("{} {} {}\r\n", method, uri, self.version)
            }
            MessageKind::Response { status, reason } => {
                format!("{} {} {}\r\n", self.version, status.0, reason)
            }
        };

        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");

        if let Some(body) = &self.body {
            out.push_str(body);
        }
        out.into_bytes()
    }

    /// Serialize as an RTSP-over-HTTP tunneled POST.
    ///
    /// The RTSP text is base64 encoded into the POST body; `cookie` ties the
    /// POST to the GET channel on servers that use two connections.
    pub fn to_http_bytes(&self, path: &str, cookie: &str) -> Vec<u8> {
        let encoded = BASE64.encode(self.to_bytes());
        format!(
            "POST {} HTTP/1.0\r\nx-sessioncookie: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nPragma: no-cache\r\n\r\n{}",
            path,
            cookie,
            TUNNEL_CONTENT_TYPE,
            encoded.len(),
            encoded
        )
        .into_bytes()
    }

    /// Parse one message from the start of `data`.
    ///
    /// Returns the message and the number of bytes it consumed. If `data`
    /// ends before the head or the declared body does, the message is
    /// returned incomplete and all of `data` is consumed. Bare CR and bare LF
    /// are accepted as line terminators.
    pub fn parse(data: &[u8]) -> Result<(RtspMessage, usize)> {
        let skipped = data
            .iter()
            .take_while(|b| matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
            .count();
        let data = &data[skipped..];

        let first = *data.first().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;
        if !first.is_ascii_alphabetic() {
            return Err(ParseErrorKind::NotText.into());
        }

        let mut lines = Lines::new(data);
        let Some(start_line) = lines.next() else {
            // Start line still arriving; the kind is settled once it ends.
            // A frame marker means this is not the head of a message.
            if data.len() > MAX_START_LINE || data.contains(&b'$') {
                return Err(ParseErrorKind::InvalidStartLine.into());
            }
            let mut message = RtspMessage::new(MessageKind::Response {
                status: StatusCode(0),
                reason: String::new(),
            });
            message.complete = false;
            message.partial = data.to_vec();
            return Ok((message, skipped + data.len()));
        };
        let (kind, version) = parse_start_line(&String::from_utf8_lossy(start_line))?;

        let mut message = RtspMessage::new(kind);
        message.version = version;

        let mut head_len = None;
        while let Some(line) = lines.next() {
            if line.is_empty() {
                head_len = Some(lines.position());
                break;
            }
            let line = String::from_utf8_lossy(line);
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            message
                .headers
                .push((line[..colon].trim().to_string(), line[colon + 1..].trim().to_string()));
        }

        let Some(head_len) = head_len else {
            message.complete = false;
            message.partial = data.to_vec();
            return Ok((message, skipped + data.len()));
        };

        let body_len = match message.header("Content-Length") {
            Some(v) => v.trim().parse::<usize>().map_err(|_| RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength,
            })?,
            None => 0,
        };

        let available = data.len() - head_len;
        if available < body_len {
            message.complete = false;
            message.partial = data.to_vec();
            return Ok((message, skipped + data.len()));
        }

        if body_len > 0 {
            message.body = Some(
                String::from_utf8_lossy(&data[head_len..head_len + body_len]).into_owned(),
            );
        }
        Ok((message, skipped + head_len + body_len))
    }

    /// Feed more bytes into an incomplete message.
    ///
    /// Returns how many bytes of `data` belong to this message; anything past
    /// that is the start of the next message (or media frames).
    pub fn complete_from(&mut self, data: &[u8]) -> Result<usize> {
        if self.complete || data.is_empty() {
            return Ok(0);
        }

        let previous = self.partial.len();
        let mut buf = std::mem::take(&mut self.partial);
        buf.extend_from_slice(data);

        let (parsed, consumed) = match RtspMessage::parse(&buf) {
            Ok(parsed) => parsed,
            Err(e) => {
                buf.truncate(previous);
                self.partial = buf;
                return Err(e);
            }
        };

        let created = self.created;
        *self = parsed;
        self.created = created;
        Ok(consumed.saturating_sub(previous).min(data.len()))
    }
}

fn parse_start_line(line: &str) -> Result<(MessageKind, String)> {
    let line = line.trim();
    let invalid = || RtspError::Parse {
        kind: ParseErrorKind::InvalidStartLine,
    };

    if line.starts_with("RTSP/") || line.starts_with("HTTP/") {
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().ok_or_else(invalid)?.to_string();
        let code: u16 = parts
            .next()
            .and_then(|c| c.trim().parse().ok())
            .ok_or_else(invalid)?;
        let status = StatusCode(code);
        let reason = parts
            .next()
            .map(|r| r.trim().to_string())
            .unwrap_or_else(|| status.reason().to_string());
        return Ok((MessageKind::Response { status, reason }, version));
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let method = parts[0].parse::<RtspMethod>()?;
    Ok((
        MessageKind::Request {
            method,
            uri: parts[1].to_string(),
        },
        parts[2].to_string(),
    ))
}

/// Line splitter accepting CRLF, bare LF and bare CR.
///
/// Only terminated lines are yielded; an unterminated tail is left unread.
struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(data: &'a [u8]) -> Self {
        Lines { data, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|b| *b == b'\r' || *b == b'\n')?;
        let line = &rest[..end];

        let mut advance = end + 1;
        if rest[end] == b'\r' {
            match rest.get(end + 1) {
                Some(b'\n') => advance += 1,
                // A CR at the very end may be half of a CRLF still in flight.
                None => return None,
                Some(_) => {}
            }
        }
        self.pos += advance;
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_response() {
        let raw = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n";
        let (msg, used) = RtspMessage::parse(raw).unwrap();
        assert_eq!(used, raw.len());
        assert!(msg.is_complete());
        assert_eq!(msg.status(), Some(StatusCode::OK));
        assert_eq!(msg.cseq(), Some(1));
        assert_eq!(msg.header("public"), Some("OPTIONS, DESCRIBE"));
    }

    #[test]
    fn parse_setup_request() {
        let raw = "SETUP rtsp://localhost:8554/test/track1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let (req, _) = RtspMessage::parse(raw.as_bytes()).unwrap();
        assert_eq!(req.method(), Some(RtspMethod::Setup));
        assert_eq!(req.uri(), Some("rtsp://localhost:8554/test/track1"));
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(
            req.header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn bare_lf_and_bare_cr_terminators() {
        let lf = b"RTSP/1.0 200 OK\nCSeq: 7\n\n";
        let (msg, _) = RtspMessage::parse(lf).unwrap();
        assert!(msg.is_complete());
        assert_eq!(msg.cseq(), Some(7));

        let cr = b"RTSP/1.0 200 OK\rCSeq: 8\r\rtrailing";
        let (msg, used) = RtspMessage::parse(cr).unwrap();
        assert!(msg.is_complete());
        assert_eq!(msg.cseq(), Some(8));
        assert_eq!(&cr[used..], b"trailing");
    }

    #[test]
    fn body_split_across_reads_completes() {
        let raw = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 10\r\n\r\nv=0\r\n";
        let (mut msg, _) = RtspMessage::parse(raw).unwrap();
        assert!(!msg.is_complete());

        let used = msg.complete_from(b"o=x\r\n$\x00\x00\x01").unwrap();
        assert_eq!(used, 5);
        assert!(msg.is_complete());
        assert_eq!(msg.body(), Some("v=0\r\no=x\r\n"));
    }

    #[test]
    fn head_split_across_reads_completes() {
        let (mut msg, _) = RtspMessage::parse(b"RTSP/1.0 401 Unauthorized\r\nCSe").unwrap();
        assert!(!msg.is_complete());
        msg.complete_from(b"q: 4\r\n\r\n").unwrap();
        assert!(msg.is_complete());
        assert_eq!(msg.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(msg.cseq(), Some(4));
    }

    #[test]
    fn start_line_split_across_reads_completes() {
        let (mut msg, used) = RtspMessage::parse(b"RTSP/1.").unwrap();
        assert_eq!(used, 7);
        assert!(!msg.is_complete());
        let used = msg.complete_from(b"0 200 OK\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(used, 21);
        assert!(msg.is_complete());
        assert_eq!(msg.status(), Some(StatusCode::OK));
        assert_eq!(msg.cseq(), Some(1));
    }

    #[test]
    fn unterminated_start_line_must_look_like_text() {
        let line = vec![b'A'; MAX_START_LINE + 1];
        assert!(RtspMessage::parse(&line).is_err());
        assert!(RtspMessage::parse(b"junk$\x00\x00\x01a").is_err());
    }

    #[test]
    fn binary_data_is_rejected() {
        assert!(matches!(
            RtspMessage::parse(b"$\x00\x00\x04abcd"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::NotText
            })
        ));
        assert!(RtspMessage::parse(b"").is_err());
        assert!(RtspMessage::parse(b"JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn request_round_trip_preserves_method_headers_body() {
        let mut req = RtspMessage::request(RtspMethod::SetParameter, "rtsp://cam/live");
        req.set_cseq(9);
        req.set_header("Session", "abc");
        req.set_header("Content-Type", "text/parameters");
        req.set_body("volume: 5\r\n".to_string());

        let bytes = req.to_bytes();
        let (parsed, used) = RtspMessage::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed.kind, req.kind);
        assert_eq!(parsed.headers(), req.headers());
        assert_eq!(parsed.body(), req.body());
    }

    #[test]
    fn set_header_is_last_write_wins() {
        let mut req = RtspMessage::request(RtspMethod::Options, "*");
        req.set_header("User-Agent", "a");
        req.set_header("user-agent", "b");
        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.header("USER-AGENT"), Some("b"));

        req.append_or_set_header("Require", "x");
        req.append_or_set_header("Require", "y");
        req.append_or_set_header("Require", "y");
        assert_eq!(req.header("Require"), Some("x, y"));
    }

    #[test]
    fn tunneled_request_is_base64_post() {
        let req = RtspMessage::request(RtspMethod::Options, "http://cam/live");
        let bytes = String::from_utf8(req.to_http_bytes("/live", "c00kie")).unwrap();
        assert!(bytes.starts_with("POST /live HTTP/1.0\r\n"));
        assert!(bytes.contains("x-sessioncookie: c00kie\r\n"));
        let body = bytes.split("\r\n\r\n").nth(1).unwrap();
        let decoded = BASE64.decode(body).unwrap();
        assert!(decoded.starts_with(b"OPTIONS http://cam/live RTSP/1.0\r\n"));
    }
}
