//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Reads the body of a DESCRIBE response. The parts the client uses:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- 1234 1 IN IP4 10.0.0.5                   ← origin
//! s=Stream                                     ← session name
//! c=IN IP4 10.0.0.5                            ← connection address
//! a=control:*                                  ← aggregate control URL
//! a=range:npt=0-                               ← presentation range
//! m=video 0 RTP/AVP 96                         ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=control:trackID=1                          ← track control URL
//! ```
//!
//! Unknown line types are kept as-is so a parsed description can be
//! written back out (ANNOUNCE) without loss.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Result, RtspError};
use crate::protocol::headers::parse_npt_range;

/// MIME type of SDP bodies (`Accept` / `Content-Type`).
pub const SDP_MIME_TYPE: &str = "application/sdp";

/// The `<media>` field of an `m=` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Application,
    Text,
    Message,
    Other(String),
}

impl MediaType {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "application" => Self::Application,
            "text" => Self::Text,
            "message" => Self::Message,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Application => "application",
            Self::Text => "text",
            Self::Message => "message",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `m=` section of a session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: MediaType,
    pub port: u16,
    /// Transport profile, e.g. `RTP/AVP` or `RTP/AVP/TCP`.
    pub protocol: String,
    /// Payload formats listed on the `m=` line.
    pub formats: Vec<String>,
    /// Remaining lines of the section in order (`c=`, `b=`, `a=`...),
    /// stored as `(type, value)`.
    pub lines: Vec<(char, String)>,
}

impl MediaDescription {
    /// Value of the first `a=<name>:<value>` attribute; flag attributes
    /// (`a=recvonly`) yield an empty string.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        find_attribute(&self.lines, name)
    }

    /// The `a=control` attribute.
    pub fn control(&self) -> Option<&str> {
        self.attribute("control")
    }

    /// The `a=rtpmap` attribute, e.g. `96 H264/90000`.
    pub fn rtpmap(&self) -> Option<&str> {
        self.attribute("rtpmap")
    }

    /// The `a=range` attribute as an npt `(start, end)` pair.
    pub fn range(&self) -> Option<(Option<Duration>, Option<Duration>)> {
        self.attribute("range").and_then(parse_npt_range)
    }

    /// Resolve this media's control URL against the session location.
    ///
    /// Absolute control URLs are used as-is, `*` or a missing control means
    /// the base itself, and anything else is appended to the base path the
    /// way live555 and ffmpeg do (not strict RFC 3986 resolution).
    pub fn absolute_control_uri(&self, base: &Url) -> Url {
        match self.control() {
            Some(control) => join_control(base, control),
            None => base.clone(),
        }
    }
}

/// A parsed SDP session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Session-level lines in order, stored as `(type, value)`.
    pub lines: Vec<(char, String)>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Parse an SDP document. Requires a `v=` line before any `m=` line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        let mut media: Vec<MediaDescription> = Vec::new();
        let mut saw_version = false;

        for raw in text.lines() {
            let raw = raw.trim_end_matches('\r').trim();
            if raw.is_empty() {
                continue;
            }

            let (kind, value) = raw
                .split_once('=')
                .filter(|(k, _)| k.len() == 1)
                .map(|(k, v)| (k.chars().next().unwrap_or('?'), v.trim()))
                .ok_or_else(|| RtspError::SessionDescription(format!("bad line {raw:?}")))?;

            match kind {
                'v' => {
                    saw_version = true;
                    lines.push((kind, value.to_string()));
                }
                'm' => {
                    if !saw_version {
                        return Err(RtspError::SessionDescription(
                            "m= line before v= line".to_string(),
                        ));
                    }
                    media.push(parse_media_line(value)?);
                }
                _ => match media.last_mut() {
                    Some(m) => m.lines.push((kind, value.to_string())),
                    None => lines.push((kind, value.to_string())),
                },
            }
        }

        if !saw_version {
            return Err(RtspError::SessionDescription("missing v= line".to_string()));
        }

        tracing::debug!(media = media.len(), "parsed session description");
        Ok(SessionDescription { lines, media })
    }

    pub fn session_name(&self) -> Option<&str> {
        self.lines
            .iter()
            .find(|(k, _)| *k == 's')
            .map(|(_, v)| v.as_str())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        find_attribute(&self.lines, name)
    }

    /// Session-level `a=range` as an npt `(start, end)` pair.
    pub fn range(&self) -> Option<(Option<Duration>, Option<Duration>)> {
        self.attribute("range").and_then(parse_npt_range)
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.lines {
            write!(f, "{}={}\r\n", k, v)?;
        }
        for m in &self.media {
            write!(f, "m={} {} {}", m.media_type, m.port, m.protocol)?;
            for format in &m.formats {
                write!(f, " {}", format)?;
            }
            f.write_str("\r\n")?;
            for (k, v) in &m.lines {
                write!(f, "{}={}\r\n", k, v)?;
            }
        }
        Ok(())
    }
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    let mut parts = value.split_whitespace();
    let bad = || RtspError::SessionDescription(format!("bad m= line {value:?}"));

    let media_type = MediaType::parse(parts.next().ok_or_else(bad)?);
    // `<port>/<number of ports>` is allowed; only the base port matters here.
    let port = parts
        .next()
        .and_then(|p| p.split('/').next())
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(bad)?;
    let protocol = parts.next().ok_or_else(bad)?.to_string();
    let formats = parts.map(str::to_string).collect();

    Ok(MediaDescription {
        media_type,
        port,
        protocol,
        formats,
        lines: Vec::new(),
    })
}

fn find_attribute<'a>(lines: &'a [(char, String)], name: &str) -> Option<&'a str> {
    lines
        .iter()
        .filter(|(k, _)| *k == 'a')
        .find_map(|(_, v)| match v.split_once(':') {
            Some((n, value)) if n.eq_ignore_ascii_case(name) => Some(value.trim()),
            None if v.eq_ignore_ascii_case(name) => Some(""),
            _ => None,
        })
}

fn join_control(base: &Url, control: &str) -> Url {
    if control == "*" {
        return base.clone();
    }
    if let Ok(absolute) = Url::parse(control) {
        return absolute;
    }

    let joined = format!(
        "{}{}{}",
        base.as_str(),
        if base.as_str().ends_with('/') { "" } else { "/" },
        control
    );
    Url::parse(&joined).unwrap_or_else(|e| {
        tracing::warn!(%base, control, error = %e, "unable to join control url, using base");
        base.clone()
    })
}
