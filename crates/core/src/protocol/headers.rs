//! Typed helpers for the RTSP headers the client reads or builds.
//!
//! `Transport` has its own module ([`transport`](super::transport));
//! challenge headers live in [`auth`](crate::auth).

use std::time::Duration;

/// `timeout=` parameter of a `Session` header (RFC 2326 §12.37).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimeout {
    /// No `timeout` parameter was present.
    Absent,
    /// A well-formed number of seconds (may be zero).
    Seconds(u64),
    /// A `timeout` parameter whose value was not a number.
    Malformed,
}

/// Parsed `Session` header: `id[;timeout=seconds]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    pub timeout: SessionTimeout,
}

impl SessionHeader {
    /// Parse a `Session` header value.
    ///
    /// Returns `None` when the identifier is empty.
    ///
    /// ```
    /// use rtsp::protocol::headers::{SessionHeader, SessionTimeout};
    ///
    /// let h = SessionHeader::parse("12345678;timeout=30").unwrap();
    /// assert_eq!(h.id, "12345678");
    /// assert_eq!(h.timeout, SessionTimeout::Seconds(30));
    /// ```
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';');
        let id = parts.next()?.trim();
        if id.is_empty() {
            return None;
        }

        let mut timeout = SessionTimeout::Absent;
        for param in parts {
            let param = param.trim();
            let Some((name, v)) = param.split_once('=') else {
                if param.eq_ignore_ascii_case("timeout") {
                    timeout = SessionTimeout::Malformed;
                }
                continue;
            };
            if name.trim().eq_ignore_ascii_case("timeout") {
                timeout = match v.trim().parse::<u64>() {
                    Ok(secs) => SessionTimeout::Seconds(secs),
                    Err(_) => SessionTimeout::Malformed,
                };
            }
        }

        Some(SessionHeader {
            id: id.to_string(),
            timeout,
        })
    }
}

/// Build a `Range` header value (RFC 2326 §12.29).
///
/// `range_type` is the unit prefix (`npt`, `clock`, `smpte`...). For `npt`
/// a missing start is written as `now`. `range_format` selects how times are
/// printed: `Some("hms")` gives `h:mm:ss.fff`, anything else plain seconds
/// with millisecond precision.
pub fn range_header(
    start: Option<Duration>,
    end: Option<Duration>,
    range_type: &str,
    range_format: Option<&str>,
) -> String {
    let hms = matches!(range_format, Some(f) if f.eq_ignore_ascii_case("hms"));
    let fmt = |d: Duration| {
        if hms {
            let total = d.as_secs();
            format!(
                "{}:{:02}:{:02}.{:03}",
                total / 3600,
                (total / 60) % 60,
                total % 60,
                d.subsec_millis()
            )
        } else {
            format!("{:.3}", d.as_secs_f64())
        }
    };

    let start = match start {
        Some(s) => fmt(s),
        None if range_type.eq_ignore_ascii_case("npt") => "now".to_string(),
        None => String::new(),
    };
    let end = end.map(fmt).unwrap_or_default();
    format!("{}={}-{}", range_type, start, end)
}

/// Parse an `npt` range such as `npt=0-10.5`, `npt=now-` or `npt=1:02:03-`.
///
/// Returns `(start, end)`; `now` and missing bounds are `None`. Non-npt
/// ranges yield `None`.
pub fn parse_npt_range(value: &str) -> Option<(Option<Duration>, Option<Duration>)> {
    let value = value.trim();
    let spec = value.strip_prefix("npt=").or_else(|| value.strip_prefix("npt:"))?;
    let (start, end) = spec.split_once('-')?;
    Some((parse_npt_time(start), parse_npt_time(end)))
}

fn parse_npt_time(t: &str) -> Option<Duration> {
    let t = t.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("now") {
        return None;
    }
    if t.contains(':') {
        let mut secs = 0f64;
        for part in t.split(':') {
            secs = secs * 60.0 + part.parse::<f64>().ok()?;
        }
        return Duration::try_from_secs_f64(secs).ok();
    }
    t.parse::<f64>()
        .ok()
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}
