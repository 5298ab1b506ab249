use std::fmt;

use crate::error::ParseErrorKind;

/// A single `Transport` header specification (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=10000-10001
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=10000-10001;server_port=5000-5001;ssrc=1A2B3C4D
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
///
/// Only the first spec of a comma-separated list is read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    /// `RTP/AVP`, `RTP/AVP/TCP`, `RTP/AVP/UDP`...
    pub profile: String,
    /// `false` when `multicast` was given.
    pub unicast: bool,
    /// Interleaved data/control channel numbers.
    pub interleaved: Option<(u8, u8)>,
    /// Client RTP/RTCP receive ports.
    pub client_port: Option<(u16, u16)>,
    /// Server RTP/RTCP ports.
    pub server_port: Option<(u16, u16)>,
    pub ssrc: Option<u32>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub ttl: Option<u8>,
    /// `PLAY` or `RECORD`.
    pub mode: Option<String>,
}

impl TransportHeader {
    /// `RTP/AVP/TCP;unicast;interleaved=a-b`
    pub fn interleaved(data: u8, control: u8) -> Self {
        TransportHeader {
            profile: "RTP/AVP/TCP".to_string(),
            unicast: true,
            interleaved: Some((data, control)),
            ..Default::default()
        }
    }

    /// `RTP/AVP;unicast;client_port=rtp-rtcp`
    pub fn udp(rtp: u16, rtcp: u16) -> Self {
        TransportHeader {
            profile: "RTP/AVP".to_string(),
            unicast: true,
            client_port: Some((rtp, rtcp)),
            ..Default::default()
        }
    }

    /// `<profile>;unicast`, leaving the choice of ports to the server.
    pub fn raw(profile: &str) -> Self {
        TransportHeader {
            profile: profile.to_string(),
            unicast: true,
            ..Default::default()
        }
    }

    /// Parse a `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::protocol::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001;server_port=9000-9001").unwrap();
    /// assert_eq!(th.client_port, Some((8000, 8001)));
    /// assert_eq!(th.server_port, Some((9000, 9001)));
    ///
    /// assert!(TransportHeader::parse("RAW/RAW/UDP;unicast").is_err());
    /// ```
    pub fn parse(header: &str) -> Result<Self, ParseErrorKind> {
        let spec = header.split(',').next().unwrap_or_default();
        let mut parts = spec.split(';').map(str::trim);

        let profile = parts.next().unwrap_or_default();
        if !profile.to_ascii_uppercase().contains("RTP") {
            return Err(ParseErrorKind::InvalidTransport);
        }

        let mut th = TransportHeader {
            profile: profile.to_string(),
            unicast: true,
            ..Default::default()
        };

        for part in parts {
            let (name, value) = match part.split_once('=') {
                Some((n, v)) => (n.trim(), v.trim().trim_matches('"')),
                None => (part, ""),
            };
            match name.to_ascii_lowercase().as_str() {
                "unicast" => th.unicast = true,
                "multicast" => th.unicast = false,
                "interleaved" => {
                    let (a, b) = parse_pair::<u8>(value)?;
                    th.interleaved = Some((a, b.unwrap_or(a.wrapping_add(1))));
                }
                "client_port" => th.client_port = Some(port_pair(value)?),
                "server_port" => th.server_port = Some(port_pair(value)?),
                "ssrc" => {
                    th.ssrc = Some(
                        u32::from_str_radix(value, 16)
                            .map_err(|_| ParseErrorKind::InvalidTransport)?,
                    )
                }
                "source" => th.source = Some(value.to_string()),
                "destination" => th.destination = Some(value.to_string()),
                "ttl" => th.ttl = value.parse().ok(),
                "mode" => th.mode = Some(value.to_ascii_uppercase()),
                _ => {}
            }
        }
        Ok(th)
    }

    /// True when the profile or an `interleaved=` parameter names TCP carriage.
    pub fn is_interleaved(&self) -> bool {
        self.interleaved.is_some() || self.profile.to_ascii_uppercase().ends_with("/TCP")
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.profile)?;
        f.write_str(if self.unicast { ";unicast" } else { ";multicast" })?;
        if let Some(d) = &self.destination {
            write!(f, ";destination={}", d)?;
        }
        if let Some((a, b)) = self.interleaved {
            write!(f, ";interleaved={}-{}", a, b)?;
        }
        if let Some((a, b)) = self.client_port {
            write!(f, ";client_port={}-{}", a, b)?;
        }
        if let Some((a, b)) = self.server_port {
            write!(f, ";server_port={}-{}", a, b)?;
        }
        if let Some(ssrc) = self.ssrc {
            write!(f, ";ssrc={:08X}", ssrc)?;
        }
        if let Some(mode) = &self.mode {
            write!(f, ";mode={}", mode)?;
        }
        Ok(())
    }
}

fn port_pair(value: &str) -> Result<(u16, u16), ParseErrorKind> {
    let (rtp, rtcp) = parse_pair::<u16>(value)?;
    Ok((rtp, rtcp.unwrap_or(rtp.saturating_add(1))))
}

fn parse_pair<T: std::str::FromStr>(value: &str) -> Result<(T, Option<T>), ParseErrorKind> {
    let mut it = value.split('-');
    let first = it
        .next()
        .and_then(|v| v.trim().parse().ok())
        .ok_or(ParseErrorKind::InvalidTransport)?;
    let second = match it.next() {
        Some(v) => Some(v.trim().parse().map_err(|_| ParseErrorKind::InvalidTransport)?),
        None => None,
    };
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_udp_answer() {
        let th = TransportHeader::parse(
            "RTP/AVP;unicast;client_port=10000-10001;server_port=6970-6971;ssrc=1a2B3c4D;source=10.0.0.9;mode=\"play\"",
        )
        .unwrap();
        assert!(th.unicast);
        assert!(!th.is_interleaved());
        assert_eq!(th.client_port, Some((10000, 10001)));
        assert_eq!(th.server_port, Some((6970, 6971)));
        assert_eq!(th.ssrc, Some(0x1A2B3C4D));
        assert_eq!(th.source.as_deref(), Some("10.0.0.9"));
        assert_eq!(th.mode.as_deref(), Some("PLAY"));
    }

    #[test]
    fn parse_interleaved_answer() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert!(th.is_interleaved());
        assert_eq!(th.interleaved, Some((2, 3)));

        let single = TransportHeader::parse("RTP/AVP/TCP;interleaved=4").unwrap();
        assert_eq!(single.interleaved, Some((4, 5)));
    }

    #[test]
    fn parse_takes_first_of_list_and_multicast() {
        let th = TransportHeader::parse("RTP/AVP;multicast;ttl=16;port=5000-5001, RTP/AVP/TCP;interleaved=0-1")
            .unwrap();
        assert!(!th.unicast);
        assert_eq!(th.ttl, Some(16));
        assert_eq!(th.interleaved, None);
    }

    #[test]
    fn rejects_non_rtp_and_bad_ports() {
        assert!(TransportHeader::parse("").is_err());
        assert!(TransportHeader::parse("MP2T/H2221/UDP;unicast").is_err());
        assert!(TransportHeader::parse("RTP/AVP;client_port=abc-def").is_err());
    }

    #[test]
    fn display_builds_request_values() {
        assert_eq!(
            TransportHeader::interleaved(0, 1).to_string(),
            "RTP/AVP/TCP;unicast;interleaved=0-1"
        );
        assert_eq!(
            TransportHeader::udp(10000, 10001).to_string(),
            "RTP/AVP;unicast;client_port=10000-10001"
        );
        assert_eq!(TransportHeader::raw("RTP/SAVP").to_string(), "RTP/SAVP;unicast");
    }
}
