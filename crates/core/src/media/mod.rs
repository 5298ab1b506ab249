//! Media side of a session: negotiated transport contexts and receivers.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each media stream arrives as RTP packets with a 12-byte fixed header
//! ([`rtp::RtpHeader`]) and periodic RTCP reports. They travel either on a
//! UDP port pair per media, or interleaved on the RTSP control stream:
//!
//! ```text
//! | '$' | channel | length (u16) | RTP or RTCP packet ... |
//! ```
//!
//! The receiver here only keeps per-context activity counters, which the
//! client uses for keep-alive decisions and carrier switching.

pub mod context;
pub mod receiver;
pub mod rtp;

use std::fmt;

pub use context::{ContextStats, TransportContext};
pub use receiver::MediaReceiver;

/// How media travels between server and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaProtocol {
    /// Interleaved on the control TCP stream.
    Tcp,
    /// RTP/RTCP on a UDP port pair.
    Udp,
    /// Whatever the server picks for the media's own profile.
    Ip,
}

impl MediaProtocol {
    /// Order in which carriers are tried when media does not arrive.
    pub const ESCALATION: [MediaProtocol; 3] =
        [MediaProtocol::Tcp, MediaProtocol::Udp, MediaProtocol::Ip];

    /// First carrier in [`ESCALATION`](Self::ESCALATION) order, other than
    /// `self`, that `tried` does not contain.
    pub fn next_untried(self, tried: &[MediaProtocol]) -> Option<MediaProtocol> {
        Self::ESCALATION
            .into_iter()
            .find(|p| *p != self && !tried.contains(p))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaProtocol::Tcp => "tcp",
            MediaProtocol::Udp => "udp",
            MediaProtocol::Ip => "ip",
        }
    }
}

impl fmt::Display for MediaProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "interleaved" => Ok(MediaProtocol::Tcp),
            "udp" => Ok(MediaProtocol::Udp),
            "ip" | "raw" => Ok(MediaProtocol::Ip),
            other => Err(format!("unknown media protocol {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_skips_current_and_tried() {
        use MediaProtocol::*;
        assert_eq!(Udp.next_untried(&[Udp]), Some(Tcp));
        assert_eq!(Tcp.next_untried(&[Udp, Tcp]), Some(Ip));
        assert_eq!(Ip.next_untried(&[Udp, Tcp, Ip]), None);
    }

    #[test]
    fn parses_names() {
        assert_eq!("TCP".parse::<MediaProtocol>(), Ok(MediaProtocol::Tcp));
        assert_eq!("udp".parse::<MediaProtocol>(), Ok(MediaProtocol::Udp));
        assert!("sctp".parse::<MediaProtocol>().is_err());
    }
}
