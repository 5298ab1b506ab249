use rand::RngExt;

/// RTP fixed header reader (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only what the receive statistics need is decoded; payloads are not
/// touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Read the fixed header. Returns `None` for short packets, versions
    /// other than 2, and RTCP packet types (200..=204) sharing the port.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < 12 || packet[0] >> 6 != 2 || is_rtcp(packet) {
            return None;
        }
        Some(RtpHeader {
            marker: packet[1] & 0x80 != 0,
            payload_type: packet[1] & 0x7f,
            sequence: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
        })
    }
}

/// True for RTCP packets (RFC 5761 §4: packet types 192..=223 never appear
/// as RTP payload types).
pub fn is_rtcp(packet: &[u8]) -> bool {
    packet.len() >= 8 && packet[0] >> 6 == 2 && (192..=223).contains(&packet[1])
}

/// Random receiver SSRC (RFC 3550 §8.1).
pub fn random_ssrc() -> u32 {
    rand::rng().random::<u32>()
}

/// Compound RTCP packet announcing that `ssrc` is leaving (RFC 3550 §6.6).
///
/// An empty Receiver Report followed by a BYE, since every compound packet
/// must start with a report.
pub fn goodbye(ssrc: u32) -> [u8; 16] {
    let mut packet = [0u8; 16];
    // RR: V=2, RC=0, PT=201, length=1 (two 32-bit words minus one).
    packet[0] = 2 << 6;
    packet[1] = 201;
    packet[2..4].copy_from_slice(&1u16.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());
    // BYE: V=2, SC=1, PT=203, length=1.
    packet[8] = (2 << 6) | 1;
    packet[9] = 203;
    packet[10..12].copy_from_slice(&1u16.to_be_bytes());
    packet[12..16].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(marker: bool, pt: u8, seq: u16) -> Vec<u8> {
        let mut p = vec![2 << 6, ((marker as u8) << 7) | pt];
        p.extend_from_slice(&seq.to_be_bytes());
        p.extend_from_slice(&90000u32.to_be_bytes());
        p.extend_from_slice(&0xAABBCCDDu32.to_be_bytes());
        p.extend_from_slice(b"payload");
        p
    }

    #[test]
    fn reads_fixed_header() {
        let h = RtpHeader::parse(&packet(true, 96, 513)).unwrap();
        assert!(h.marker);
        assert_eq!(h.payload_type, 96);
        assert_eq!(h.sequence, 513);
        assert_eq!(h.timestamp, 90000);
        assert_eq!(h.ssrc, 0xAABBCCDD);
    }

    #[test]
    fn rejects_short_and_wrong_version() {
        assert!(RtpHeader::parse(&[0x80, 96, 0, 1]).is_none());
        let mut p = packet(false, 96, 1);
        p[0] = 1 << 6;
        assert!(RtpHeader::parse(&p).is_none());
    }

    #[test]
    fn goodbye_is_rr_then_bye() {
        let bye = goodbye(0x01020304);
        assert!(is_rtcp(&bye));
        assert_eq!(bye[1], 201);
        assert_eq!(bye[8] & 0x1f, 1);
        assert_eq!(bye[9], 203);
        assert_eq!(&bye[12..16], &[1, 2, 3, 4]);
        assert!(RtpHeader::parse(&bye).is_none());
    }

    #[test]
    fn random_ssrc_differs() {
        assert_ne!(random_ssrc(), random_ssrc());
    }
}
