use std::time::Duration;

use crate::auth::{AuthScheme, Credentials};
use crate::media::MediaProtocol;

/// `User-Agent` sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("rtsp-client/", env!("CARGO_PKG_VERSION"));

/// Session timeout assumed until the server sends one (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest session timeout honored; larger announcements are clamped.
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// How long PLAY may go without any media before the carrier is switched.
pub const DEFAULT_PROTOCOL_SWITCH_TIME: Duration = Duration::from_secs(10);

/// Receive buffer capacity, also advertised as `Blocksize`.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Lowest UDP port probed for RTP/RTCP pairs.
pub const DEFAULT_UDP_PORT_FLOOR: u16 = 10000;

/// Client configuration.
///
/// Build with struct-update syntax over [`Default`]:
///
/// ```
/// use std::time::Duration;
/// use rtsp::ClientConfig;
///
/// let config = ClientConfig {
///     retry_count: 5,
///     protocol_switch_time: Duration::from_secs(3),
///     ..Default::default()
/// };
/// assert_eq!(config.retry_count, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub credentials: Option<Credentials>,
    /// Scheme used for pre-emptive `Authorization`; learned from the first
    /// challenge when left at [`AuthScheme::None`].
    pub auth_scheme: AuthScheme,
    /// Attempts per request before giving up; values below 1 are treated as 1.
    pub retry_count: u32,
    /// Liveness timeout until the server sends its own.
    pub session_timeout: Duration,
    pub protocol_switch_time: Duration,
    pub connect_timeout: Duration,
    pub buffer_size: usize,
    /// Extra headers added to every request (append-or-set).
    pub additional_headers: Vec<(String, String)>,
    /// Initial media carrier. `rtspu` locations force [`MediaProtocol::Udp`].
    pub media_protocol: MediaProtocol,
    /// Longest gap between packets before a context counts as stalled.
    pub media_receive_interval: Duration,
    pub udp_port_floor: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            credentials: None,
            auth_scheme: AuthScheme::None,
            retry_count: 3,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            protocol_switch_time: DEFAULT_PROTOCOL_SWITCH_TIME,
            connect_timeout: Duration::from_secs(5),
            buffer_size: DEFAULT_BUFFER_SIZE,
            additional_headers: Vec::new(),
            media_protocol: MediaProtocol::Udp,
            media_receive_interval: Duration::from_secs(10),
            udp_port_floor: DEFAULT_UDP_PORT_FLOOR,
        }
    }
}
