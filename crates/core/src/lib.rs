//! RTSP 1.0 client (RFC 2326).
//!
//! [`RtspClient`] drives a session against one presentation URL: OPTIONS and
//! DESCRIBE to learn the presentation, SETUP per media with automatic
//! fallback between UDP and interleaved carriage, PLAY/PAUSE/TEARDOWN, Basic
//! and Digest authentication, and a keep-alive that also restarts stalled
//! media.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod protocol;
pub mod transport;

pub use auth::{AuthScheme, Credentials};
pub use client::{PlayRange, RtspClient, SessionState};
pub use config::ClientConfig;
pub use error::{Result, RtspError};
pub use events::{ClientEvent, EventKind, EventSource, ListenerId};
pub use media::MediaProtocol;
pub use protocol::{MediaDescription, MediaType, RtspMessage, RtspMethod, SessionDescription, StatusCode};
