//! RTSP protocol implementation (RFC 2326), client side.
//!
//! This module handles the text-based RTSP signaling protocol: building and
//! parsing messages, typed header helpers, and reading SDP.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - Different methods: OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN.
//! - Session header carries a server-assigned ID (RFC 2326 §12.37).
//! - Over TCP, media may be interleaved on the same connection behind a
//!   `$` marker (RFC 2326 §10.12).
//!
//! ## Methods the client sends
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery, keepalive fallback |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | ANNOUNCE | §10.3 | Post a session description |
//! | SETUP | §10.4 | Negotiate transport |
//! | PLAY | §10.5 | Start media delivery |
//! | PAUSE | §10.6 | Suspend media delivery |
//! | TEARDOWN | §10.7 | Destroy session |
//! | GET_PARAMETER | §10.8 | Keepalive / parameter query |
//! | SET_PARAMETER | §10.9 | Set a parameter |

pub mod headers;
pub mod message;
pub mod method;
pub mod sdp;
pub mod status;
pub mod transport;

pub use message::{MessageKind, RtspMessage};
pub use method::RtspMethod;
pub use sdp::{MediaDescription, MediaType, SessionDescription};
pub use status::StatusCode;
pub use transport::TransportHeader;
