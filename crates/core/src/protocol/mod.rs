//! Wire protocols spoken by the client (RFC 2326, RFC 3550, RFC 4566).
//!
//! This module holds stateless readers and builders: RTSP request
//! serialization and response parsing, RTP/RTCP field access, SDP parsing,
//! and the interleaved demultiplexer that splits a TCP byte stream into
//! those messages.
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
//! ## Methods issued by the client
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery, session keepalive |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate interleaved transport per track |
//! | PLAY | §10.5 | Start media delivery |
//! | PAUSE | §10.6 | Suspend media delivery |
//! | TEARDOWN | §10.7 | Destroy session |
//! | GET_PARAMETER | §10.8 | Keepalive / parameter query |

pub mod auth;
pub mod ntp;
pub mod parser;
pub mod request;
pub mod response;
pub mod rtcp;
pub mod rtp;
pub mod sdp;

pub use auth::{Authenticator, Credentials};
pub use parser::InterleavedParser;
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
pub use sdp::{MediaDescription, Sdp};
