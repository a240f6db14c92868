//! Client-side RTSP streaming to fragmented MP4, without I/O.
//!
//! Bytes read from an RTSP/TCP connection go in; requests to write back,
//! session events and playable ISO BMFF segments come out.
//!
//! ```text
//! socket bytes → InterleavedParser → RtspSession → RtpDepay → Mp4Muxer → media buffer
//!                                         │                        │
//!                                  requests, events          Sync → Scheduler
//! ```

pub mod bytes;
pub mod depay;
pub mod error;
pub mod message;
pub mod mp4;
pub mod pipeline;
pub mod protocol;
pub mod scheduler;
pub mod session;

pub use error::{Result, RtspError};
pub use message::Message;
pub use pipeline::{Component, Pipeline};
pub use scheduler::{Clock, Scheduler, WallClock};
pub use session::{RtspSession, SessionConfig, SessionEvent};
